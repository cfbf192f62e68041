//! Motion link: single-flight opcode dispatch with acknowledgement gating.
//!
//! The link runs as its own task owning a [`MotionPort`]. Exactly one frame
//! may be outstanding: [`MotionHandle::dispatch`] enqueues a frame and
//! returns a completion the caller resolves when the controller
//! acknowledges, the wait times out, or a halt cancels it. The dispatcher's
//! queue discipline guarantees it never enqueues a second frame while one is
//! outstanding; the channel capacity of one backstops that without
//! re-validating.
//!
//! [`MotionHandle::halt`] is the priority path: it writes `STOP` on the wire
//! immediately, ahead of (and cancelling) any outstanding acknowledgement
//! wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};
use wayhub_types::LinkError;

/// Acknowledgement tokens from the controller start with this prefix.
pub const ACK_PREFIX: &str = "ACK";

/// Frame written on the out-of-band halt path.
const STOP_FRAME: &str = "STOP";

/// Byte transport to the motion controller.
///
/// Implementations own reconnection; a down transport surfaces as
/// [`LinkError::Disconnected`] and recovers silently in the background.
#[async_trait]
pub trait MotionPort: Send {
    /// Write one framed opcode.
    async fn write_frame(&mut self, frame: &str) -> Result<(), LinkError>;

    /// Next token from the controller, newline-delimited on the wire.
    async fn read_token(&mut self) -> Result<String, LinkError>;
}

/// Motion link tuning.
#[derive(Debug, Clone, Copy)]
pub struct MotionLinkConfig {
    /// Bounded wait per dispatched frame, not cumulative across a run.
    pub ack_timeout: Duration,
}

impl Default for MotionLinkConfig {
    fn default() -> Self {
        Self {
            // Arc turns on the physical platform take a few seconds each.
            ack_timeout: Duration::from_secs(15),
        }
    }
}

struct DispatchRequest {
    frame: String,
    reply: oneshot::Sender<Result<(), LinkError>>,
}

/// Cheaply cloneable handle to the motion link task.
#[derive(Clone)]
pub struct MotionHandle {
    req_tx: mpsc::Sender<DispatchRequest>,
    halt: Arc<Notify>,
}

impl MotionHandle {
    /// Enqueue one frame for dispatch. The returned receiver resolves with
    /// the acknowledgement outcome.
    pub fn dispatch(&self, frame: String) -> oneshot::Receiver<Result<(), LinkError>> {
        let (tx, rx) = oneshot::channel();
        let request = DispatchRequest { frame, reply: tx };
        match self.req_tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                let _ = request
                    .reply
                    .send(Err(LinkError::Io("dispatch while a frame is outstanding".into())));
            }
            Err(TrySendError::Closed(request)) => {
                let _ = request.reply.send(Err(LinkError::Disconnected));
            }
        }
        rx
    }

    /// Write `STOP` immediately, cancelling any outstanding
    /// acknowledgement wait with [`LinkError::Halted`].
    pub fn halt(&self) {
        self.halt.notify_one();
    }
}

/// Spawns the motion link task.
pub struct MotionLink;

impl MotionLink {
    pub fn spawn(port: impl MotionPort + 'static, config: MotionLinkConfig) -> MotionHandle {
        let (req_tx, req_rx) = mpsc::channel(1);
        let halt = Arc::new(Notify::new());
        tokio::spawn(run(Box::new(port), req_rx, Arc::clone(&halt), config));
        MotionHandle { req_tx, halt }
    }
}

async fn run(
    mut port: Box<dyn MotionPort>,
    mut req_rx: mpsc::Receiver<DispatchRequest>,
    halt: Arc<Notify>,
    config: MotionLinkConfig,
) {
    loop {
        tokio::select! {
            _ = halt.notified() => {
                if let Err(e) = port.write_frame(STOP_FRAME).await {
                    warn!(error = %e, "halt write failed");
                }
            }
            request = req_rx.recv() => {
                let Some(DispatchRequest { frame, reply }) = request else {
                    break;
                };
                let result = dispatch(&mut *port, &frame, &halt, config.ack_timeout).await;
                let _ = reply.send(result);
            }
        }
    }
    debug!("motion link task exiting");
}

async fn dispatch(
    port: &mut dyn MotionPort,
    frame: &str,
    halt: &Notify,
    ack_timeout: Duration,
) -> Result<(), LinkError> {
    debug!(%frame, "dispatching to motion controller");
    port.write_frame(frame).await?;

    let result = tokio::select! {
        _ = halt.notified() => Err(LinkError::Halted),
        ack = timeout(ack_timeout, wait_for_ack(&mut *port)) => match ack {
            Ok(outcome) => outcome,
            Err(_) => Err(LinkError::AckTimeout),
        },
    };

    if result == Err(LinkError::Halted) {
        if let Err(e) = port.write_frame(STOP_FRAME).await {
            warn!(error = %e, "halt write failed");
        }
    }
    result
}

async fn wait_for_ack(port: &mut dyn MotionPort) -> Result<(), LinkError> {
    loop {
        let token = port.read_token().await?;
        if token.trim().starts_with(ACK_PREFIX) {
            return Ok(());
        }
        warn!(%token, "ignored unknown token from motion controller");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    /// Channel-backed port: the test injects controller tokens and observes
    /// written frames.
    struct MockPort {
        frames: UnboundedSender<String>,
        tokens: UnboundedReceiver<String>,
    }

    fn mock_port() -> (MockPort, UnboundedReceiver<String>, UnboundedSender<String>) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (token_tx, token_rx) = mpsc::unbounded_channel();
        (
            MockPort {
                frames: frame_tx,
                tokens: token_rx,
            },
            frame_rx,
            token_tx,
        )
    }

    #[async_trait]
    impl MotionPort for MockPort {
        async fn write_frame(&mut self, frame: &str) -> Result<(), LinkError> {
            self.frames
                .send(frame.to_string())
                .map_err(|_| LinkError::Disconnected)
        }

        async fn read_token(&mut self) -> Result<String, LinkError> {
            self.tokens.recv().await.ok_or(LinkError::Disconnected)
        }
    }

    fn fast_config() -> MotionLinkConfig {
        MotionLinkConfig {
            ack_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn ack_resolves_dispatch() {
        let (port, mut frames, tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        let pending = handle.dispatch("FW10".to_string());
        assert_eq!(frames.recv().await.unwrap(), "FW10");
        tokens.send("ACK".to_string()).unwrap();

        assert_eq!(pending.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn unknown_tokens_are_ignored_until_ack() {
        let (port, mut frames, tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        let pending = handle.dispatch("RS00".to_string());
        assert_eq!(frames.recv().await.unwrap(), "RS00");
        tokens.send("gyro calibrating".to_string()).unwrap();
        tokens.send("ACK|RS00".to_string()).unwrap();

        assert_eq!(pending.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn missing_ack_times_out() {
        let (port, mut frames, _tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        let pending = handle.dispatch("FW01".to_string());
        assert_eq!(frames.recv().await.unwrap(), "FW01");

        assert_eq!(pending.await.unwrap(), Err(LinkError::AckTimeout));
    }

    #[tokio::test]
    async fn halt_cancels_wait_and_writes_stop() {
        let (port, mut frames, _tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        let pending = handle.dispatch("FW20".to_string());
        assert_eq!(frames.recv().await.unwrap(), "FW20");

        handle.halt();
        assert_eq!(pending.await.unwrap(), Err(LinkError::Halted));
        assert_eq!(frames.recv().await.unwrap(), "STOP");
    }

    #[tokio::test]
    async fn halt_while_idle_writes_stop() {
        let (port, mut frames, _tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        handle.halt();
        assert_eq!(frames.recv().await.unwrap(), "STOP");
    }

    #[tokio::test]
    async fn second_dispatch_while_outstanding_is_refused() {
        let (port, mut frames, tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        let first = handle.dispatch("FW10".to_string());
        assert_eq!(frames.recv().await.unwrap(), "FW10");
        // The link task is waiting on the first ack; the request slot is
        // occupied, so a second enqueue must be refused, not queued.
        let _second_held = handle.dispatch("FW20".to_string());
        let third = handle.dispatch("FW30".to_string());
        assert!(matches!(third.await.unwrap(), Err(LinkError::Io(_))));

        tokens.send("ACK".to_string()).unwrap();
        assert_eq!(first.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn port_disconnect_during_wait_surfaces() {
        let (port, mut frames, tokens) = mock_port();
        let handle = MotionLink::spawn(port, fast_config());

        let pending = handle.dispatch("OB01".to_string());
        assert_eq!(frames.recv().await.unwrap(), "OB01");
        drop(tokens);

        assert_eq!(pending.await.unwrap(), Err(LinkError::Disconnected));
    }
}
