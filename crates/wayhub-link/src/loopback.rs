//! Auto-acknowledging motion port for headless runs.
//!
//! Stands in for the serial transport when no controller hardware is
//! attached: every written frame is answered with an `ACK` token after a
//! configurable delay, so the full dispatch/gate/notify cycle runs end to
//! end.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use wayhub_types::LinkError;

pub struct LoopbackPort {
    token_tx: mpsc::UnboundedSender<String>,
    token_rx: mpsc::UnboundedReceiver<String>,
    ack_delay: Duration,
}

impl LoopbackPort {
    pub fn new(ack_delay: Duration) -> Self {
        let (token_tx, token_rx) = mpsc::unbounded_channel();
        Self {
            token_tx,
            token_rx,
            ack_delay,
        }
    }
}

impl Default for LoopbackPort {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}

#[async_trait]
impl crate::motion::MotionPort for LoopbackPort {
    async fn write_frame(&mut self, frame: &str) -> Result<(), LinkError> {
        debug!(%frame, "loopback frame");
        let tx = self.token_tx.clone();
        let delay = self.ack_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send("ACK".to_string());
        });
        Ok(())
    }

    async fn read_token(&mut self) -> Result<String, LinkError> {
        self.token_rx.recv().await.ok_or(LinkError::Disconnected)
    }
}
