//! Operator link: WebSocket server owning the connection to the operator
//! application.
//!
//! One operator client is served at a time. Each accepted connection emits a
//! [`OperatorEvent::Connected`] pseudo-event upstream (with `reconnect` set
//! after the first session), then a select loop forwards outbound envelopes
//! and decodes inbound frames. Malformed or out-of-place inbound traffic is
//! answered with a local `error` envelope and never reaches the dispatcher.
//! When the client drops, the link silently returns to accepting.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};
use wayhub_types::{messages, Envelope, LinkError};

/// Link-level events forwarded to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorEvent {
    /// A decoded inbound envelope (`obstacle` or `control`).
    Message(Envelope),
    /// The operator (re-)established the connection.
    Connected { reconnect: bool },
}

/// Outbound side of the operator link.
#[derive(Clone)]
pub struct OperatorHandle {
    out_tx: mpsc::Sender<Envelope>,
}

impl OperatorHandle {
    /// Queue an envelope for the operator. Delivery is best-effort across
    /// reconnects; the error only fires once the link task itself is gone.
    pub async fn send(&self, envelope: Envelope) -> Result<(), LinkError> {
        self.out_tx
            .send(envelope)
            .await
            .map_err(|_| LinkError::Disconnected)
    }

    /// A detached handle whose outbound traffic lands on the returned
    /// receiver instead of a socket. Used by embedding code and tests.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (Self { out_tx }, out_rx)
    }
}

/// Spawns the operator link server.
pub struct OperatorLink;

impl OperatorLink {
    /// Bind `addr` and start accepting operator connections. Inbound
    /// traffic flows into `inbound`; the returned handle queues outbound
    /// envelopes.
    pub async fn bind(
        addr: &str,
        inbound: mpsc::Sender<OperatorEvent>,
    ) -> Result<OperatorHandle, LinkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LinkError::Io(format!("operator bind on {addr}: {e}")))?;
        info!(%addr, "operator link listening");

        let (out_tx, out_rx) = mpsc::channel(64);
        tokio::spawn(accept_loop(listener, out_rx, inbound));
        Ok(OperatorHandle { out_tx })
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut out_rx: mpsc::Receiver<Envelope>,
    inbound: mpsc::Sender<OperatorEvent>,
) {
    let mut sessions: u64 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "operator accept error");
                continue;
            }
        };
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%peer, error = %e, "operator handshake failed");
                continue;
            }
        };

        info!(%peer, "operator connected");
        sessions += 1;
        if inbound
            .send(OperatorEvent::Connected {
                reconnect: sessions > 1,
            })
            .await
            .is_err()
        {
            return;
        }

        serve(ws, &mut out_rx, &inbound).await;
        warn!(%peer, "operator link dropped, awaiting reconnection");
    }
}

async fn serve(
    ws: WebSocketStream<TcpStream>,
    out_rx: &mut mpsc::Receiver<Envelope>,
    inbound: &mpsc::Sender<OperatorEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                // The hub side closed; tear the whole link down.
                let Some(envelope) = outbound else { return };
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "unencodable envelope dropped");
                        continue;
                    }
                };
                debug!(%json, "to operator");
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_inbound(text.as_str(), &mut ws_tx).await {
                            if inbound.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Pings are answered by tungstenite; binary is not part
                    // of the protocol.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Total, rejecting decoder for one inbound frame.
///
/// Returns the event to forward, or `None` after answering the client with
/// a local `error` envelope.
async fn decode_inbound(
    text: &str,
    ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
) -> Option<OperatorEvent> {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope @ (Envelope::Obstacle(_) | Envelope::Control(_))) => {
            debug!(?envelope, "from operator");
            Some(OperatorEvent::Message(envelope))
        }
        Ok(other) => {
            warn!(?other, "inbound envelope with outbound category rejected");
            reply_error(ws_tx).await;
            None
        }
        Err(e) => {
            warn!(error = %e, raw = %text, "malformed operator message rejected");
            reply_error(ws_tx).await;
            None
        }
    }
}

async fn reply_error(ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>) {
    let reply = Envelope::error(messages::MALFORMED_MESSAGE);
    if let Ok(json) = serde_json::to_string(&reply) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }
}
