//! Hub event vocabulary.
//!
//! Every producer (the operator link, motion link completions, planner
//! responses, capture results, the shutdown signal) funnels into one
//! `mpsc` channel of [`HubEvent`]; the dispatcher task is the single
//! consumer, so its state transitions are serialized by construction.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wayhub_link::OperatorEvent;
use wayhub_planner::ApiError;
use wayhub_types::{Envelope, ImageRecResult, LinkError, Plan};

use crate::capture::CaptureError;

#[derive(Debug)]
pub enum HubEvent {
    /// Decoded inbound operator envelope.
    Operator(Envelope),
    /// The operator (re-)established the wireless link.
    OperatorConnected { reconnect: bool },
    /// Path request completed.
    PlanReady(Result<Plan, ApiError>),
    /// Outcome of the in-flight motion frame.
    MotionResult(Result<(), LinkError>),
    /// Outcome of the in-flight SNAP step.
    CaptureDone(Result<ImageRecResult, CaptureError>),
    /// Stitch request completed.
    StitchDone(Result<(), ApiError>),
    /// Process is shutting down.
    Shutdown,
}

/// Adapt the operator link's event stream onto the hub event channel.
pub fn forward_operator_events(
    mut operator_rx: mpsc::Receiver<OperatorEvent>,
    events: mpsc::Sender<HubEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = operator_rx.recv().await {
            let mapped = match event {
                OperatorEvent::Message(envelope) => HubEvent::Operator(envelope),
                OperatorEvent::Connected { reconnect } => {
                    HubEvent::OperatorConnected { reconnect }
                }
            };
            if events.send(mapped).await.is_err() {
                break;
            }
        }
    })
}
