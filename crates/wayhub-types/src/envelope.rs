//! Operator-link envelope: the `{"cat": ..., "value": ...}` wrapper.
//!
//! Modelled as a closed tagged union so category and payload shape are
//! checked together at the boundary. Unknown categories or mismatched
//! payloads fail deserialization; the operator link answers those with a
//! local `error` envelope rather than forwarding a fault into the
//! dispatcher.

use serde::{Deserialize, Serialize};

use crate::pose::RobotPose;
use crate::Obstacle;

/// One operator-link message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cat", content = "value", rename_all = "kebab-case")]
pub enum Envelope {
    /// General progress notification (outbound).
    Info(String),
    /// Error notification (outbound).
    Error(String),
    /// Current robot pose (outbound).
    Location(RobotPose),
    /// Image recognition result (outbound).
    ImageRec(ImageRecResult),
    /// Run status change (outbound).
    Status(RunStatus),
    /// Obstacle layout submission (inbound).
    Obstacle(ObstacleLayout),
    /// Control verb (inbound); recognised values are `"start"` and `"stop"`.
    Control(String),
}

/// Payload of an `obstacle` envelope: the full layout, replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleLayout {
    pub obstacles: Vec<Obstacle>,
    pub mode: String,
}

/// Payload of an `image-rec` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecResult {
    pub image_id: String,
    pub obstacle_id: String,
}

/// Payload of a `status` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
}

impl Envelope {
    pub fn info(message: impl Into<String>) -> Self {
        Envelope::Info(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error(message.into())
    }
}
