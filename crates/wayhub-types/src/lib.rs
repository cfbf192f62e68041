//! `wayhub-types` – shared domain types for the WayHub orchestration stack.
//!
//! Everything that crosses a crate boundary lives here: the operator-link
//! envelope ([`Envelope`]), the motion opcode vocabulary ([`Opcode`]) with its
//! fixed-width wire codec, robot pose and heading ([`RobotPose`],
//! [`Direction`]), obstacle layouts, and the link-level error type
//! ([`LinkError`]).
//!
//! Wire formats are isolated behind explicit encode/decode pairs so the rest
//! of the stack only ever handles closed enums, never raw strings.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod envelope;
pub mod messages;
pub mod opcode;
pub mod pose;

pub use envelope::{Envelope, ImageRecResult, ObstacleLayout, RunStatus};
pub use opcode::{Opcode, OpcodeError};
pub use pose::{Direction, RobotPose};

/// A single obstacle in the operator's declared layout.
///
/// `d` is the face the target symbol is mounted on, using the same wire
/// encoding as robot headings (0/2/4/6 for N/E/S/W).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: u8,
    pub x: i32,
    pub y: i32,
    pub d: Direction,
}

/// Where a queued command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Returned by the planning service as part of a path response.
    Planner,
    /// Injected by the hub itself (e.g. an out-of-band `STOP`).
    Hub,
}

/// One entry of the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub origin: Origin,
}

impl Command {
    pub fn planned(opcode: Opcode) -> Self {
        Self {
            opcode,
            origin: Origin::Planner,
        }
    }
}

/// A planning-service response: the ordered command queue plus the pose path
/// the planner expects the robot to trace.
///
/// The queue is consumed strictly front-to-back and never reordered; the
/// path is informational (the location tracker stays authoritative).
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub commands: VecDeque<Command>,
    pub path: Vec<RobotPose>,
}

/// Errors surfaced by the operator and motion links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The underlying connection is down; the owning link is reconnecting in
    /// the background.
    #[error("link disconnected")]
    Disconnected,

    /// No acknowledgement arrived within the configured window.
    #[error("acknowledgement timed out")]
    AckTimeout,

    /// The outstanding dispatch was cancelled by an out-of-band halt.
    #[error("dispatch halted")]
    Halted,

    /// Transport-level failure.
    #[error("link I/O error: {0}")]
    Io(String),
}
