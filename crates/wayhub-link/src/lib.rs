//! `wayhub-link` – the two connection-owning components of the hub.
//!
//! Each link owns its connection state exclusively and hides transport
//! failures behind background reconnection:
//!
//! - [`operator`] – WebSocket server for the operator application. Inbound
//!   frames pass through a total, rejecting codec; outbound envelopes are
//!   queued across reconnects.
//! - [`motion`] – single-flight opcode dispatch to the motion controller
//!   with acknowledgement gating, a per-command timeout, and an out-of-band
//!   halt path.
//! - [`serial`] – UART-backed [`MotionPort`] bridging a blocking reader
//!   thread into the async side.
//! - [`loopback`] – auto-acknowledging [`MotionPort`] so the full stack runs
//!   without hardware.

pub mod loopback;
pub mod motion;
pub mod operator;
pub mod serial;

pub use loopback::LoopbackPort;
pub use motion::{MotionHandle, MotionLink, MotionLinkConfig, MotionPort};
pub use operator::{OperatorEvent, OperatorHandle, OperatorLink};
pub use serial::SerialMotionPort;
