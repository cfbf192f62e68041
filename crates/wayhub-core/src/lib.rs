//! `wayhub-core` – the hub's run engine.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: the run state
//!   machine. Sole owner of the command queue and robot pose; consumes one
//!   serialized [`HubEvent`][event::HubEvent] stream so no two transitions
//!   ever execute concurrently.
//! - [`event`] – the hub event vocabulary and the operator-link adapter.
//! - [`tracker`] – pure pose transition function for acknowledged motion
//!   commands.
//! - [`capture`] – [`CaptureWorker`][capture::CaptureWorker]: camera trigger
//!   plus classification upload with bounded retry.

pub mod capture;
pub mod dispatcher;
pub mod event;
pub mod tracker;

pub use capture::{CaptureError, CaptureWorker};
pub use dispatcher::{Dispatcher, DispatcherConfig, RecoveryPolicy, RunState};
pub use event::{forward_operator_events, HubEvent};
