//! `wayhub-planner` – client for the remote path-planning and image
//! recognition service.
//!
//! The hub consumes the service through the [`Planner`] trait; the
//! production implementation is [`HttpPlanner`]. All failure modes
//! (unreachable service, non-2xx status, malformed body) collapse into
//! [`ApiError`]; the client never retries on its own, the dispatcher
//! decides whether a failure is surfaced or retried.

use async_trait::async_trait;
use thiserror::Error;
use wayhub_types::{ImageRecResult, Obstacle, Plan};

pub mod http;

pub use http::HttpPlanner;

/// Uniform failure type for all planning-service calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("planning service unreachable: {0}")]
    Unavailable(String),
    #[error("planning service returned status {0}")]
    Status(u16),
    #[error("malformed planning response: {0}")]
    Malformed(String),
}

/// The planning service, seen from the hub.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Request an ordered command queue and expected pose path for the
    /// given obstacle layout.
    async fn request_path(&self, obstacles: &[Obstacle], mode: &str) -> Result<Plan, ApiError>;

    /// Upload a captured frame for classification.
    async fn classify(&self, obstacle_id: u8, frame: Vec<u8>)
        -> Result<ImageRecResult, ApiError>;

    /// Request a composite of the images captured during a run.
    async fn request_stitch(&self, image_ids: &[String]) -> Result<Vec<u8>, ApiError>;

    /// Cheap liveness probe, used at startup.
    async fn check_alive(&self) -> bool;
}
