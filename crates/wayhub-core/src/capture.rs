//! Capture worker: camera trigger plus classification upload.
//!
//! Runs one SNAP step at a time (the dispatcher's single-flight discipline
//! covers captures too). When the recognition service answers `"NA"`
//! (frame received, nothing recognised) the worker recaptures up to a
//! configured attempt bound before giving up, mirroring field behavior
//! where the first exposure often misses.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};
use wayhub_hal::{Camera, CameraError};
use wayhub_planner::{ApiError, Planner};
use wayhub_types::ImageRecResult;

/// Marker the recognition service returns when no symbol was found.
const NO_RESULT: &str = "NA";

/// A failed SNAP step. Never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera failure: {0}")]
    Camera(#[from] CameraError),
    #[error("classification failure: {0}")]
    Api(#[from] ApiError),
    #[error("no symbol recognised after {attempts} attempts")]
    Unrecognized { attempts: u32 },
}

pub struct CaptureWorker {
    camera: Mutex<Box<dyn Camera>>,
    planner: Arc<dyn Planner>,
    attempts: u32,
}

impl CaptureWorker {
    pub fn new(camera: Box<dyn Camera>, planner: Arc<dyn Planner>, attempts: u32) -> Self {
        Self {
            camera: Mutex::new(camera),
            planner,
            attempts: attempts.max(1),
        }
    }

    /// Capture a frame at the current pose and submit it for
    /// classification against `obstacle_id`.
    pub async fn capture(&self, obstacle_id: u8) -> Result<ImageRecResult, CaptureError> {
        for attempt in 1..=self.attempts {
            let frame = {
                let Ok(mut camera) = self.camera.lock() else {
                    return Err(CaptureError::Camera(CameraError::Busy));
                };
                camera.capture()?
            };

            let result = self.planner.classify(obstacle_id, frame.data).await?;
            if result.image_id != NO_RESULT {
                info!(obstacle_id, image_id = %result.image_id, attempt, "image recognised");
                return Ok(result);
            }
            warn!(obstacle_id, attempt, "nothing recognised, recapturing");
        }
        Err(CaptureError::Unrecognized {
            attempts: self.attempts,
        })
    }
}
