//! Generic `Camera` trait for still-image capture hardware.

use thiserror::Error;

/// An encoded still frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Encoded image bytes (JPEG for real drivers).
    pub data: Vec<u8>,
}

/// Capture failure reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera fault: {0}")]
    Fault(String),
    #[error("camera busy")]
    Busy,
}

/// A still camera.
///
/// Drivers implement this trait; the capture worker holds one behind a
/// `Box<dyn Camera>` and never learns which driver it is.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front_still"`.
    fn id(&self) -> &str;

    /// Trigger a capture and return the encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::Fault`] if the device cannot produce a frame
    /// (disconnected, exposure failure, encoder fault).
    fn capture(&mut self) -> Result<CameraFrame, CameraError>;
}
