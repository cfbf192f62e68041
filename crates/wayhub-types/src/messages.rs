//! Canonical operator-facing message strings.
//!
//! Every info/error envelope the hub emits draws from this catalogue so the
//! operator app can match on stable text. The envelope grammar itself is
//! documented on [`crate::envelope::Envelope`].

pub const CONNECTED: &str = "You are connected to the hub!";
pub const RECONNECTED: &str = "You are reconnected!";
pub const ROBOT_READY: &str = "Robot is ready!";

pub const MALFORMED_MESSAGE: &str = "Invalid message received.";
pub const MALFORMED_LAYOUT: &str = "Invalid obstacle layout received.";
pub const LAYOUT_DURING_RUN: &str = "Robot is running, obstacles cannot be changed.";

pub const EMPTY_QUEUE: &str = "Command queue is empty, did you set obstacles?";
pub const ALREADY_RUNNING: &str = "Robot is already running.";
pub const PATH_READY: &str = "Commands and path received from Algo API. Robot is ready to move.";
pub const PATH_FAILED: &str = "Something went wrong when requesting path from Algo API.";

pub const QUEUE_FINISHED: &str = "Commands queue finished.";
pub const STOPPED: &str = "Robot stopped.";
pub const ACK_TIMEOUT: &str = "Motion controller did not acknowledge in time.";
pub const MOTION_LOST: &str = "Motion controller link lost.";

pub const CAPTURE_FAILED: &str = "Something went wrong when capturing the image.";
pub const IMAGE_UNRECOGNIZED: &str = "Image recognition failed, no symbol detected.";
pub const IMAGE_REC_FAILED: &str = "Something went wrong when requesting from image-rec API.";

pub const STITCH_DONE: &str = "Images stitched!";
pub const STITCH_FAILED: &str = "Something went wrong when requesting stitch from the API.";
