//! Camera capture for the sorting pipeline.
//!
//! One background thread owns the device and feeds BGR frames over a
//! single-slot channel, so a slow consumer backpressures capture instead of
//! growing a queue.

pub use camera::spawn_camera_reader;
pub use types::{CaptureError, Frame, FrameFormat};

mod camera;
mod types;
