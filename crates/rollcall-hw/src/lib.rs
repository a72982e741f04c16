//! rollcall-hw — webcam capture.
//!
//! V4L2 access behind the [`FrameSource`]/[`VideoTrack`] seam, plus the
//! pixel-format conversions that reduce every frame to grayscale.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat, V4lSource, VideoTrack};
pub use frame::Frame;
