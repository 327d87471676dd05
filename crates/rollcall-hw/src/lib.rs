//! rollcall-hw — Hardware abstraction for classroom camera capture.
//!
//! Provides V4L2-based camera access, conversion of the negotiated pixel
//! format to RGB, and the [`FrameSource`] seam the capture loop reads from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSession, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
