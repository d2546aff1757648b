//! rollcall-hw — V4L2 camera capture for enrollment and recognition photos.

pub mod camera;
pub mod frame;

pub use camera::{capture_photo, save_capture, Camera, CameraError, DeviceInfo, PixelFormat, CAPTURE_FILE_NAME};
pub use frame::{Frame, FrameError};
