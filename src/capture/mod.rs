pub mod frame;
pub mod hardware;
pub mod mock;
pub mod negotiate;
pub mod v4l2;

pub use frame::{FrameBuffer, FrameMetadata, FrameView, PixelFormat};
pub use hardware::{BufferQueue, CameraHardware, CameraInfo, CameraProvider, FrameCallback};
pub use mock::MockCamera;
pub use negotiate::{Capabilities, FocusMode, FpsRange, PreviewConfiguration, Size};
pub use v4l2::V4l2Camera;
