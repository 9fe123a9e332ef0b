//! Process-wide exclusive claim on the camera

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{CameraError, Result};

static CAMERA_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Proof that the caller is the only user of the camera in this process.
///
/// Released when dropped, on every exit path.
#[derive(Debug)]
pub struct CameraClaim {
    _private: (),
}

impl CameraClaim {
    pub fn acquire() -> Result<Self> {
        CAMERA_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CameraError::DeviceUnavailable("camera already claimed".into()))?;
        debug!("Camera claim acquired");
        Ok(Self { _private: () })
    }

    /// Whether any claim is currently outstanding.
    pub fn is_held() -> bool {
        CAMERA_CLAIMED.load(Ordering::Acquire)
    }
}

impl Drop for CameraClaim {
    fn drop(&mut self) {
        CAMERA_CLAIMED.store(false, Ordering::Release);
        debug!("Camera claim released");
    }
}
