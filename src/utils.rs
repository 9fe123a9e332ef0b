use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::error::{CameraError, Result};

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect best capture device
///
/// First capture node that offers the preview format natively.
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    let preview = FourCC::new(&PixelFormat::PREVIEW.fourcc());

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            debug!("{} is not a capture node", path);
            continue;
        }

        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        if formats.iter().any(|fmt| fmt.fourcc == preview) {
            info!("Found {:?} device: {} - {}", PixelFormat::PREVIEW, path, caps.card);
            return Ok(FoundDevice::new(path, PixelFormat::PREVIEW));
        }
        debug!("{} doesn't offer {}", path, preview);
    }

    Err(CameraError::DeviceUnavailable(format!(
        "no capture device offers {}",
        preview
    )))
}
