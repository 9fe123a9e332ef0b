//! Render surface and display hints supplied by the UI side

use super::orientation::Rotation;

/// Target surface the hardware renders the preview into.
///
/// Implemented by the UI collaborator. The session only asks it to lock
/// its buffer size to the negotiated resolution before attaching it.
pub trait DisplaySurface: Send + Sync {
    fn set_fixed_size(&self, width: u32, height: u32);

    /// Human readable label for logs.
    fn name(&self) -> &str {
        "surface"
    }
}

/// Screen state at the moment preview starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayHint {
    /// Current device rotation.
    pub rotation: Rotation,
    /// Display width in pixels, in the device's current orientation.
    pub width: u32,
    /// Display height in pixels, in the device's current orientation.
    pub height: u32,
}

impl DisplayHint {
    pub fn new(rotation: Rotation, width: u32, height: u32) -> Self {
        Self {
            rotation,
            width,
            height,
        }
    }

    /// Portrait 1080x1920 at natural orientation.
    pub fn portrait_fhd() -> Self {
        Self::new(Rotation::Deg0, 1080, 1920)
    }
}

/// Surface that draws nothing, for headless capture.
#[derive(Debug, Default)]
pub struct NullSurface;

impl DisplaySurface for NullSurface {
    fn set_fixed_size(&self, _width: u32, _height: u32) {}

    fn name(&self) -> &str {
        "null"
    }
}
