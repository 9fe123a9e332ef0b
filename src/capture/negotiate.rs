//! Preview parameter negotiation
//!
//! Picks one preview configuration out of what the hardware reports,
//! given the size of the display the preview will be shown on.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::frame::PixelFormat;
use crate::display::{DisplayHint, Rotation};

/// Resolution used when no supported size matches the display.
pub const FALLBACK_SIZE: Size = Size::new(1280, 720);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Exact aspect comparison of `self` against `width:height`.
    fn same_aspect(&self, width: u32, height: u32) -> bool {
        u64::from(self.width) * u64::from(height) == u64::from(width) * u64::from(self.height)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame-rate bounds in thousandths of a frame per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Whole frames per second at the upper bound, truncated.
    pub fn max_fps(&self) -> u32 {
        self.max / 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    ContinuousVideo,
    ContinuousPicture,
    Auto,
    Macro,
    Infinity,
    Fixed,
}

impl FocusMode {
    /// Modes the negotiator will select, most preferred first.
    pub const PREFERENCE: [FocusMode; 3] = [
        FocusMode::ContinuousVideo,
        FocusMode::ContinuousPicture,
        FocusMode::Auto,
    ];
}

/// Everything the hardware reports it can do for preview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub preview_sizes: Vec<Size>,
    pub fps_ranges: Vec<FpsRange>,
    pub pixel_formats: Vec<PixelFormat>,
    pub focus_modes: Vec<FocusMode>,
}

/// Negotiated preview parameters. Fixed for the lifetime of one preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewConfiguration {
    pub size: Size,
    pub format: PixelFormat,
    /// `None` when the hardware reported no ranges; its default is kept.
    pub fps_range: Option<FpsRange>,
    /// `None` leaves the hardware's default focus mode in place.
    pub focus_mode: Option<FocusMode>,
    /// Degrees clockwise: 0, 90, 180 or 270.
    pub rotation: u32,
}

impl PreviewConfiguration {
    /// Frame rate reported to observers.
    pub fn frame_rate(&self) -> u32 {
        self.fps_range.map_or(0, |range| range.max_fps())
    }

    /// Size in bytes of one frame at this configuration.
    pub fn frame_size(&self) -> usize {
        let pixels = self.size.width as usize * self.size.height as usize;
        self.format.frame_size(self.size.width, self.size.height).unwrap_or(pixels * 3 / 2)
    }

    pub fn rotation(&self) -> Rotation {
        Rotation::from_degrees(self.rotation)
    }
}

/// Smallest supported size that covers the display and has exactly its aspect.
///
/// Sensors are landscape, so the display is compared cross-wise: the size's
/// width against the display height and its height against the display width.
/// A display with a zero dimension has no aspect and matches nothing.
pub fn select_size(supported: &[Size], display_width: u32, display_height: u32) -> Option<Size> {
    if display_width == 0 || display_height == 0 {
        return None;
    }

    let mut sizes = supported.to_vec();
    sizes.sort_by_key(|size| size.width);

    sizes.into_iter().find(|size| {
        size.height > 0
            && size.width >= display_height
            && size.height >= display_width
            && size.same_aspect(display_height, display_width)
    })
}

/// Range with the highest max, higher min breaking ties.
///
/// Not a running "both bounds at least as high" scan: that can settle on a
/// lower max when mins decrease along the list.
pub fn select_fps_range(supported: &[FpsRange]) -> Option<FpsRange> {
    supported
        .iter()
        .copied()
        .max_by_key(|range| (range.max, range.min))
}

pub fn select_focus_mode(supported: &[FocusMode]) -> Option<FocusMode> {
    FocusMode::PREFERENCE
        .into_iter()
        .find(|mode| supported.contains(mode))
}

/// Pick a full preview configuration.
pub fn negotiate(
    caps: &Capabilities,
    hint: &DisplayHint,
    rotation: u32,
    fallback: Size,
) -> PreviewConfiguration {
    let size = match select_size(&caps.preview_sizes, hint.width, hint.height) {
        Some(size) => size,
        None => {
            debug!(
                "No preview size matches display {}x{}, using {}",
                hint.width, hint.height, fallback
            );
            fallback
        }
    };

    if !caps.pixel_formats.is_empty() && !caps.pixel_formats.contains(&PixelFormat::PREVIEW) {
        warn!(
            "Hardware does not list {:?}, requesting it anyway",
            PixelFormat::PREVIEW
        );
    }

    PreviewConfiguration {
        size,
        format: PixelFormat::PREVIEW,
        fps_range: select_fps_range(&caps.fps_ranges),
        focus_mode: select_focus_mode(&caps.focus_modes),
        rotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(list: &[(u32, u32)]) -> Vec<Size> {
        list.iter().map(|&(w, h)| Size::new(w, h)).collect()
    }

    #[test]
    fn portrait_display_picks_matching_landscape_size() {
        let supported = sizes(&[(640, 480), (1920, 1080)]);
        assert_eq!(select_size(&supported, 1080, 1920), Some(Size::new(1920, 1080)));
    }

    #[test]
    fn no_exact_aspect_falls_back() {
        let supported = sizes(&[(640, 480), (1920, 1080)]);
        assert_eq!(select_size(&supported, 1080, 2340), None);

        let caps = Capabilities {
            preview_sizes: supported,
            ..Default::default()
        };
        let hint = DisplayHint::new(Rotation::Deg0, 1080, 2340);
        let config = negotiate(&caps, &hint, 90, FALLBACK_SIZE);
        assert_eq!(config.size, Size::new(1280, 720));
    }

    #[test]
    fn zero_sized_display_falls_back() {
        let supported = sizes(&[(640, 480), (1920, 1080)]);
        assert_eq!(select_size(&supported, 0, 0), None);
        assert_eq!(select_size(&supported, 1080, 0), None);
        assert_eq!(select_size(&sizes(&[(0, 0), (1920, 1080)]), 1080, 1920), Some(Size::new(1920, 1080)));

        let caps = Capabilities {
            preview_sizes: supported,
            ..Default::default()
        };
        let config = negotiate(&caps, &DisplayHint::new(Rotation::Deg0, 0, 0), 0, FALLBACK_SIZE);
        assert_eq!(config.size, FALLBACK_SIZE);
    }

    #[test]
    fn smallest_adequate_size_wins_regardless_of_input_order() {
        let supported = sizes(&[(3840, 2160), (1280, 720), (1920, 1080), (2560, 1440)]);
        assert_eq!(select_size(&supported, 720, 1280), Some(Size::new(1280, 720)));
        assert_eq!(select_size(&supported, 1080, 1920), Some(Size::new(1920, 1080)));
        assert_eq!(select_size(&supported, 1440, 2560), Some(Size::new(2560, 1440)));
    }

    #[test]
    fn size_too_small_is_skipped_even_with_matching_aspect() {
        let supported = sizes(&[(1280, 720)]);
        assert_eq!(select_size(&supported, 1080, 1920), None);
    }

    #[test]
    fn never_picks_mismatched_aspect_when_exact_exists() {
        let supported = sizes(&[(1440, 1080), (2000, 1080), (1920, 1080), (2400, 1350)]);
        let picked = select_size(&supported, 1080, 1920).expect("exact match exists");
        assert!(picked.same_aspect(1920, 1080));
        assert_eq!(picked, Size::new(1920, 1080));
    }

    #[test]
    fn highest_max_fps_wins() {
        let ranges = [
            FpsRange::new(15_000, 30_000),
            FpsRange::new(7_000, 60_000),
            FpsRange::new(30_000, 30_000),
        ];
        let picked = select_fps_range(&ranges).expect("non-empty");
        assert_eq!(picked, FpsRange::new(7_000, 60_000));
        assert!(ranges.iter().all(|r| picked.max >= r.max));
        assert_eq!(picked.max_fps(), 60);
    }

    #[test]
    fn fps_tie_broken_by_min() {
        let ranges = [
            FpsRange::new(15_000, 30_000),
            FpsRange::new(30_000, 30_000),
            FpsRange::new(10_000, 30_000),
        ];
        assert_eq!(select_fps_range(&ranges), Some(FpsRange::new(30_000, 30_000)));
        assert_eq!(select_fps_range(&[]), None);
    }

    #[test]
    fn fps_is_truncated() {
        assert_eq!(FpsRange::new(0, 29_970).max_fps(), 29);
    }

    #[test]
    fn focus_preference_order() {
        use FocusMode::*;
        assert_eq!(select_focus_mode(&[Auto, ContinuousPicture, ContinuousVideo]), Some(ContinuousVideo));
        assert_eq!(select_focus_mode(&[Macro, Auto, ContinuousPicture]), Some(ContinuousPicture));
        assert_eq!(select_focus_mode(&[Fixed, Auto]), Some(Auto));
        assert_eq!(select_focus_mode(&[Fixed, Infinity]), None);
    }

    #[test]
    fn negotiation_without_fps_ranges_reports_zero() {
        let caps = Capabilities {
            preview_sizes: sizes(&[(1920, 1080)]),
            pixel_formats: vec![PixelFormat::Nv21],
            ..Default::default()
        };
        let config = negotiate(&caps, &DisplayHint::portrait_fhd(), 90, FALLBACK_SIZE);
        assert_eq!(config.fps_range, None);
        assert_eq!(config.frame_rate(), 0);
        assert_eq!(config.focus_mode, None);
        assert_eq!(config.format, PixelFormat::Nv21);
        assert_eq!(config.frame_size(), 1920 * 1080 * 3 / 2);
        assert_eq!(config.rotation(), Rotation::Deg90);
    }
}
