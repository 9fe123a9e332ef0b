pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{CameraHardware, CameraProvider, FrameView, PreviewConfiguration};
pub use display::{DisplayHint, DisplaySurface, Facing, Rotation};
pub use error::{CameraError, Result};
pub use session::{CameraSession, FrameConsumer, SessionObserver, SessionState};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variable prefix for overrides, e.g. `CAMPREVIEW__CAPTURE__BUFFER_SLOTS=2`.
pub const ENV_PREFIX: &str = "CAMPREVIEW";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 node; empty means auto-detect.
    pub device: String,
    /// Use the simulated camera instead of real hardware.
    pub use_mock: bool,
    /// Preview buffers kept in rotation.
    pub buffer_slots: usize,
    /// Resolution used when no supported size matches the display.
    pub fallback_width: u32,
    pub fallback_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Device rotation in degrees: 0, 90, 180 or 270.
    pub rotation: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long the demo binary previews before stopping; 0 runs until Ctrl-C.
    pub run_seconds: u64,
    pub log_filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            use_mock: false,
            buffer_slots: 1,
            fallback_width: 1280,
            fallback_height: 720,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            rotation: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_seconds: 5,
            log_filter: "campreview=debug".into(),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the TOML file at `path` if given, then by
    /// `CAMPREVIEW__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Display hint for the configured screen.
    pub fn display_hint(&self) -> DisplayHint {
        DisplayHint::new(
            Rotation::from_degrees(self.display.rotation),
            self.display.width,
            self.display.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_fallback_resolution() {
        let config = Config::default();
        assert_eq!(config.capture.fallback_width, 1280);
        assert_eq!(config.capture.fallback_height, 720);
        assert_eq!(config.capture.buffer_slots, 1);
        assert_eq!(config.display_hint(), DisplayHint::portrait_fhd());
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let path = std::env::temp_dir().join(format!("campreview-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).expect("create temp config");
        writeln!(file, "[capture]\nuse_mock = true\nbuffer_slots = 3\n\n[display]\nrotation = 90")
            .expect("write temp config");

        let config = Config::load(Some(&path)).expect("config loads");
        std::fs::remove_file(&path).ok();

        assert!(config.capture.use_mock);
        assert_eq!(config.capture.buffer_slots, 3);
        assert_eq!(config.display.rotation, 90);
        assert_eq!(config.display.width, 1080);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/campreview.toml"))).expect("defaults");
        assert_eq!(config.capture, CaptureConfig::default());
    }
}
