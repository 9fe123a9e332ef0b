//! Error types for camera session operations

use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum CameraError {
    /// No camera present, or the camera is already claimed by another session.
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Attaching the render surface failed.
    #[error("failed to bind display surface: {0}")]
    SurfaceBinding(String),

    /// Hardware completed a frame without data.
    #[error("hardware delivered an empty frame")]
    EmptyFrame,

    #[error("operation `{operation}` not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("camera hardware error: {0}")]
    Hardware(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, CameraError>;
