// src/error.rs

use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Failures that can stop the monitor from starting or capturing.
///
/// Implausible measurements are not errors: the speed engine reports them
/// as [`crate::speed::MeasurementAnomaly`] and carries on.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Camera init or capture failure. Fatal at start, retried in-loop.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Missing or malformed transform / geometry input. Fatal at startup.
    #[error("calibration error: {0}")]
    Calibration(String),

    /// Frame whose buffer does not match its stated dimensions.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// OpenCV call that failed inside the motion detector.
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    Vision(#[from] opencv::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MonitorError {
    pub fn hardware(message: impl Into<String>) -> Self {
        Self::Hardware(message.into())
    }

    pub fn calibration(message: impl Into<String>) -> Self {
        Self::Calibration(message.into())
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
