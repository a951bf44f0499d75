//! Error types shared by the hardware layer and the detector core

use thiserror::Error;

/// Failures reported by a tuner backend
#[derive(Debug, Error)]
pub enum TunerError {
    #[error("no RTL-SDR device at index {0}")]
    NoDevice(u32),

    #[error("device is not open")]
    NotOpen,

    #[error("invalid {name}: {value}")]
    InvalidArgument { name: &'static str, value: i64 },

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the detector to the host
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to open rtlsdr device index {index}")]
    DeviceUnavailable {
        index: u32,
        #[source]
        source: TunerError,
    },

    #[error("device is not connected")]
    NotConnected,

    #[error("a capture is already in progress")]
    CaptureInProgress,

    #[error("capture duration {0}s is outside 0.1..=10s")]
    InvalidDuration(f64),

    /// Hardware refused or quantised one or more settings. The readback
    /// values are already reported; capture may proceed with them.
    #[error("hardware adjusted requested parameters: {}", adjusted.join(", "))]
    ParameterRejected { adjusted: Vec<&'static str> },

    #[error("stream ended after {received} of {expected} bytes")]
    IncompleteCapture { received: usize, expected: usize },

    #[error("chunk of {attempted} bytes would overrun the {capacity} byte sample buffer")]
    BufferOverrun { capacity: usize, attempted: usize },

    #[error(transparent)]
    Tuner(#[from] TunerError),
}
