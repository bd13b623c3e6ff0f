//! Error types shared by all capturers.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// Capture source not found.
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),

    /// The configuration does not describe a capturable target.
    #[error("Invalid capture configuration: {0}")]
    InvalidConfig(String),

    /// The native audio format cannot be normalized.
    #[error("Audio format not supported: {0}")]
    UnsupportedFormat(String),

    /// Start was called before a successful initialize.
    #[error("Capture session not initialized")]
    NotInitialized,

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Frame conversion error.
    #[error("Frame conversion error: {0}")]
    FrameConversion(String),

    /// Device lost during capture.
    #[error("Capture device lost")]
    DeviceLost,

    /// The OS capture facility is unavailable on this system.
    #[error("Capture not supported on this system")]
    NotSupported,

    /// The capture worker thread could not be spawned.
    #[error("Failed to spawn capture thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl CaptureError {
    /// Build a Windows API error that carries only a message.
    pub fn api(message: impl Into<String>) -> Self {
        Self::WindowsApi {
            message: message.into(),
            #[cfg(windows)]
            source: None,
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
