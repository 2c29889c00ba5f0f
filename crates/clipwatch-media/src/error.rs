//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while resolving, capturing, analyzing or encoding.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Stream resolution failed: {0}")]
    ResolveFailed(String),

    #[error("Playlist fetch failed: {0}")]
    PlaylistFetch(String),

    #[error("Captured chunk too small: {size} bytes (minimum {min})")]
    CaptureTooSmall { size: u64, min: u64 },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("No input chunks to assemble")]
    NoInputs,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {:.1} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a resolution failure error.
    pub fn resolve_failed(message: impl Into<String>) -> Self {
        Self::ResolveFailed(message.into())
    }

    /// Create a playlist fetch failure error.
    pub fn playlist_fetch(message: impl Into<String>) -> Self {
        Self::PlaylistFetch(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            MediaError::Timeout(_) => true,
            MediaError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}
