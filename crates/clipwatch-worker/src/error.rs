//! Worker error types.

use clipwatch_client::ClientError;
use clipwatch_media::MediaError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure taxonomy the processing loops match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A single capture attempt failed
    TransientCapture,
    /// No playable URL could be resolved
    Resolution,
    /// The playlist carries ad markers
    AdDetected,
    Analysis,
    Encode,
    Notification,
    /// Too many consecutive capture failures
    StreamEnded,
    Config,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientCapture => "transient_capture",
            FailureKind::Resolution => "resolution",
            FailureKind::AdDetected => "ad_detected",
            FailureKind::Analysis => "analysis",
            FailureKind::Encode => "encode",
            FailureKind::Notification => "notification",
            FailureKind::StreamEnded => "stream_ended",
            FailureKind::Config => "config",
        }
    }
}

/// Clean URL acquisition errors.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("No ad-free stream URL after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Clip assembly errors.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("No buffered media covers {start:.1}..{end:.1}")]
    NoCoverage { start: f64, end: f64 },

    #[error("Clip encode failed: {source}")]
    EncodeFailure {
        #[source]
        source: MediaError,
        /// Whether the configured policy treats this as fatal
        halt: bool,
    },

    #[error("Clip copy failed: {0}")]
    Copy(#[source] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssembleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AssembleError::EncodeFailure { halt: true, .. })
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Capture failed: {0}")]
    Capture(#[source] MediaError),

    #[error("Stream resolution failed: {0}")]
    Resolution(#[source] MediaError),

    #[error("Ads detected in stream playlist")]
    AdDetected,

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Notification failed: {0}")]
    Notification(#[from] ClientError),

    #[error("Stream ended after {failures} consecutive capture failures")]
    StreamEnded { failures: u32 },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    /// Classify the error for loop handling and metrics labels.
    pub fn kind(&self) -> FailureKind {
        match self {
            WorkerError::ConfigError(_) => FailureKind::Config,
            WorkerError::Capture(_) | WorkerError::Io(_) => FailureKind::TransientCapture,
            WorkerError::Resolution(_) => FailureKind::Resolution,
            WorkerError::AdDetected => FailureKind::AdDetected,
            WorkerError::Gate(_) => FailureKind::Resolution,
            WorkerError::Analysis(_) => FailureKind::Analysis,
            WorkerError::Notification(_) => FailureKind::Notification,
            WorkerError::StreamEnded { .. } => FailureKind::StreamEnded,
            WorkerError::Assemble(_) => FailureKind::Encode,
        }
    }

    /// Whether the orchestrator must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Assemble(e) => e.is_fatal(),
            WorkerError::ConfigError(_) => true,
            _ => false,
        }
    }

    /// Whether a timed-out call caused this error.
    pub fn is_timeout(&self) -> bool {
        match self {
            WorkerError::Capture(e) | WorkerError::Resolution(e) => e.is_timeout(),
            WorkerError::Notification(e) => e.is_timeout(),
            WorkerError::Assemble(AssembleError::EncodeFailure { source, .. }) => {
                source.is_timeout()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeouts_keep_the_kind_of_the_call() {
        let capture = WorkerError::Capture(MediaError::Timeout(Duration::from_secs(15)));
        assert_eq!(capture.kind(), FailureKind::TransientCapture);
        assert!(capture.is_timeout());

        let resolve = WorkerError::Resolution(MediaError::Timeout(Duration::from_secs(30)));
        assert_eq!(resolve.kind(), FailureKind::Resolution);
    }

    #[test]
    fn test_only_halting_encode_failures_are_fatal() {
        let fallback: WorkerError = AssembleError::EncodeFailure {
            source: MediaError::Timeout(Duration::from_secs(30)),
            halt: false,
        }
        .into();
        assert_eq!(fallback.kind(), FailureKind::Encode);
        assert!(!fallback.is_fatal());

        let halt: WorkerError = AssembleError::EncodeFailure {
            source: MediaError::NoInputs,
            halt: true,
        }
        .into();
        assert!(halt.is_fatal());

        assert!(!WorkerError::StreamEnded { failures: 5 }.is_fatal());
        assert!(!WorkerError::AdDetected.is_fatal());
    }
}
