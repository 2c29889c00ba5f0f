//! Live chunk capture with FFmpeg stream copy.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::traits::ChunkCapturer;

/// Captures smaller than this are treated as failed reads.
pub const MIN_CAPTURE_BYTES: u64 = 10 * 1024;

/// Extra time allowed beyond the chunk duration for connection setup.
pub const CAPTURE_TIMEOUT_SLACK: Duration = Duration::from_secs(13);

/// Captures chunks with `ffmpeg -i <url> -t <dur> -c copy`.
#[derive(Debug, Clone)]
pub struct FfmpegCapturer {
    slack: Duration,
    min_bytes: u64,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegCapturer {
    fn default() -> Self {
        Self {
            slack: CAPTURE_TIMEOUT_SLACK,
            min_bytes: MIN_CAPTURE_BYTES,
            cancel_rx: None,
        }
    }
}

impl FfmpegCapturer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slack(mut self, slack: Duration) -> Self {
        self.slack = slack;
        self
    }

    /// Kill in-flight captures when the receiver reads `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn runner(&self, duration: Duration) -> FfmpegRunner {
        let runner = FfmpegRunner::new().with_timeout(duration + self.slack);
        match &self.cancel_rx {
            Some(rx) => runner.with_cancel(rx.clone()),
            None => runner,
        }
    }
}

#[async_trait]
impl ChunkCapturer for FfmpegCapturer {
    async fn capture(&self, url: &str, output: &Path, duration: Duration) -> MediaResult<u64> {
        let cmd = FfmpegCommand::new(url, output.to_string_lossy())
            .duration(duration.as_secs_f64())
            .stream_copy();

        if let Err(e) = self.runner(duration).run(&cmd).await {
            discard(output).await;
            return Err(e);
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(_) => return Err(MediaError::FileNotFound(output.to_path_buf())),
        };

        check_capture_size(size, self.min_bytes).inspect_err(|_| {
            warn!(path = %output.display(), size, "Captured chunk too small, discarding");
        })?;

        debug!(path = %output.display(), size, "Captured chunk");
        Ok(size)
    }
}

/// Reject captures below the minimum size.
pub fn check_capture_size(size: u64, min: u64) -> MediaResult<()> {
    if size < min {
        Err(MediaError::CaptureTooSmall { size, min })
    } else {
        Ok(())
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove partial capture: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_size_gate() {
        assert!(check_capture_size(MIN_CAPTURE_BYTES, MIN_CAPTURE_BYTES).is_ok());
        assert!(matches!(
            check_capture_size(512, MIN_CAPTURE_BYTES),
            Err(MediaError::CaptureTooSmall { size: 512, .. })
        ));
    }

    #[tokio::test]
    async fn test_discard_missing_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never_written.ts");
        discard(&path).await;

        std::fs::write(&path, b"partial").unwrap();
        discard(&path).await;
        assert!(!path.exists());
    }
}
