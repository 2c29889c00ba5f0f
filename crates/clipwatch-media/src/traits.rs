//! Collaborator traits the stream pipeline is written against.
//!
//! Production implementations shell out to streamlink and FFmpeg or use
//! HTTP; tests substitute in-memory fakes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use clipwatch_models::ChunkMetrics;

use crate::error::MediaResult;

/// Turns a channel name into a playable media URL.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, channel: &str, quality: &str) -> MediaResult<String>;
}

/// Fetches the text of a media playlist.
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> MediaResult<String>;
}

/// Captures a fixed-duration chunk of a live URL to disk.
#[async_trait]
pub trait ChunkCapturer: Send + Sync {
    /// Returns the size of the written file in bytes.
    async fn capture(&self, url: &str, output: &Path, duration: Duration) -> MediaResult<u64>;
}

/// Extracts cheap audio, motion and scene signals from a captured chunk.
#[async_trait]
pub trait ChunkAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> MediaResult<ChunkMetrics>;
}

/// Produces clip files from buffered chunks.
#[async_trait]
pub trait ClipEncoder: Send + Sync {
    /// Concatenate `inputs` and re-encode `duration` seconds from `start_offset`.
    async fn encode(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        start_offset: f64,
        duration: f64,
    ) -> MediaResult<()>;

    /// Concatenate `inputs` and stream-copy the same span without re-encoding.
    async fn concat_copy(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        start_offset: f64,
        duration: f64,
    ) -> MediaResult<()>;

    /// Copy a single file unchanged.
    async fn copy_verbatim(&self, input: &Path, output: &Path) -> MediaResult<()>;

    async fn thumbnail(&self, clip: &Path, output: &Path) -> MediaResult<()>;
}
