//! FFmpeg and streamlink wrappers for live stream processing.
//!
//! This crate provides:
//! - An FFmpeg command builder and a subprocess runner with timeout and cancellation
//! - Stream URL resolution via streamlink
//! - HLS playlist fetching and ad-marker scanning
//! - Fixed-duration live capture
//! - Per-chunk audio/scene analysis
//! - Clip encoding, stream-copy fallback and thumbnails
//!
//! Pipeline code depends on the traits in [`traits`]; the types here are the
//! production implementations.

pub mod analyze;
pub mod capture;
pub mod command;
pub mod encode;
pub mod error;
pub mod playlist;
pub mod resolver;
pub mod traits;

pub use analyze::{parse_analysis, FfmpegAnalyzer};
pub use capture::{FfmpegCapturer, CAPTURE_TIMEOUT_SLACK, MIN_CAPTURE_BYTES};
pub use command::{check_ffmpeg, check_streamlink, CommandOutput, FfmpegCommand, FfmpegRunner};
pub use encode::{thumbnail_path_for, EncodeSettings, FfmpegClipEncoder};
pub use error::{MediaError, MediaResult};
pub use playlist::{has_ads, HttpPlaylistFetcher};
pub use resolver::StreamlinkResolver;
pub use traits::{ChunkAnalyzer, ChunkCapturer, ClipEncoder, PlaylistFetcher, StreamResolver};
