//! Finished clip records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the clip file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyMethod {
    /// Concatenated and re-encoded with an exact start offset and duration
    Encoded,
    /// Bucket copied as-is
    CopiedVerbatim,
    /// Encoder failed; concatenated window stream-copied instead
    FallbackCopy,
}

/// A clip written to the clips directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    /// File name inside the clips directory
    pub filename: String,
    /// Full path of the clip file
    pub path: PathBuf,
    /// Requested window start (unix seconds)
    pub source_window_start: f64,
    /// Requested window end (unix seconds)
    pub source_window_end: f64,
    /// Clip duration in seconds
    pub duration: f64,
    /// Label of the trigger that caused the clip
    pub trigger_reason: String,
    pub file_size_bytes: u64,
    pub assembly: AssemblyMethod,
    /// Thumbnail written next to the clip, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<PathBuf>,
}
