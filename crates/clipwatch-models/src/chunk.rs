//! Buffered media chunk models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How captured media is buffered between capture and clip assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    /// Many short fixed-duration segments in a rolling window.
    #[default]
    Segmented,
    /// One long bucket per clip window, no intra-window splitting.
    Bucketed,
}

impl std::fmt::Display for BufferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferMode::Segmented => write!(f, "segmented"),
            BufferMode::Bucketed => write!(f, "bucketed"),
        }
    }
}

impl std::str::FromStr for BufferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "segmented" | "segment" | "segments" => Ok(BufferMode::Segmented),
            "bucketed" | "bucket" | "buckets" => Ok(BufferMode::Bucketed),
            other => Err(format!("unknown buffer mode: {}", other)),
        }
    }
}

/// A unit of captured media on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaChunk {
    /// Monotonic capture sequence number within a session
    pub sequence: u64,
    /// Backing file
    pub path: PathBuf,
    /// Capture start as unix seconds
    pub start_timestamp: f64,
    /// Nominal duration in seconds
    pub nominal_duration: f64,
    /// Size of the backing file in bytes
    pub size_bytes: u64,
}

impl MediaChunk {
    /// Create a new chunk record.
    pub fn new(
        sequence: u64,
        path: impl Into<PathBuf>,
        start_timestamp: f64,
        nominal_duration: f64,
        size_bytes: u64,
    ) -> Self {
        Self {
            sequence,
            path: path.into(),
            start_timestamp,
            nominal_duration,
            size_bytes,
        }
    }

    /// End of the chunk's half-open interval `[start, end)`.
    pub fn end_timestamp(&self) -> f64 {
        self.start_timestamp + self.nominal_duration
    }

    /// Whether `[start, end)` intersects the closed range `[from, to]`.
    pub fn overlaps(&self, from: f64, to: f64) -> bool {
        self.start_timestamp <= to && self.end_timestamp() > from
    }

    /// Whether the given instant falls inside this chunk.
    pub fn contains(&self, instant: f64) -> bool {
        instant >= self.start_timestamp && instant < self.end_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_half_open_on_chunk_end() {
        let chunk = MediaChunk::new(0, "a.ts", 94.0, 2.0, 1);
        assert!(!chunk.overlaps(96.0, 116.0));

        let chunk = MediaChunk::new(1, "b.ts", 116.0, 2.0, 1);
        assert!(chunk.overlaps(96.0, 116.0));
    }

    #[test]
    fn test_buffer_mode_parse() {
        assert_eq!("Bucketed".parse::<BufferMode>().unwrap(), BufferMode::Bucketed);
        assert_eq!("segments".parse::<BufferMode>().unwrap(), BufferMode::Segmented);
        assert!("rolling".parse::<BufferMode>().is_err());
    }
}
