//! Rolling window of captured media chunks.
//!
//! Chunks are shared as [`ChunkRef`]s. Evicting a chunk only drops the
//! store's reference; the backing file is removed when the last reference
//! goes away, so a window snapshot taken for clip assembly stays readable
//! while capture keeps evicting.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use clipwatch_models::{BufferMode, MediaChunk};
use tokio::sync::watch;
use tracing::{debug, warn};

/// A chunk owned by the store; deleting its file on drop.
#[derive(Debug)]
pub struct StoredChunk {
    chunk: MediaChunk,
}

impl StoredChunk {
    pub fn new(chunk: MediaChunk) -> Self {
        Self { chunk }
    }
}

impl Deref for StoredChunk {
    type Target = MediaChunk;

    fn deref(&self) -> &MediaChunk {
        &self.chunk
    }
}

impl Drop for StoredChunk {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.chunk.path) {
            Ok(()) => debug!(sequence = self.chunk.sequence, "Removed chunk file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.chunk.path.display(),
                "Failed to remove chunk file: {}", e
            ),
        }
    }
}

pub type ChunkRef = Arc<StoredChunk>;

/// Requested clip window `[center - pre*total, center + post*total]`.
pub fn window_bounds(center: f64, total: f64, pre: f64, post: f64) -> (f64, f64) {
    (center - total * pre, center + total * post)
}

/// Capacity-bounded, time-ordered chunk buffer.
pub struct SegmentStore {
    mode: BufferMode,
    capacity: usize,
    chunks: VecDeque<ChunkRef>,
    coverage_tx: watch::Sender<f64>,
}

impl SegmentStore {
    /// Create a store. Bucketed stores always hold a single chunk.
    pub fn new(mode: BufferMode, capacity: usize) -> Self {
        let capacity = match mode {
            BufferMode::Segmented => capacity.max(1),
            BufferMode::Bucketed => 1,
        };
        let (coverage_tx, _) = watch::channel(f64::NEG_INFINITY);
        Self {
            mode,
            capacity,
            chunks: VecDeque::with_capacity(capacity),
            coverage_tx,
        }
    }

    pub fn segmented(capacity: usize) -> Self {
        Self::new(BufferMode::Segmented, capacity)
    }

    pub fn bucketed() -> Self {
        Self::new(BufferMode::Bucketed, 1)
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Append a chunk, evicting the oldest when over capacity.
    ///
    /// In bucketed mode the new bucket supersedes the previous one. The
    /// evicted references are returned so the caller can release them, and
    /// with them possibly the files, after letting go of the store lock.
    pub fn add_segment(&mut self, chunk: MediaChunk) -> Vec<ChunkRef> {
        let stored = Arc::new(StoredChunk::new(chunk));
        let covered = stored.end_timestamp();
        self.chunks.push_back(stored);

        let mut evicted = Vec::new();
        while self.chunks.len() > self.capacity {
            if let Some(oldest) = self.chunks.pop_front() {
                debug!(
                    sequence = oldest.sequence,
                    shared = Arc::strong_count(&oldest) > 1,
                    "Evicting chunk"
                );
                evicted.push(oldest);
            }
        }

        self.coverage_tx.send_replace(covered);
        evicted
    }

    pub fn newest(&self) -> Option<ChunkRef> {
        self.chunks.back().cloned()
    }

    pub fn oldest(&self) -> Option<ChunkRef> {
        self.chunks.front().cloned()
    }

    /// End of the newest buffered chunk.
    pub fn covered_until(&self) -> Option<f64> {
        self.chunks.back().map(|c| c.end_timestamp())
    }

    /// Watch the end time of the newest buffered chunk.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.coverage_tx.subscribe()
    }

    /// Chunks intersecting the clip window, oldest first.
    pub fn resolve_window(&self, center: f64, total: f64, pre: f64, post: f64) -> Vec<ChunkRef> {
        let (from, to) = window_bounds(center, total, pre, post);
        self.chunks
            .iter()
            .filter(|c| c.overlaps(from, to))
            .cloned()
            .collect()
    }

    /// The chunk whose interval contains `instant`.
    pub fn chunk_containing(&self, instant: f64) -> Option<ChunkRef> {
        self.chunks.iter().find(|c| c.contains(instant)).cloned()
    }

    /// Drop every chunk reference held by the store.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
