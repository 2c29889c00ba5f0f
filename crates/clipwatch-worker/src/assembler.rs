//! Clip assembly from buffered chunks.
//!
//! Segmented mode snapshots the chunks overlapping the clip window, waits a
//! bounded time for the capture loop to cover the part of the window that is
//! still in the future, then concatenates and re-encodes the exact span.
//! Bucketed mode copies the bucket the trigger was detected in unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clipwatch_media::{thumbnail_path_for, ClipEncoder};
use clipwatch_models::timestamp::from_unix_seconds;
use clipwatch_models::{AssemblyMethod, BufferMode, ClipRecord, TriggerEvent};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{EncodeFailurePolicy, ProcessorConfig};
use crate::error::{AssembleError, FailureKind};
use crate::segment_store::{window_bounds, ChunkRef, SegmentStore};

/// Assembly parameters derived from [`ProcessorConfig`].
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub mode: BufferMode,
    /// Clip length in seconds
    pub clip_length: f64,
    pub pre_fraction: f64,
    pub post_fraction: f64,
    pub clips_dir: PathBuf,
    pub failure_policy: EncodeFailurePolicy,
    pub thumbnails: bool,
    /// Upper bound on waiting for live coverage of the window end
    pub coverage_wait: Duration,
}

impl From<&ProcessorConfig> for AssemblerSettings {
    fn from(config: &ProcessorConfig) -> Self {
        let clip_length = config.clip.clip_length.as_secs_f64();
        Self {
            mode: config.capture.buffer_mode,
            clip_length,
            pre_fraction: config.clip.pre_fraction,
            post_fraction: config.clip.post_fraction,
            clips_dir: config.clip.clips_dir.clone(),
            failure_policy: config.clip.encode_failure_policy,
            thumbnails: config.clip.thumbnails,
            coverage_wait: Duration::from_secs_f64(clip_length * config.clip.post_fraction)
                + config.capture_timeout(),
        }
    }
}

/// Turns accepted triggers into clip files.
pub struct ClipAssembler {
    store: Arc<RwLock<SegmentStore>>,
    encoder: Arc<dyn ClipEncoder>,
    settings: AssemblerSettings,
}

impl ClipAssembler {
    pub fn new(
        store: Arc<RwLock<SegmentStore>>,
        encoder: Arc<dyn ClipEncoder>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            store,
            encoder,
            settings,
        }
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    /// Produce a clip for an accepted trigger.
    ///
    /// `source` is the chunk the trigger was detected in, when the caller
    /// still holds it. It takes part in assembly even if the store has
    /// evicted it since.
    pub async fn assemble(
        &self,
        event: &TriggerEvent,
        source: Option<ChunkRef>,
    ) -> Result<ClipRecord, AssembleError> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.settings.clips_dir).await?;
        let output = self.output_path(event.timestamp);

        let mut record = match self.settings.mode {
            BufferMode::Segmented => self.assemble_segmented(event, source, &output).await?,
            BufferMode::Bucketed => self.assemble_bucketed(event, source, &output).await?,
        };

        if self.settings.thumbnails {
            let thumb = thumbnail_path_for(&output);
            match self.encoder.thumbnail(&output, &thumb).await {
                Ok(()) => record.thumbnail = Some(thumb),
                Err(e) => warn!(clip = %record.filename, "Thumbnail generation failed: {}", e),
            }
        }

        let assembly = match record.assembly {
            AssemblyMethod::Encoded => "encoded",
            AssemblyMethod::CopiedVerbatim => "copied_verbatim",
            AssemblyMethod::FallbackCopy => "fallback_copy",
        };
        crate::metrics::record_clip(assembly, started.elapsed());

        info!(
            clip = %record.filename,
            duration = record.duration,
            size_bytes = record.file_size_bytes,
            assembly,
            reason = %record.trigger_reason,
            "Clip created"
        );

        Ok(record)
    }

    async fn assemble_segmented(
        &self,
        event: &TriggerEvent,
        source: Option<ChunkRef>,
        output: &Path,
    ) -> Result<ClipRecord, AssembleError> {
        let s = &self.settings;
        let (window_start, window_end) =
            window_bounds(event.timestamp, s.clip_length, s.pre_fraction, s.post_fraction);

        // Chunks stay on disk while this snapshot holds them.
        let mut chunks = self.snapshot_with_wait(event.timestamp, window_end).await;
        if let Some(source) = source.filter(|c| c.overlaps(window_start, window_end)) {
            chunks = merge_by_sequence(chunks, vec![source]);
        }
        let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
            return Err(AssembleError::NoCoverage {
                start: window_start,
                end: window_end,
            });
        };

        let span_start = window_start.max(first.start_timestamp);
        let span_end = window_end.min(last.end_timestamp());
        let duration = span_end - span_start;
        if duration <= 0.0 {
            return Err(AssembleError::NoCoverage {
                start: window_start,
                end: window_end,
            });
        }
        if span_end < window_end {
            warn!(
                missing_secs = window_end - span_end,
                "Window end not covered, clipping what is buffered"
            );
        }

        let offset = (window_start - first.start_timestamp).max(0.0);
        let inputs: Vec<PathBuf> = chunks.iter().map(|c| c.path.clone()).collect();

        debug!(
            chunks = inputs.len(),
            offset,
            duration,
            "Encoding clip window"
        );

        let assembly = match self.encoder.encode(&inputs, output, offset, duration).await {
            Ok(()) => AssemblyMethod::Encoded,
            Err(e) => {
                crate::metrics::record_failure(FailureKind::Encode);
                match s.failure_policy {
                    EncodeFailurePolicy::Halt => {
                        return Err(AssembleError::EncodeFailure {
                            source: e,
                            halt: true,
                        })
                    }
                    EncodeFailurePolicy::FallbackCopy => {
                        warn!("Clip encode failed, falling back to stream copy: {}", e);
                        self.encoder
                            .concat_copy(&inputs, output, offset, duration)
                            .await
                            .map_err(AssembleError::Copy)?;
                        AssemblyMethod::FallbackCopy
                    }
                }
            }
        };

        let file_size_bytes = tokio::fs::metadata(output).await?.len();
        drop(chunks);

        Ok(self.record(
            output,
            span_start,
            span_end,
            duration,
            event,
            file_size_bytes,
            assembly,
        ))
    }

    async fn assemble_bucketed(
        &self,
        event: &TriggerEvent,
        source: Option<ChunkRef>,
        output: &Path,
    ) -> Result<ClipRecord, AssembleError> {
        let bucket = source
            .filter(|c| c.contains(event.timestamp))
            .or_else(|| self.store.read().chunk_containing(event.timestamp));
        let Some(bucket) = bucket else {
            let (start, end) = window_bounds(
                event.timestamp,
                self.settings.clip_length,
                self.settings.pre_fraction,
                self.settings.post_fraction,
            );
            return Err(AssembleError::NoCoverage { start, end });
        };

        self.encoder
            .copy_verbatim(&bucket.path, output)
            .await
            .map_err(AssembleError::Copy)?;
        let file_size_bytes = tokio::fs::metadata(output).await?.len();

        Ok(self.record(
            output,
            bucket.start_timestamp,
            bucket.end_timestamp(),
            bucket.nominal_duration,
            event,
            file_size_bytes,
            AssemblyMethod::CopiedVerbatim,
        ))
    }

    /// Snapshot the window; if coverage ends short of `window_end`, wait for
    /// the capture loop and merge in what arrived.
    async fn snapshot_with_wait(&self, center: f64, window_end: f64) -> Vec<ChunkRef> {
        let s = &self.settings;
        let (mut snapshot, covered, mut coverage) = {
            let store = self.store.read();
            (
                store.resolve_window(center, s.clip_length, s.pre_fraction, s.post_fraction),
                store.covered_until().unwrap_or(f64::NEG_INFINITY),
                store.subscribe(),
            )
        };

        if covered < window_end {
            debug!(
                covered,
                window_end,
                max_wait_secs = s.coverage_wait.as_secs_f64(),
                "Waiting for live coverage"
            );
            let waited =
                tokio::time::timeout(s.coverage_wait, coverage.wait_for(|&end| end >= window_end))
                    .await;
            if waited.is_err() {
                debug!("Coverage wait timed out");
            }

            let fresh = self
                .store
                .read()
                .resolve_window(center, s.clip_length, s.pre_fraction, s.post_fraction);
            snapshot = merge_by_sequence(snapshot, fresh);
        }

        snapshot
    }

    fn output_path(&self, timestamp: f64) -> PathBuf {
        let stamp = from_unix_seconds(timestamp)
            .unwrap_or_else(chrono::Utc::now)
            .format("%Y%m%d_%H%M%S")
            .to_string();

        let mut path = self.settings.clips_dir.join(format!("highlight_{}.mp4", stamp));
        let mut n = 1;
        while path.exists() {
            path = self
                .settings
                .clips_dir
                .join(format!("highlight_{}_{}.mp4", stamp, n));
            n += 1;
        }
        path
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        output: &Path,
        source_window_start: f64,
        source_window_end: f64,
        duration: f64,
        event: &TriggerEvent,
        file_size_bytes: u64,
        assembly: AssemblyMethod,
    ) -> ClipRecord {
        ClipRecord {
            filename: output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: output.to_path_buf(),
            source_window_start,
            source_window_end,
            duration,
            trigger_reason: event.reason.label.clone(),
            file_size_bytes,
            assembly,
            thumbnail: None,
        }
    }
}

/// Union of two snapshots, ordered by capture sequence.
fn merge_by_sequence(a: Vec<ChunkRef>, b: Vec<ChunkRef>) -> Vec<ChunkRef> {
    let mut merged: BTreeMap<u64, ChunkRef> = BTreeMap::new();
    for chunk in a.into_iter().chain(b) {
        merged.entry(chunk.sequence).or_insert(chunk);
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clipwatch_media::{MediaError, MediaResult};
    use clipwatch_models::{ChunkMetrics, MediaChunk, TriggerReason, TriggerSource};
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Encode { inputs: usize, offset: f64, duration: f64 },
        ConcatCopy,
        Verbatim(PathBuf),
        Thumbnail,
    }

    #[derive(Default)]
    struct FakeEncoder {
        fail_encode: bool,
        fail_thumbnail: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeEncoder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ClipEncoder for FakeEncoder {
        async fn encode(
            &self,
            inputs: &[PathBuf],
            output: &Path,
            start_offset: f64,
            duration: f64,
        ) -> MediaResult<()> {
            self.calls.lock().push(Call::Encode {
                inputs: inputs.len(),
                offset: start_offset,
                duration,
            });
            if self.fail_encode {
                return Err(MediaError::ffmpeg_failed("encoder crashed", None, Some(1)));
            }
            std::fs::write(output, b"encoded")?;
            Ok(())
        }

        async fn concat_copy(
            &self,
            _inputs: &[PathBuf],
            output: &Path,
            _start_offset: f64,
            _duration: f64,
        ) -> MediaResult<()> {
            self.calls.lock().push(Call::ConcatCopy);
            std::fs::write(output, b"copied")?;
            Ok(())
        }

        async fn copy_verbatim(&self, input: &Path, output: &Path) -> MediaResult<()> {
            self.calls.lock().push(Call::Verbatim(input.to_path_buf()));
            std::fs::copy(input, output)?;
            Ok(())
        }

        async fn thumbnail(&self, _clip: &Path, output: &Path) -> MediaResult<()> {
            self.calls.lock().push(Call::Thumbnail);
            if self.fail_thumbnail {
                return Err(MediaError::ffmpeg_failed("no frame", None, Some(1)));
            }
            std::fs::write(output, b"jpg")?;
            Ok(())
        }
    }

    fn settings(dir: &Path, mode: BufferMode) -> AssemblerSettings {
        AssemblerSettings {
            mode,
            clip_length: 20.0,
            pre_fraction: 0.2,
            post_fraction: 0.8,
            clips_dir: dir.join("clips"),
            failure_policy: EncodeFailurePolicy::FallbackCopy,
            thumbnails: true,
            coverage_wait: Duration::from_millis(100),
        }
    }

    fn chunk(dir: &Path, sequence: u64, start: f64, duration: f64) -> MediaChunk {
        let path = dir.join(format!("seg_{:06}.ts", sequence));
        std::fs::write(&path, vec![1u8; 32]).unwrap();
        MediaChunk::new(sequence, path, start, duration, 32)
    }

    fn event(timestamp: f64) -> TriggerEvent {
        TriggerEvent {
            timestamp,
            reason: TriggerReason::new(TriggerSource::Threshold, None, "Audio Spike"),
            confidence_percent: 100,
            metrics: ChunkMetrics::default(),
        }
    }

    fn filled_store(dir: &Path, from: f64, to: f64) -> Arc<RwLock<SegmentStore>> {
        let mut store = SegmentStore::segmented(100);
        let mut seq = 0;
        let mut t = from;
        while t < to {
            store.add_segment(chunk(dir, seq, t, 2.0));
            seq += 1;
            t += 2.0;
        }
        Arc::new(RwLock::new(store))
    }

    #[tokio::test]
    async fn test_segmented_encodes_exact_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = filled_store(dir.path(), 80.0, 130.0);
        let encoder = Arc::new(FakeEncoder::default());
        let assembler = ClipAssembler::new(
            store,
            encoder.clone(),
            settings(dir.path(), BufferMode::Segmented),
        );

        let record = assembler.assemble(&event(100.0), None).await.unwrap();

        assert_eq!(record.assembly, AssemblyMethod::Encoded);
        assert_eq!(record.source_window_start, 96.0);
        assert_eq!(record.source_window_end, 116.0);
        assert_eq!(record.duration, 20.0);
        assert_eq!(record.trigger_reason, "Audio Spike");
        assert_eq!(record.filename, "highlight_19700101_000140.mp4");
        assert!(record.path.exists());
        assert_eq!(record.file_size_bytes, 7);
        assert!(record.thumbnail.as_ref().unwrap().exists());

        assert_eq!(
            encoder.calls(),
            vec![
                Call::Encode {
                    inputs: 11,
                    offset: 0.0,
                    duration: 20.0
                },
                Call::Thumbnail
            ]
        );
    }

    #[tokio::test]
    async fn test_start_offset_within_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = filled_store(dir.path(), 81.0, 131.0);
        let encoder = Arc::new(FakeEncoder::default());
        let assembler = ClipAssembler::new(
            store,
            encoder.clone(),
            settings(dir.path(), BufferMode::Segmented),
        );

        assembler.assemble(&event(100.0), None).await.unwrap();

        // First overlapping chunk starts at 95, window at 96.
        match &encoder.calls()[0] {
            Call::Encode { offset, .. } => assert_eq!(*offset, 1.0),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_encode_failure_falls_back_to_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = filled_store(dir.path(), 80.0, 130.0);
        let encoder = Arc::new(FakeEncoder {
            fail_encode: true,
            fail_thumbnail: true,
            ..Default::default()
        });
        let assembler = ClipAssembler::new(
            store,
            encoder.clone(),
            settings(dir.path(), BufferMode::Segmented),
        );

        let record = assembler.assemble(&event(100.0), None).await.unwrap();

        assert_eq!(record.assembly, AssemblyMethod::FallbackCopy);
        assert!(record.thumbnail.is_none());
        assert!(encoder.calls().contains(&Call::ConcatCopy));
    }

    #[tokio::test]
    async fn test_encode_failure_halts_under_halt_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = filled_store(dir.path(), 80.0, 130.0);
        let encoder = Arc::new(FakeEncoder {
            fail_encode: true,
            ..Default::default()
        });
        let mut settings = settings(dir.path(), BufferMode::Segmented);
        settings.failure_policy = EncodeFailurePolicy::Halt;
        let assembler = ClipAssembler::new(store, encoder.clone(), settings);

        let err = assembler.assemble(&event(100.0), None).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(!encoder.calls().contains(&Call::ConcatCopy));
    }

    #[tokio::test]
    async fn test_waits_for_live_coverage() {
        let dir = tempfile::tempdir().unwrap();
        // Buffered up to 104, window needs 116.
        let store = filled_store(dir.path(), 80.0, 104.0);
        let encoder = Arc::new(FakeEncoder::default());
        let mut settings = settings(dir.path(), BufferMode::Segmented);
        settings.coverage_wait = Duration::from_secs(5);
        let assembler = ClipAssembler::new(store.clone(), encoder.clone(), settings);

        let late_dir = dir.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut seq = 100;
            let mut t = 104.0;
            while t < 118.0 {
                let c = chunk(&late_dir, seq, t, 2.0);
                store.write().add_segment(c);
                seq += 1;
                t += 2.0;
            }
        });

        let record = assembler.assemble(&event(100.0), None).await.unwrap();
        writer.await.unwrap();

        assert_eq!(record.source_window_end, 116.0);
        assert_eq!(record.duration, 20.0);
    }

    #[tokio::test]
    async fn test_short_coverage_clips_what_is_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let store = filled_store(dir.path(), 80.0, 110.0);
        let encoder = Arc::new(FakeEncoder::default());
        let assembler = ClipAssembler::new(
            store,
            encoder.clone(),
            settings(dir.path(), BufferMode::Segmented),
        );

        let record = assembler.assemble(&event(100.0), None).await.unwrap();

        assert_eq!(record.source_window_end, 110.0);
        assert_eq!(record.duration, 14.0);
    }

    #[tokio::test]
    async fn test_empty_store_reports_no_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RwLock::new(SegmentStore::segmented(10)));
        let assembler = ClipAssembler::new(
            store,
            Arc::new(FakeEncoder::default()),
            settings(dir.path(), BufferMode::Segmented),
        );

        let err = assembler.assemble(&event(100.0), None).await.unwrap_err();
        assert!(matches!(err, AssembleError::NoCoverage { .. }));
    }

    #[tokio::test]
    async fn test_bucketed_copies_bucket_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SegmentStore::bucketed();
        let bucket = chunk(dir.path(), 3, 60.0, 20.0);
        let bucket_path = bucket.path.clone();
        store.add_segment(bucket);
        let encoder = Arc::new(FakeEncoder::default());
        let mut settings = settings(dir.path(), BufferMode::Bucketed);
        settings.thumbnails = false;
        let assembler = ClipAssembler::new(Arc::new(RwLock::new(store)), encoder.clone(), settings);

        let record = assembler.assemble(&event(70.0), None).await.unwrap();

        assert_eq!(record.assembly, AssemblyMethod::CopiedVerbatim);
        assert_eq!(record.source_window_start, 60.0);
        assert_eq!(record.duration, 20.0);
        assert_eq!(record.file_size_bytes, 32);
        assert_eq!(encoder.calls(), vec![Call::Verbatim(bucket_path)]);
    }

    #[tokio::test]
    async fn test_bucketed_uses_held_bucket_after_supersede() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SegmentStore::bucketed();
        drop(store.add_segment(chunk(dir.path(), 0, 60.0, 20.0)));
        let held = store.newest().unwrap();
        let held_path = held.path.clone();

        // Capture moved on while the held bucket was being analyzed.
        drop(store.add_segment(chunk(dir.path(), 1, 80.0, 20.0)));
        assert!(held_path.exists());

        let encoder = Arc::new(FakeEncoder::default());
        let mut settings = settings(dir.path(), BufferMode::Bucketed);
        settings.thumbnails = false;
        let assembler = ClipAssembler::new(Arc::new(RwLock::new(store)), encoder.clone(), settings);

        let record = assembler.assemble(&event(70.0), Some(held)).await.unwrap();

        assert_eq!(record.source_window_start, 60.0);
        assert_eq!(encoder.calls(), vec![Call::Verbatim(held_path.clone())]);
        assert!(!held_path.exists());
    }

    #[tokio::test]
    async fn test_bucketed_never_substitutes_newest_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SegmentStore::bucketed();
        drop(store.add_segment(chunk(dir.path(), 0, 60.0, 20.0)));
        drop(store.add_segment(chunk(dir.path(), 1, 80.0, 20.0)));

        let encoder = Arc::new(FakeEncoder::default());
        let assembler = ClipAssembler::new(
            Arc::new(RwLock::new(store)),
            encoder.clone(),
            settings(dir.path(), BufferMode::Bucketed),
        );

        let err = assembler.assemble(&event(70.0), None).await.unwrap_err();
        assert!(matches!(err, AssembleError::NoCoverage { .. }));
        assert!(encoder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_segmented_keeps_evicted_source_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SegmentStore::segmented(3);
        drop(store.add_segment(chunk(dir.path(), 0, 96.0, 2.0)));
        let source = store.newest().unwrap();
        for seq in 1..4u64 {
            drop(store.add_segment(chunk(dir.path(), seq, 96.0 + seq as f64 * 2.0, 2.0)));
        }
        assert!(store.chunk_containing(97.0).is_none());

        let encoder = Arc::new(FakeEncoder::default());
        let mut settings = settings(dir.path(), BufferMode::Segmented);
        settings.clip_length = 8.0;
        settings.pre_fraction = 0.0;
        settings.post_fraction = 1.0;
        settings.thumbnails = false;
        let assembler = ClipAssembler::new(Arc::new(RwLock::new(store)), encoder.clone(), settings);

        let record = assembler.assemble(&event(96.0), Some(source)).await.unwrap();

        assert_eq!(record.source_window_start, 96.0);
        assert_eq!(record.source_window_end, 104.0);
        assert_eq!(
            encoder.calls(),
            vec![Call::Encode {
                inputs: 4,
                offset: 0.0,
                duration: 8.0
            }]
        );
    }

    #[tokio::test]
    async fn test_same_second_clips_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = filled_store(dir.path(), 80.0, 130.0);
        let mut settings = settings(dir.path(), BufferMode::Segmented);
        settings.thumbnails = false;
        let assembler = ClipAssembler::new(store, Arc::new(FakeEncoder::default()), settings);

        let a = assembler.assemble(&event(100.0), None).await.unwrap();
        let b = assembler.assemble(&event(100.2), None).await.unwrap();
        assert_ne!(a.filename, b.filename);
        assert_eq!(b.filename, "highlight_19700101_000140_1.mp4");
    }
}
