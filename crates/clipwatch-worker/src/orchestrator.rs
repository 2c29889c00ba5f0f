//! Stream processor: capture, analysis and metrics loops.
//!
//! The capture loop is the only writer of the segment store and of the
//! failure and stream-ended fields. The analysis loop owns the baseline
//! and the trigger policy. The metrics loop only reads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clipwatch_client::{
    semantic::analyze_text, ExcitementScorer, HttpExcitementScorer, HttpNotifier,
    HttpTranscriptSource, LogNotifier, Notifier, NotifierTimeouts, ScorerConfig,
    TranscriptSource,
};
use clipwatch_media::resolver::source_url_for;
use clipwatch_media::{
    ChunkAnalyzer, ChunkCapturer, ClipEncoder, EncodeSettings, FfmpegAnalyzer, FfmpegCapturer,
    FfmpegClipEncoder, HttpPlaylistFetcher, PlaylistFetcher, StreamResolver, StreamlinkResolver,
};
use clipwatch_models::timestamp::unix_now;
use clipwatch_models::{BufferMode, ChunkMetrics, ClipCreated, FeatureVector, MediaChunk};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::assembler::{AssemblerSettings, ClipAssembler};
use crate::baseline::{BaselineSettings, BaselineTracker};
use crate::config::ProcessorConfig;
use crate::error::{FailureKind, WorkerError, WorkerResult};
use crate::gatekeeper::GateKeeper;
use crate::logging::StreamLogger;
use crate::retry::{BackoffPolicy, FailureTracker};
use crate::segment_store::{ChunkRef, SegmentStore};
use crate::state::ProcessorState;
use crate::trigger::{TriggerDecision, TriggerPolicy};

/// External collaborators the processor drives.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn StreamResolver>,
    pub fetcher: Arc<dyn PlaylistFetcher>,
    pub capturer: Arc<dyn ChunkCapturer>,
    pub analyzer: Arc<dyn ChunkAnalyzer>,
    pub encoder: Arc<dyn ClipEncoder>,
    pub notifier: Arc<dyn Notifier>,
    pub scorer: Option<Arc<dyn ExcitementScorer>>,
    pub transcripts: Option<Arc<dyn TranscriptSource>>,
}

impl Collaborators {
    /// streamlink, FFmpeg and HTTP implementations configured from `config`.
    ///
    /// In-flight captures are killed when `cancel` reads `true`.
    pub fn production(config: &ProcessorConfig, cancel: watch::Receiver<bool>) -> WorkerResult<Self> {
        let fetcher = HttpPlaylistFetcher::new()
            .map_err(|e| WorkerError::config_error(format!("playlist client: {}", e)))?;

        let notifier: Arc<dyn Notifier> = match &config.notify.base_url {
            Some(url) => Arc::new(HttpNotifier::new(url.clone(), NotifierTimeouts::default())?),
            None => Arc::new(LogNotifier),
        };

        let scorer: Option<Arc<dyn ExcitementScorer>> = match &config.notify.scorer_url {
            Some(url) => Some(Arc::new(HttpExcitementScorer::new(ScorerConfig {
                base_url: url.clone(),
                timeout: config.notify.scorer_timeout,
            })?)),
            None => None,
        };

        let transcripts: Option<Arc<dyn TranscriptSource>> = match &config.notify.transcript_url {
            Some(url) => Some(Arc::new(HttpTranscriptSource::new(
                url.clone(),
                config.notify.transcript_timeout,
            )?)),
            None => None,
        };

        Ok(Self {
            resolver: Arc::new(StreamlinkResolver::new()),
            fetcher: Arc::new(fetcher),
            capturer: Arc::new(
                FfmpegCapturer::new()
                    .with_slack(config.capture.timeout_slack)
                    .with_cancel(cancel),
            ),
            analyzer: Arc::new(FfmpegAnalyzer::new().with_timeout(config.detection.analysis_timeout)),
            encoder: Arc::new(FfmpegClipEncoder::new(EncodeSettings {
                timeout: config.clip.encode_timeout,
                ..Default::default()
            })),
            notifier,
            scorer,
            transcripts,
        })
    }
}

/// Runs one stream session until stopped or halted.
pub struct ProcessorOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ProcessorConfig>,
    collab: Collaborators,
    state: Arc<ProcessorState>,
    store: Arc<RwLock<SegmentStore>>,
    gate: GateKeeper,
    assembler: ClipAssembler,
    work_dir: PathBuf,
    source_url: String,
    logger: StreamLogger,
}

impl ProcessorOrchestrator {
    pub fn new(config: ProcessorConfig, collab: Collaborators) -> Self {
        Self::with_state(config, collab, Arc::new(ProcessorState::new()))
    }

    /// Use an externally created state, e.g. one whose shutdown signal
    /// already feeds the production capturer.
    pub fn with_state(config: ProcessorConfig, collab: Collaborators, state: Arc<ProcessorState>) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let store = Arc::new(RwLock::new(SegmentStore::new(
            config.capture.buffer_mode,
            config.store_capacity(),
        )));
        let gate = GateKeeper::new(
            collab.resolver.clone(),
            collab.fetcher.clone(),
            config.stream.acquire_interval,
        );
        let assembler = ClipAssembler::new(
            store.clone(),
            collab.encoder.clone(),
            AssemblerSettings::from(&config),
        );
        let work_dir = config.capture.work_dir.join(&session_id);
        let source_url = source_url_for(&config.stream.channel);
        let logger = StreamLogger::new(session_id, config.stream.channel.clone());

        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                collab,
                state,
                store,
                gate,
                assembler,
                work_dir,
                source_url,
                logger,
            }),
        }
    }

    pub fn state(&self) -> Arc<ProcessorState> {
        self.inner.state.clone()
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.inner.work_dir
    }

    /// Ask all loops to exit.
    pub fn stop(&self) {
        self.inner.state.stop();
    }

    /// Run the session to completion.
    ///
    /// Returns an error only when a fatal failure halted the processor.
    pub async fn run(&self) -> WorkerResult<()> {
        let inner = &self.inner;
        let config = &inner.config;

        tokio::fs::create_dir_all(&inner.work_dir).await?;
        inner.logger.log_start(&format!(
            "mode={} chunk={:?} capacity={} window={:?}",
            config.capture.buffer_mode,
            config.chunk_duration(),
            config.store_capacity(),
            config.buffer_window()
        ));

        if let Some(duration) = config.stream.stability_check {
            let stable = inner
                .gate
                .validate_stable(&config.stream.channel, &config.stream.quality, duration)
                .await;
            if !stable {
                inner
                    .logger
                    .log_warning("Stream failed the stability check, starting anyway");
            }
        }

        inner.state.start();

        let capture = {
            let inner = inner.clone();
            let span = inner.logger.for_loop("capture").create_span();
            tokio::spawn(async move { inner.capture_loop().await }.instrument(span))
        };
        let analysis = {
            let inner = inner.clone();
            let span = inner.logger.for_loop("analysis").create_span();
            tokio::spawn(
                async move {
                    let result = inner.analysis_loop().await;
                    if result.is_err() {
                        inner.state.stop();
                    }
                    result
                }
                .instrument(span),
            )
        };
        let metrics = {
            let inner = inner.clone();
            let span = inner.logger.for_loop("metrics").create_span();
            tokio::spawn(async move { inner.metrics_loop().await }.instrument(span))
        };

        let (capture, analysis, metrics) = tokio::join!(capture, analysis, metrics);
        for joined in [capture, metrics] {
            if let Err(e) = joined {
                warn!("Loop task panicked: {}", e);
            }
        }
        let outcome = match analysis {
            Ok(result) => result,
            Err(e) => {
                warn!("Analysis task panicked: {}", e);
                Ok(())
            }
        };

        inner.state.stop();
        inner.cleanup().await;

        match &outcome {
            Ok(()) => inner.logger.log_completion(&format!(
                "clips={} chunks={}",
                inner.state.clips_generated(),
                inner.state.chunks_captured()
            )),
            Err(e) => inner.logger.log_error(&format!("Processor halted: {}", e)),
        }
        outcome
    }
}

/// Release evicted chunks off the runtime threads; the last reference
/// deletes the file.
fn release_chunks(evicted: Vec<ChunkRef>) {
    if !evicted.is_empty() {
        tokio::task::spawn_blocking(move || drop(evicted));
    }
}

impl Inner {
    /// Sleep unless shutdown is signalled first. Returns false on shutdown.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = shutdown.changed() => !*shutdown.borrow(),
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn acquire_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new("acquire_clean_url")
            .with_max_attempts(self.config.stream.acquire_attempts)
            .with_interval(self.config.stream.acquire_interval)
    }

    /// Cached clean URL, revalidated when stale, or a freshly acquired one.
    async fn current_url(&self, cached: &mut Option<(String, Instant)>) -> WorkerResult<String> {
        if let Some((url, checked)) = cached.as_mut() {
            if checked.elapsed() < self.config.stream.url_revalidate_interval {
                return Ok(url.clone());
            }
            if self.gate.is_clean(url).await {
                *checked = Instant::now();
                return Ok(url.clone());
            }
            debug!("Cached URL failed revalidation");
            *cached = None;
        }

        let url = self
            .gate
            .acquire_clean_url(&self.config.stream.channel, &self.config.stream.quality, &self.acquire_policy())
            .await?;
        *cached = Some((url.clone(), Instant::now()));
        Ok(url)
    }

    async fn capture_next(
        &self,
        cached_url: &mut Option<(String, Instant)>,
        sequence: u64,
    ) -> WorkerResult<MediaChunk> {
        let url = self.current_url(cached_url).await?;
        self.capture_once(&url, sequence).await
    }

    async fn capture_once(&self, url: &str, sequence: u64) -> WorkerResult<MediaChunk> {
        let duration = self.config.chunk_duration();
        let path = self.work_dir.join(format!("chunk_{:06}.ts", sequence));
        let started_at = unix_now();

        let limit = self.config.capture_deadline();
        let size = match tokio::time::timeout(limit, self.collab.capturer.capture(url, &path, duration)).await {
            Ok(result) => result.map_err(WorkerError::Capture)?,
            Err(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(WorkerError::Capture(clipwatch_media::MediaError::Timeout(limit)));
            }
        };

        Ok(MediaChunk::new(
            sequence,
            path,
            started_at,
            duration.as_secs_f64(),
            size,
        ))
    }

    async fn capture_loop(&self) {
        let logger = self.logger.for_loop("capture");
        logger.log_start("capturing");

        let mut shutdown = self.state.shutdown_signal();
        let mut cached_url: Option<(String, Instant)> = None;
        let mut sequence = 0u64;
        let max_failures = self.config.capture.max_consecutive_failures;
        // Ended streams fail every poll; stop warning once that is known.
        let mut failure_logs = FailureTracker::new(max_failures + 2);

        while self.state.is_running() {
            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.capture_next(&mut cached_url, sequence) => result,
            };

            match result {
                Ok(chunk) => {
                    sequence += 1;
                    crate::metrics::record_capture(chunk.size_bytes);
                    let (buffered, evicted) = {
                        let mut store = self.store.write();
                        let evicted = store.add_segment(chunk);
                        (store.len(), evicted)
                    };
                    crate::metrics::set_segments_buffered(buffered);
                    release_chunks(evicted);
                    failure_logs.record_success();

                    if self.state.record_capture_success() {
                        crate::metrics::record_capture_recovered();
                        crate::metrics::set_stream_ended(false);
                        logger.log_progress("Capture recovered, stream is live again");
                    }
                }
                Err(e) => {
                    // The stream may have moved; resolve again next time.
                    cached_url = None;
                    let failures = self.state.record_capture_failure();
                    crate::metrics::record_capture_failure(failures);
                    crate::metrics::record_failure(e.kind());
                    if failure_logs.record_failure() {
                        warn!(
                            failures,
                            max_failures,
                            kind = e.kind().as_str(),
                            timeout = e.is_timeout(),
                            "Capture failed: {}", e
                        );
                    } else {
                        debug!(failures, "Capture failed: {}", e);
                    }

                    if failures >= max_failures {
                        if self.state.enter_stream_ended() {
                            self.on_stream_ended(failures).await;
                        }
                        if !self.pause(&mut shutdown, self.config.capture.stream_ended_poll_interval).await {
                            break;
                        }
                        continue;
                    }

                    if !self.pause(&mut shutdown, self.config.capture.failure_retry_delay).await {
                        break;
                    }
                }
            }
        }

        logger.log_completion(&format!("captured {} chunks", sequence));
    }

    async fn on_stream_ended(&self, failures: u32) {
        crate::metrics::set_stream_ended(true);
        crate::metrics::record_failure(FailureKind::StreamEnded);
        let err = WorkerError::StreamEnded { failures };
        self.logger.for_loop("capture").log_warning(&err.to_string());

        let event = self.state.stream_ended_event(self.source_url.clone());
        if let Err(e) = self.collab.notifier.stream_ended(&event).await {
            crate::metrics::record_failure(FailureKind::Notification);
            warn!("Stream-ended notification failed: {}", e);
        }
    }

    /// Newest chunk not analyzed yet, once enough are buffered.
    fn next_chunk(&self, last_analyzed: Option<u64>) -> Option<ChunkRef> {
        let store = self.store.read();
        let min_buffered = match store.mode() {
            BufferMode::Segmented => self.config.detection.min_buffered_segments.min(store.capacity()),
            BufferMode::Bucketed => 1,
        };
        if store.len() < min_buffered {
            return None;
        }
        store
            .newest()
            .filter(|chunk| Some(chunk.sequence) != last_analyzed)
    }

    async fn analysis_loop(&self) -> WorkerResult<()> {
        let logger = self.logger.for_loop("analysis");
        logger.log_start("analyzing");

        let mut shutdown = self.state.shutdown_signal();
        let mut coverage = self.store.read().subscribe();
        let mut baseline = BaselineTracker::new(
            BaselineSettings::from(&self.config.detection),
            Instant::now(),
        );
        let mut policy = TriggerPolicy::from_config(&self.config.detection, self.config.cooldown());
        let mut last_analyzed: Option<u64> = None;
        let mut analyzed = 0u64;

        while self.state.is_running() {
            if let Some(chunk) = self.next_chunk(last_analyzed) {
                last_analyzed = Some(chunk.sequence);
                analyzed += 1;
                self.analyze_chunk(chunk, &mut baseline, &mut policy).await?;
                continue;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                changed = coverage.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        logger.log_completion(&format!("analyzed {} chunks", analyzed));
        Ok(())
    }

    async fn analyze_chunk(
        &self,
        chunk: ChunkRef,
        baseline: &mut BaselineTracker,
        policy: &mut TriggerPolicy,
    ) -> WorkerResult<()> {
        let started = std::time::Instant::now();
        let metrics = self.measure(&chunk).await;
        crate::metrics::record_analysis(started.elapsed());
        self.state.record_analysis(metrics);

        let probability = self.score(&chunk, &metrics).await;

        if baseline.observe(&metrics, Instant::now()) {
            self.logger.for_loop("analysis").log_progress("Adaptive baseline calibrated");
        }
        let anomaly = baseline.check_anomaly(&metrics);

        let timestamp = chunk.start_timestamp + chunk.nominal_duration / 2.0;
        let sequence = chunk.sequence;
        let decision = policy.evaluate(timestamp, &metrics, anomaly, probability);
        debug!(
            sequence,
            audio_level = metrics.audio_level,
            audio_db_change = metrics.audio_db_change,
            motion_level = metrics.motion_level,
            scene_change = metrics.scene_change,
            probability,
            accepted = decision.is_accepted(),
            "Chunk evaluated"
        );

        match decision {
            TriggerDecision::Accepted(event) => {
                crate::metrics::record_trigger(event.reason.source.as_str());
                self.state.record_accepted_trigger(event.timestamp);
                info!(
                    sequence,
                    timestamp,
                    reason = %event.reason,
                    confidence = event.confidence_percent,
                    "Highlight triggered"
                );

                // The analyzed chunk is still held, so its file outlives eviction.
                match self.assembler.assemble(&event, Some(chunk)).await {
                    Ok(record) => {
                        self.state.record_clip();
                        let payload = ClipCreated::from_record(&record, self.source_url.clone());
                        if let Err(e) = self.collab.notifier.clip_created(&payload).await {
                            crate::metrics::record_failure(FailureKind::Notification);
                            warn!(clip = %record.filename, "Clip notification failed: {}", e);
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        crate::metrics::record_failure(FailureKind::Encode);
                        return Err(e.into());
                    }
                    Err(e) => {
                        warn!(timestamp, "Clip assembly failed, trigger dropped: {}", e);
                    }
                }
            }
            TriggerDecision::Suppressed {
                reason,
                since_last_accepted,
            } => {
                crate::metrics::record_trigger_suppressed();
                debug!(
                    sequence,
                    %reason,
                    since_last_accepted,
                    "Trigger suppressed by cooldown"
                );
            }
            TriggerDecision::Quiet => {}
        }
        Ok(())
    }

    /// Analyzer metrics, or zeros when analysis fails.
    async fn measure(&self, chunk: &ChunkRef) -> ChunkMetrics {
        let limit = self.config.detection.analysis_timeout;
        match tokio::time::timeout(limit, self.collab.analyzer.analyze(&chunk.path)).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                let err = WorkerError::analysis(e.to_string());
                crate::metrics::record_failure(err.kind());
                warn!(sequence = chunk.sequence, "{}", err);
                ChunkMetrics::default()
            }
            Err(_) => {
                crate::metrics::record_failure(FailureKind::Analysis);
                warn!(sequence = chunk.sequence, "Chunk analysis timed out after {:?}", limit);
                ChunkMetrics::default()
            }
        }
    }

    /// ML probability for the chunk, when a scorer is configured and answers.
    async fn score(&self, chunk: &ChunkRef, metrics: &ChunkMetrics) -> Option<f64> {
        let scorer = self.collab.scorer.as_ref()?;

        let transcript = match &self.collab.transcripts {
            Some(source) => {
                let limit = self.config.notify.transcript_timeout;
                match tokio::time::timeout(limit, source.transcribe(&chunk.path)).await {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => {
                        debug!("Transcription failed: {}", e);
                        None
                    }
                    Err(_) => {
                        debug!("Transcription timed out");
                        None
                    }
                }
            }
            None => None,
        };

        let semantic = analyze_text(transcript.as_deref());
        let features = FeatureVector::new(metrics, &semantic);

        let limit = self.config.notify.scorer_timeout;
        match tokio::time::timeout(limit, scorer.score(&features)).await {
            Ok(Ok(p)) => Some(p),
            Ok(Err(e)) => {
                warn!("Excitement scoring failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Excitement scoring timed out after {:?}", limit);
                None
            }
        }
    }

    async fn publish_metrics(&self) -> WorkerResult<()> {
        let update = self.state.metrics_update();
        self.collab.notifier.metrics_update(&update).await?;
        Ok(())
    }

    async fn metrics_loop(&self) {
        let mut shutdown = self.state.shutdown_signal();
        let mut ticker = tokio::time::interval(self.config.notify.metrics_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut failures = FailureTracker::new(3);

        while self.state.is_running() {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => match self.publish_metrics().await {
                    Ok(()) => failures.record_success(),
                    Err(e) => {
                        crate::metrics::record_failure(e.kind());
                        if failures.record_failure() {
                            warn!(failures = failures.failure_count(), "Metrics update failed: {}", e);
                        }
                    }
                },
            }
        }
    }

    async fn cleanup(&self) {
        self.store.write().clear();
        crate::metrics::set_segments_buffered(0);
        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Ok(()) => debug!(dir = %self.work_dir.display(), "Removed work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.work_dir.display(), "Failed to remove work directory: {}", e),
        }
    }
}
