//! Processor state shared between the loops.
//!
//! Flags and counters are atomics. Timestamps and the latest metrics live
//! behind `parking_lot` mutexes that are never held across an await.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use clipwatch_models::{ChunkMetrics, MetricsUpdate, ProcessorStatus, StreamEnded};
use parking_lot::Mutex;
use tokio::sync::watch;

pub struct ProcessorState {
    running: AtomicBool,
    stopped: AtomicBool,
    stream_ended: AtomicBool,
    consecutive_failures: AtomicU32,
    frames_processed: AtomicU64,
    chunks_captured: AtomicU64,
    clips_generated: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    last_successful_capture: Mutex<Option<DateTime<Utc>>>,
    /// Unix seconds of the last accepted trigger
    last_accepted_trigger: Mutex<Option<f64>>,
    latest_metrics: Mutex<ChunkMetrics>,
    shutdown: watch::Sender<bool>,
}

impl Default for ProcessorState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorState {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stream_ended: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            frames_processed: AtomicU64::new(0),
            chunks_captured: AtomicU64::new(0),
            clips_generated: AtomicU64::new(0),
            started_at: Mutex::new(None),
            last_successful_capture: Mutex::new(None),
            last_accepted_trigger: Mutex::new(None),
            latest_metrics: Mutex::new(ChunkMetrics::default()),
            shutdown,
        }
    }

    /// Mark the processor running and start the uptime clock.
    ///
    /// Has no effect once stopped.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        *self.started_at.lock() = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);
    }

    /// Request every loop to exit. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` on [`stop`](Self::stop).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn status(&self) -> ProcessorStatus {
        if self.stopped.load(Ordering::SeqCst) {
            ProcessorStatus::Stopped
        } else if !self.is_running() {
            ProcessorStatus::Idle
        } else if self.is_stream_ended() {
            ProcessorStatus::StreamEnded
        } else {
            ProcessorStatus::Running
        }
    }

    /// Record a successful capture. Returns true if this cleared a
    /// stream-ended state.
    pub fn record_capture_success(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.chunks_captured.fetch_add(1, Ordering::Relaxed);
        *self.last_successful_capture.lock() = Some(Utc::now());
        self.stream_ended.swap(false, Ordering::SeqCst)
    }

    /// Record a failed capture and return the new consecutive count.
    pub fn record_capture_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Enter the stream-ended state. Returns true only on the transition.
    pub fn enter_stream_ended(&self) -> bool {
        !self.stream_ended.swap(true, Ordering::SeqCst)
    }

    pub fn is_stream_ended(&self) -> bool {
        self.stream_ended.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn chunks_captured(&self) -> u64 {
        self.chunks_captured.load(Ordering::Relaxed)
    }

    pub fn last_successful_capture(&self) -> Option<DateTime<Utc>> {
        *self.last_successful_capture.lock()
    }

    /// Store the metrics of the newest analyzed chunk.
    pub fn record_analysis(&self, metrics: ChunkMetrics) {
        self.frames_processed
            .fetch_add(metrics.frames_analyzed, Ordering::Relaxed);
        *self.latest_metrics.lock() = metrics;
    }

    pub fn latest_metrics(&self) -> ChunkMetrics {
        *self.latest_metrics.lock()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn record_accepted_trigger(&self, timestamp: f64) {
        *self.last_accepted_trigger.lock() = Some(timestamp);
    }

    pub fn last_accepted_trigger(&self) -> Option<f64> {
        *self.last_accepted_trigger.lock()
    }

    pub fn record_clip(&self) -> u64 {
        self.clips_generated.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn clips_generated(&self) -> u64 {
        self.clips_generated.load(Ordering::SeqCst)
    }

    /// Seconds since [`start`](Self::start), zero before it.
    pub fn uptime_secs(&self) -> f64 {
        self.started_at
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn metrics_update(&self) -> MetricsUpdate {
        MetricsUpdate::new(
            self.is_running(),
            self.frames_processed(),
            self.uptime_secs(),
            &self.latest_metrics(),
            self.clips_generated(),
            self.is_stream_ended(),
            self.consecutive_failures(),
            self.last_successful_capture(),
        )
    }

    pub fn stream_ended_event(&self, url: impl Into<String>) -> StreamEnded {
        StreamEnded {
            url: url.into(),
            end_time: Utc::now(),
            total_clips: self.clips_generated(),
            total_duration: self.uptime_secs(),
            last_successful_capture: self.last_successful_capture(),
        }
    }
}
