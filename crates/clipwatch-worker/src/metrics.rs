//! Prometheus metric names and recording helpers.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::error::FailureKind;

pub mod names {
    pub const CAPTURES_TOTAL: &str = "clipwatch_captures_total";
    pub const CAPTURE_FAILURES_TOTAL: &str = "clipwatch_capture_failures_total";
    pub const CAPTURE_BYTES_TOTAL: &str = "clipwatch_capture_bytes_total";
    pub const CONSECUTIVE_FAILURES: &str = "clipwatch_consecutive_failures";
    pub const STREAM_ENDED: &str = "clipwatch_stream_ended";
    pub const URL_ACQUISITIONS_TOTAL: &str = "clipwatch_url_acquisitions_total";
    pub const SEGMENTS_BUFFERED: &str = "clipwatch_segments_buffered";
    pub const CHUNKS_ANALYZED_TOTAL: &str = "clipwatch_chunks_analyzed_total";
    pub const ANALYSIS_DURATION_SECONDS: &str = "clipwatch_analysis_duration_seconds";
    pub const TRIGGERS_TOTAL: &str = "clipwatch_triggers_total";
    pub const TRIGGERS_SUPPRESSED_TOTAL: &str = "clipwatch_triggers_suppressed_total";
    pub const CLIPS_TOTAL: &str = "clipwatch_clips_total";
    pub const CLIP_ASSEMBLY_SECONDS: &str = "clipwatch_clip_assembly_seconds";
    pub const FAILURES_TOTAL: &str = "clipwatch_failures_total";
    pub const BASELINE_CALIBRATED: &str = "clipwatch_baseline_calibrated";
}

pub fn record_capture(size_bytes: u64) {
    counter!(names::CAPTURES_TOTAL).increment(1);
    counter!(names::CAPTURE_BYTES_TOTAL).increment(size_bytes);
}

pub fn record_capture_failure(consecutive: u32) {
    counter!(names::CAPTURE_FAILURES_TOTAL).increment(1);
    gauge!(names::CONSECUTIVE_FAILURES).set(consecutive as f64);
}

pub fn record_capture_recovered() {
    gauge!(names::CONSECUTIVE_FAILURES).set(0.0);
}

pub fn set_stream_ended(ended: bool) {
    gauge!(names::STREAM_ENDED).set(if ended { 1.0 } else { 0.0 });
}

pub fn record_url_acquisition(success: bool, attempts: u32) {
    let result = if success { "success" } else { "exhausted" };
    counter!(names::URL_ACQUISITIONS_TOTAL, "result" => result).increment(1);
    histogram!("clipwatch_url_acquisition_attempts").record(attempts as f64);
}

pub fn set_segments_buffered(count: usize) {
    gauge!(names::SEGMENTS_BUFFERED).set(count as f64);
}

pub fn record_analysis(duration: Duration) {
    counter!(names::CHUNKS_ANALYZED_TOTAL).increment(1);
    histogram!(names::ANALYSIS_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_trigger(source: &'static str) {
    counter!(names::TRIGGERS_TOTAL, "source" => source).increment(1);
}

pub fn record_trigger_suppressed() {
    counter!(names::TRIGGERS_SUPPRESSED_TOTAL).increment(1);
}

pub fn record_clip(assembly: &'static str, duration: Duration) {
    counter!(names::CLIPS_TOTAL, "assembly" => assembly).increment(1);
    histogram!(names::CLIP_ASSEMBLY_SECONDS).record(duration.as_secs_f64());
}

pub fn record_failure(kind: FailureKind) {
    counter!(names::FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn set_baseline_calibrated(calibrated: bool) {
    gauge!(names::BASELINE_CALIBRATED).set(if calibrated { 1.0 } else { 0.0 });
}
