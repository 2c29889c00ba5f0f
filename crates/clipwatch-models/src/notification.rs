//! Payloads sent to the external notification sink.
//!
//! All payloads serialize to camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::ChunkMetrics;
use crate::clip::ClipRecord;
use crate::timestamp::format_uptime;

/// Sent once per finished clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipCreated {
    pub filename: String,
    /// Source the session is watching
    pub original_url: String,
    /// Clip duration in seconds
    pub duration: f64,
    pub file_size: u64,
    pub trigger_reason: String,
}

impl ClipCreated {
    pub fn from_record(record: &ClipRecord, original_url: impl Into<String>) -> Self {
        Self {
            filename: record.filename.clone(),
            original_url: original_url.into(),
            duration: record.duration,
            file_size: record.file_size_bytes,
            trigger_reason: record.trigger_reason.clone(),
        }
    }
}

/// Periodic processing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub is_processing: bool,
    pub frames_processed: u64,
    /// Uptime as `HH:MM:SS`
    pub stream_uptime: String,
    pub audio_level: f64,
    pub motion_level: f64,
    pub scene_change: f64,
    pub clips_generated: u64,
    pub stream_ended: bool,
    pub consecutive_failures: u32,
    pub last_successful_capture: Option<DateTime<Utc>>,
}

impl MetricsUpdate {
    /// Build a snapshot from counters and the latest analysis metrics.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        is_processing: bool,
        frames_processed: u64,
        uptime_secs: f64,
        latest: &ChunkMetrics,
        clips_generated: u64,
        stream_ended: bool,
        consecutive_failures: u32,
        last_successful_capture: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            is_processing,
            frames_processed,
            stream_uptime: format_uptime(uptime_secs),
            audio_level: latest.audio_level,
            motion_level: latest.motion_level,
            scene_change: latest.scene_change,
            clips_generated,
            stream_ended,
            consecutive_failures,
            last_successful_capture,
        }
    }
}

/// Sent once when the stream is judged to have ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnded {
    pub url: String,
    pub end_time: DateTime<Utc>,
    pub total_clips: u64,
    /// Session uptime in seconds
    pub total_duration: f64,
    pub last_successful_capture: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::clip::AssemblyMethod;

    #[test]
    fn test_clip_created_is_camel_case() {
        let record = ClipRecord {
            filename: "highlight_20240101_120000.mp4".to_string(),
            path: PathBuf::from("/clips/highlight_20240101_120000.mp4"),
            source_window_start: 96.0,
            source_window_end: 116.0,
            duration: 20.0,
            trigger_reason: "Audio Spike".to_string(),
            file_size_bytes: 2048,
            assembly: AssemblyMethod::Encoded,
            thumbnail: None,
        };

        let json = serde_json::to_value(ClipCreated::from_record(&record, "somechannel")).unwrap();
        assert_eq!(json["originalUrl"], "somechannel");
        assert_eq!(json["fileSize"], 2048);
        assert_eq!(json["triggerReason"], "Audio Spike");
    }

    #[test]
    fn test_metrics_update_formats_uptime() {
        let metrics = ChunkMetrics {
            audio_level: 42.0,
            ..Default::default()
        };
        let update = MetricsUpdate::new(true, 10, 3725.0, &metrics, 1, false, 0, None);
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["streamUptime"], "01:02:05");
        assert_eq!(json["audioLevel"], 42.0);
        assert_eq!(json["isProcessing"], true);
        assert!(json["lastSuccessfulCapture"].is_null());
    }
}
