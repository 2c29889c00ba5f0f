//! Processor configuration.
//!
//! Built once at startup from `CLIPWATCH_*` environment variables,
//! validated, then shared read-only.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clipwatch_models::BufferMode;
use url::Url;

use crate::error::{WorkerError, WorkerResult};

const ENV_PREFIX: &str = "CLIPWATCH_";

/// What to do when a clip fails to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeFailurePolicy {
    /// Stream-copy the same window instead
    #[default]
    FallbackCopy,
    /// Stop the processor
    Halt,
}

impl FromStr for EncodeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fallback_copy" | "fallback" | "copy" => Ok(Self::FallbackCopy),
            "halt" | "stop" => Ok(Self::Halt),
            other => Err(format!("unknown encode failure policy: {}", other)),
        }
    }
}

/// Source stream and URL acquisition.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Channel name or full source URL
    pub channel: String,
    pub quality: String,
    /// Attempts per clean-URL acquisition
    pub acquire_attempts: u32,
    /// Wait between acquisition attempts
    pub acquire_interval: Duration,
    /// How long a cached clean URL is trusted before re-checking it
    pub url_revalidate_interval: Duration,
    /// Require the stream to stay clean this long before starting
    pub stability_check: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            quality: "best".to_string(),
            acquire_attempts: 30,
            acquire_interval: Duration::from_secs(2),
            url_revalidate_interval: Duration::from_secs(60),
            stability_check: None,
        }
    }
}

/// Live capture and buffering.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub buffer_mode: BufferMode,
    /// Segment length in segmented mode
    pub segment_duration: Duration,
    /// Rolling window length; derived from the clip length when unset
    pub window: Option<Duration>,
    /// Extra capture time allowed beyond the chunk duration
    pub timeout_slack: Duration,
    /// Time past the capture timeout before the loop abandons a capture call
    pub abandon_grace: Duration,
    pub max_consecutive_failures: u32,
    /// Wait after a failed capture while the stream is live
    pub failure_retry_delay: Duration,
    /// Capture cadence once the stream is judged ended
    pub stream_ended_poll_interval: Duration,
    /// Parent of per-session segment directories
    pub work_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_mode: BufferMode::Segmented,
            segment_duration: Duration::from_secs(2),
            window: None,
            timeout_slack: clipwatch_media::CAPTURE_TIMEOUT_SLACK,
            abandon_grace: Duration::from_secs(5),
            max_consecutive_failures: 5,
            failure_retry_delay: Duration::from_secs(2),
            stream_ended_poll_interval: Duration::from_secs(30),
            work_dir: std::env::temp_dir().join("clipwatch"),
        }
    }
}

/// Per-channel z-score sensitivities.
#[derive(Debug, Clone, Copy)]
pub struct Sensitivities {
    pub audio: f64,
    pub motion: f64,
    pub scene: f64,
}

impl Default for Sensitivities {
    fn default() -> Self {
        Self {
            audio: 2.5,
            motion: 2.0,
            scene: 1.5,
        }
    }
}

/// Highlight detection.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Fires when the audio spike metric reaches this value
    pub audio_threshold: f64,
    /// Fires when motion reaches this percentage
    pub motion_threshold: f64,
    /// Fires when the scene-change score exceeds this value
    pub scene_threshold: f64,
    pub calibration_period: Duration,
    pub min_calibration_samples: usize,
    pub history_cap: usize,
    pub sensitivities: Sensitivities,
    pub ml_threshold: f64,
    /// Consecutive ML outcomes that must all pass
    pub ml_consecutive: usize,
    /// Minimum gap between accepted triggers; the clip length when unset
    pub cooldown: Option<Duration>,
    pub analysis_timeout: Duration,
    /// Segments buffered before analysis starts
    pub min_buffered_segments: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            audio_threshold: 6.0,
            motion_threshold: 30.0,
            scene_threshold: 0.4,
            calibration_period: Duration::from_secs(60),
            min_calibration_samples: 10,
            history_cap: 1000,
            sensitivities: Sensitivities::default(),
            ml_threshold: 0.8,
            ml_consecutive: 2,
            cooldown: None,
            analysis_timeout: Duration::from_secs(10),
            min_buffered_segments: 3,
        }
    }
}

/// Clip output.
#[derive(Debug, Clone)]
pub struct ClipConfig {
    pub clip_length: Duration,
    /// Share of the clip before the detection moment
    pub pre_fraction: f64,
    /// Share of the clip after the detection moment
    pub post_fraction: f64,
    pub clips_dir: PathBuf,
    pub encode_timeout: Duration,
    pub encode_failure_policy: EncodeFailurePolicy,
    pub thumbnails: bool,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            clip_length: Duration::from_secs(20),
            pre_fraction: 0.2,
            post_fraction: 0.8,
            clips_dir: PathBuf::from("clips"),
            encode_timeout: Duration::from_secs(30),
            encode_failure_policy: EncodeFailurePolicy::FallbackCopy,
            thumbnails: true,
        }
    }
}

/// External services.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Web server receiving clip and metrics events; log only when unset
    pub base_url: Option<Url>,
    pub metrics_interval: Duration,
    pub scorer_url: Option<Url>,
    pub scorer_timeout: Duration,
    pub transcript_url: Option<Url>,
    pub transcript_timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            metrics_interval: Duration::from_secs(1),
            scorer_url: None,
            scorer_timeout: Duration::from_secs(2),
            transcript_url: None,
            transcript_timeout: Duration::from_secs(10),
        }
    }
}

/// Complete processor configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    pub stream: StreamConfig,
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub clip: ClipConfig,
    pub notify: NotifyConfig,
}

impl ProcessorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup (keys include the prefix).
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let stream = StreamConfig {
            channel: env.string("CHANNEL").unwrap_or(defaults.stream.channel),
            quality: env.string("QUALITY").unwrap_or(defaults.stream.quality),
            acquire_attempts: env
                .parse("ACQUIRE_ATTEMPTS")?
                .unwrap_or(defaults.stream.acquire_attempts),
            acquire_interval: env
                .secs("ACQUIRE_INTERVAL_SECS")?
                .unwrap_or(defaults.stream.acquire_interval),
            url_revalidate_interval: env
                .secs("URL_REVALIDATE_SECS")?
                .unwrap_or(defaults.stream.url_revalidate_interval),
            stability_check: env
                .secs("STABILITY_CHECK_SECS")?
                .filter(|d| !d.is_zero()),
        };

        let capture = CaptureConfig {
            buffer_mode: env
                .parse("BUFFER_MODE")?
                .unwrap_or(defaults.capture.buffer_mode),
            segment_duration: env
                .secs("SEGMENT_SECS")?
                .unwrap_or(defaults.capture.segment_duration),
            window: env.secs("WINDOW_SECS")?,
            timeout_slack: env
                .secs("CAPTURE_SLACK_SECS")?
                .unwrap_or(defaults.capture.timeout_slack),
            abandon_grace: env
                .secs("CAPTURE_GRACE_SECS")?
                .unwrap_or(defaults.capture.abandon_grace),
            max_consecutive_failures: env
                .parse("MAX_CONSECUTIVE_FAILURES")?
                .unwrap_or(defaults.capture.max_consecutive_failures),
            failure_retry_delay: env
                .secs("FAILURE_RETRY_SECS")?
                .unwrap_or(defaults.capture.failure_retry_delay),
            stream_ended_poll_interval: env
                .secs("STREAM_ENDED_POLL_SECS")?
                .unwrap_or(defaults.capture.stream_ended_poll_interval),
            work_dir: env
                .string("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.capture.work_dir),
        };

        let d = defaults.detection;
        let detection = DetectionConfig {
            audio_threshold: env.parse("AUDIO_THRESHOLD")?.unwrap_or(d.audio_threshold),
            motion_threshold: env.parse("MOTION_THRESHOLD")?.unwrap_or(d.motion_threshold),
            scene_threshold: env.parse("SCENE_THRESHOLD")?.unwrap_or(d.scene_threshold),
            calibration_period: env
                .secs("CALIBRATION_SECS")?
                .unwrap_or(d.calibration_period),
            min_calibration_samples: env
                .parse("MIN_CALIBRATION_SAMPLES")?
                .unwrap_or(d.min_calibration_samples),
            history_cap: env.parse("HISTORY_CAP")?.unwrap_or(d.history_cap),
            sensitivities: Sensitivities {
                audio: env
                    .parse("AUDIO_SENSITIVITY")?
                    .unwrap_or(d.sensitivities.audio),
                motion: env
                    .parse("MOTION_SENSITIVITY")?
                    .unwrap_or(d.sensitivities.motion),
                scene: env
                    .parse("SCENE_SENSITIVITY")?
                    .unwrap_or(d.sensitivities.scene),
            },
            ml_threshold: env.parse("ML_THRESHOLD")?.unwrap_or(d.ml_threshold),
            ml_consecutive: env.parse("ML_CONSECUTIVE")?.unwrap_or(d.ml_consecutive),
            cooldown: env.secs("COOLDOWN_SECS")?,
            analysis_timeout: env
                .secs("ANALYSIS_TIMEOUT_SECS")?
                .unwrap_or(d.analysis_timeout),
            min_buffered_segments: env
                .parse("MIN_BUFFERED_SEGMENTS")?
                .unwrap_or(d.min_buffered_segments),
        };

        let c = defaults.clip;
        let clip = ClipConfig {
            clip_length: env.secs("CLIP_LENGTH")?.unwrap_or(c.clip_length),
            pre_fraction: env.parse("PRE_FRACTION")?.unwrap_or(c.pre_fraction),
            post_fraction: env.parse("POST_FRACTION")?.unwrap_or(c.post_fraction),
            clips_dir: env
                .string("CLIPS_DIR")
                .map(PathBuf::from)
                .unwrap_or(c.clips_dir),
            encode_timeout: env
                .secs("ENCODE_TIMEOUT_SECS")?
                .unwrap_or(c.encode_timeout),
            encode_failure_policy: env
                .parse("ENCODE_FAILURE_POLICY")?
                .unwrap_or(c.encode_failure_policy),
            thumbnails: env.parse("THUMBNAILS")?.unwrap_or(c.thumbnails),
        };

        let n = defaults.notify;
        let notify = NotifyConfig {
            base_url: env.url("NOTIFY_URL")?,
            metrics_interval: env
                .secs("METRICS_INTERVAL_SECS")?
                .unwrap_or(n.metrics_interval),
            scorer_url: env.url("SCORER_URL")?,
            scorer_timeout: env
                .secs("SCORER_TIMEOUT_SECS")?
                .unwrap_or(n.scorer_timeout),
            transcript_url: env.url("TRANSCRIPT_URL")?,
            transcript_timeout: env
                .secs("TRANSCRIPT_TIMEOUT_SECS")?
                .unwrap_or(n.transcript_timeout),
        };

        Ok(Self {
            stream,
            capture,
            detection,
            clip,
            notify,
        })
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.stream.channel.trim().is_empty() {
            return Err(WorkerError::config_error("channel must be set"));
        }
        if self.stream.acquire_attempts == 0 {
            return Err(WorkerError::config_error("acquire_attempts must be at least 1"));
        }
        if self.capture.segment_duration.is_zero() {
            return Err(WorkerError::config_error("segment duration must be positive"));
        }
        if self.clip.clip_length.is_zero() {
            return Err(WorkerError::config_error("clip length must be positive"));
        }
        if self.buffer_window() < self.clip.clip_length {
            return Err(WorkerError::config_error(format!(
                "buffer window {:?} is shorter than the clip length {:?}",
                self.buffer_window(),
                self.clip.clip_length
            )));
        }
        if self.capture.max_consecutive_failures == 0 {
            return Err(WorkerError::config_error(
                "max_consecutive_failures must be at least 1",
            ));
        }

        let pre = self.clip.pre_fraction;
        let post = self.clip.post_fraction;
        if !(0.0..=1.0).contains(&pre) || !(0.0..=1.0).contains(&post) {
            return Err(WorkerError::config_error("clip fractions must be within 0..1"));
        }
        if ((pre + post) - 1.0).abs() > 1e-6 {
            return Err(WorkerError::config_error(format!(
                "pre and post fractions must sum to 1, got {}",
                pre + post
            )));
        }

        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.ml_threshold) {
            return Err(WorkerError::config_error("ml_threshold must be within 0..1"));
        }
        if d.ml_consecutive == 0 {
            return Err(WorkerError::config_error("ml_consecutive must be at least 1"));
        }
        if d.min_calibration_samples == 0 || d.history_cap < d.min_calibration_samples {
            return Err(WorkerError::config_error(
                "history cap must hold at least min_calibration_samples samples",
            ));
        }
        let s = d.sensitivities;
        if s.audio <= 0.0 || s.motion <= 0.0 || s.scene <= 0.0 {
            return Err(WorkerError::config_error("sensitivities must be positive"));
        }
        if d.min_buffered_segments == 0 {
            return Err(WorkerError::config_error("min_buffered_segments must be at least 1"));
        }
        if self.notify.metrics_interval.is_zero() {
            return Err(WorkerError::config_error("metrics interval must be positive"));
        }

        Ok(())
    }

    /// Rolling buffer length: explicit, or `max(30s, 2 x clip length)`.
    pub fn buffer_window(&self) -> Duration {
        self.capture
            .window
            .unwrap_or_else(|| Duration::from_secs(30).max(self.clip.clip_length * 2))
    }

    /// Duration of one captured chunk for the configured buffer mode.
    pub fn chunk_duration(&self) -> Duration {
        match self.capture.buffer_mode {
            BufferMode::Segmented => self.capture.segment_duration,
            BufferMode::Bucketed => self.clip.clip_length,
        }
    }

    /// Number of chunks the store keeps.
    pub fn store_capacity(&self) -> usize {
        match self.capture.buffer_mode {
            BufferMode::Segmented => {
                let n = self.buffer_window().as_secs_f64() / self.capture.segment_duration.as_secs_f64();
                (n.floor() as usize).max(1)
            }
            BufferMode::Bucketed => 1,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.detection.cooldown.unwrap_or(self.clip.clip_length)
    }

    /// Capture timeout for one chunk.
    pub fn capture_timeout(&self) -> Duration {
        self.chunk_duration() + self.capture.timeout_slack
    }

    /// Hard limit on one capture call as seen by the capture loop.
    pub fn capture_deadline(&self) -> Duration {
        self.capture_timeout() + self.capture.abandon_grace
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> WorkerResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                WorkerError::config_error(format!("{}{}={:?}: {}", ENV_PREFIX, key, raw, e))
            }),
        }
    }

    fn secs(&self, key: &str) -> WorkerResult<Option<Duration>> {
        match self.parse::<f64>(key)? {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(WorkerError::config_error(format!(
                "{}{} must be a non-negative number of seconds, got {}",
                ENV_PREFIX, key, secs
            ))),
        }
    }

    fn url(&self, key: &str) -> WorkerResult<Option<Url>> {
        self.parse::<Url>(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> WorkerResult<ProcessorConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        ProcessorConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("CHANNEL", "somechannel")]).unwrap();
        config.validate().unwrap();

        assert_eq!(config.clip.clip_length, Duration::from_secs(20));
        assert_eq!(config.buffer_window(), Duration::from_secs(40));
        assert_eq!(config.store_capacity(), 20);
        assert_eq!(config.cooldown(), Duration::from_secs(20));
        assert_eq!(config.capture_timeout(), Duration::from_secs(15));
        assert_eq!(config.capture_deadline(), Duration::from_secs(20));
        assert_eq!(config.detection.ml_consecutive, 2);
        assert_eq!(config.clip.encode_failure_policy, EncodeFailurePolicy::FallbackCopy);
    }

    #[test]
    fn test_short_clip_keeps_30s_window() {
        let config = config_from(&[("CHANNEL", "c"), ("CLIP_LENGTH", "10")]).unwrap();
        assert_eq!(config.buffer_window(), Duration::from_secs(30));
        assert_eq!(config.store_capacity(), 15);
    }

    #[test]
    fn test_bucketed_mode() {
        let config = config_from(&[("CHANNEL", "c"), ("BUFFER_MODE", "bucketed")]).unwrap();
        assert_eq!(config.store_capacity(), 1);
        assert_eq!(config.chunk_duration(), Duration::from_secs(20));
    }

    #[test]
    fn test_overrides_and_policy() {
        let config = config_from(&[
            ("CHANNEL", "c"),
            ("COOLDOWN_SECS", "7.5"),
            ("ENCODE_FAILURE_POLICY", "halt"),
            ("NOTIFY_URL", "http://localhost:5000"),
        ])
        .unwrap();

        assert_eq!(config.cooldown(), Duration::from_millis(7500));
        assert_eq!(config.clip.encode_failure_policy, EncodeFailurePolicy::Halt);
        assert_eq!(
            config.notify.base_url.as_ref().map(Url::as_str),
            Some("http://localhost:5000/")
        );
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config_from(&[("SEGMENT_SECS", "abc")]).is_err());
        assert!(config_from(&[("CLIP_LENGTH", "-4")]).is_err());
        assert!(config_from(&[("NOTIFY_URL", "not a url")]).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        let missing_channel = config_from(&[]).unwrap();
        assert!(missing_channel.validate().is_err());

        let fractions = config_from(&[("CHANNEL", "c"), ("PRE_FRACTION", "0.5")]).unwrap();
        assert!(fractions.validate().is_err());

        let window = config_from(&[("CHANNEL", "c"), ("WINDOW_SECS", "10")]).unwrap();
        assert!(window.validate().is_err());
    }
}
