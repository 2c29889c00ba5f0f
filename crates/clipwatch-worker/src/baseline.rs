//! Calibrated per-channel baselines and z-score anomaly checks.
//!
//! The tracker starts out calibrating: every analysed chunk contributes
//! audio, motion and scene samples. Once the calibration period has elapsed
//! and enough samples were seen, mean and standard deviation are frozen and
//! later samples are scored against them.

use std::collections::VecDeque;
use std::time::Duration;

use clipwatch_models::{ChunkMetrics, MetricChannel};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DetectionConfig, Sensitivities};

/// Frozen statistics for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub sample_count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub floor_std_dev: f64,
    pub sensitivity: f64,
}

impl BaselineStats {
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }
}

/// A channel that deviated from its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anomaly {
    pub channel: MetricChannel,
    pub z_score: f64,
    pub confidence_percent: u8,
}

impl Anomaly {
    pub fn label(&self) -> String {
        let name = match self.channel {
            MetricChannel::Audio => "Audio",
            MetricChannel::Motion => "Motion",
            MetricChannel::Scene => "Scene",
        };
        format!("Adaptive {} Anomaly ({:.1}σ)", name, self.z_score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Calibrating,
    Calibrated,
}

/// Per-channel `(mean, std_dev)` used when statistics cannot be computed.
#[derive(Debug, Clone, Copy)]
struct ChannelDefaults {
    floor_std_dev: f64,
    fallback_mean: f64,
    fallback_std_dev: f64,
}

const fn channel_defaults(channel: MetricChannel) -> ChannelDefaults {
    match channel {
        MetricChannel::Audio => ChannelDefaults {
            floor_std_dev: 3.0,
            fallback_mean: 40.0,
            fallback_std_dev: 15.0,
        },
        MetricChannel::Motion => ChannelDefaults {
            floor_std_dev: 3.0,
            fallback_mean: 20.0,
            fallback_std_dev: 15.0,
        },
        MetricChannel::Scene => ChannelDefaults {
            floor_std_dev: 0.05,
            fallback_mean: 0.1,
            fallback_std_dev: 0.1,
        },
    }
}

fn channel_index(channel: MetricChannel) -> usize {
    match channel {
        MetricChannel::Audio => 0,
        MetricChannel::Motion => 1,
        MetricChannel::Scene => 2,
    }
}

fn channel_value(metrics: &ChunkMetrics, channel: MetricChannel) -> f64 {
    match channel {
        MetricChannel::Audio => metrics.audio_level,
        MetricChannel::Motion => metrics.motion_level,
        MetricChannel::Scene => metrics.scene_change,
    }
}

fn sensitivity_for(sensitivities: &Sensitivities, channel: MetricChannel) -> f64 {
    match channel {
        MetricChannel::Audio => sensitivities.audio,
        MetricChannel::Motion => sensitivities.motion,
        MetricChannel::Scene => sensitivities.scene,
    }
}

/// Population mean and standard deviation.
fn mean_std(samples: &VecDeque<f64>) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Calibration settings.
#[derive(Debug, Clone)]
pub struct BaselineSettings {
    pub calibration_period: Duration,
    pub min_samples: usize,
    pub history_cap: usize,
    pub sensitivities: Sensitivities,
}

impl From<&DetectionConfig> for BaselineSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            calibration_period: config.calibration_period,
            min_samples: config.min_calibration_samples,
            history_cap: config.history_cap,
            sensitivities: config.sensitivities,
        }
    }
}

/// Adaptive baseline over audio, motion and scene signals.
#[derive(Debug)]
pub struct BaselineTracker {
    settings: BaselineSettings,
    state: CalibrationState,
    started: Instant,
    samples_seen: usize,
    history: [VecDeque<f64>; 3],
    stats: Option<[BaselineStats; 3]>,
}

impl BaselineTracker {
    pub fn new(settings: BaselineSettings, now: Instant) -> Self {
        let cap = settings.history_cap;
        Self {
            settings,
            state: CalibrationState::Calibrating,
            started: now,
            samples_seen: 0,
            history: std::array::from_fn(|_| VecDeque::with_capacity(cap)),
            stats: None,
        }
    }

    /// A tracker that is already calibrated with the given statistics.
    pub fn with_baseline(settings: BaselineSettings, stats: [BaselineStats; 3], now: Instant) -> Self {
        let mut tracker = Self::new(settings, now);
        tracker.stats = Some(stats);
        tracker.state = CalibrationState::Calibrated;
        tracker
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }

    pub fn stats(&self, channel: MetricChannel) -> Option<BaselineStats> {
        self.stats.map(|s| s[channel_index(channel)])
    }

    /// Feed one sample. Returns `true` when this call completed calibration.
    ///
    /// Samples are ignored once calibrated.
    pub fn observe(&mut self, metrics: &ChunkMetrics, now: Instant) -> bool {
        if self.is_calibrated() {
            return false;
        }

        self.samples_seen += 1;
        for channel in MetricChannel::PRIORITY {
            let value = channel_value(metrics, channel);
            if !value.is_finite() {
                continue;
            }
            let history = &mut self.history[channel_index(channel)];
            history.push_back(value);
            while history.len() > self.settings.history_cap {
                history.pop_front();
            }
        }

        if now.saturating_duration_since(self.started) < self.settings.calibration_period {
            return false;
        }

        if self.samples_seen < self.settings.min_samples {
            debug!(
                samples = self.samples_seen,
                min = self.settings.min_samples,
                "Calibration deferred, not enough samples"
            );
            return false;
        }

        self.finalize();
        true
    }

    fn finalize(&mut self) {
        let stats = MetricChannel::PRIORITY.map(|channel| {
            let history = &self.history[channel_index(channel)];
            let defaults = channel_defaults(channel);
            let sensitivity = sensitivity_for(&self.settings.sensitivities, channel);

            let (mean, std_dev) = if history.is_empty() {
                (f64::NAN, f64::NAN)
            } else {
                mean_std(history)
            };

            if mean.is_finite() && std_dev.is_finite() {
                BaselineStats {
                    sample_count: history.len(),
                    mean,
                    std_dev: std_dev.max(defaults.floor_std_dev),
                    floor_std_dev: defaults.floor_std_dev,
                    sensitivity,
                }
            } else {
                warn!(%channel, "Baseline statistics unavailable, using defaults");
                BaselineStats {
                    sample_count: history.len(),
                    mean: defaults.fallback_mean,
                    std_dev: defaults.fallback_std_dev,
                    floor_std_dev: defaults.floor_std_dev,
                    sensitivity,
                }
            }
        });

        info!(
            samples = self.samples_seen,
            audio_mean = stats[0].mean,
            audio_std = stats[0].std_dev,
            motion_mean = stats[1].mean,
            motion_std = stats[1].std_dev,
            scene_mean = stats[2].mean,
            scene_std = stats[2].std_dev,
            "Baseline calibrated"
        );

        self.stats = Some(stats);
        self.state = CalibrationState::Calibrated;
        crate::metrics::set_baseline_calibrated(true);
    }

    /// First channel, in priority order, whose z-score reaches its sensitivity.
    pub fn check_anomaly(&self, metrics: &ChunkMetrics) -> Option<Anomaly> {
        let stats = self.stats.as_ref()?;

        MetricChannel::PRIORITY.into_iter().find_map(|channel| {
            let s = &stats[channel_index(channel)];
            let z = s.z_score(channel_value(metrics, channel));
            if z.is_finite() && z >= s.sensitivity {
                let confidence = (z / s.sensitivity * 100.0).round().min(100.0);
                Some(Anomaly {
                    channel,
                    z_score: z,
                    confidence_percent: confidence as u8,
                })
            } else {
                None
            }
        })
    }

    /// Discard the baseline and start a new calibration period.
    pub fn recalibrate(&mut self, now: Instant) {
        info!("Recalibrating baseline");
        self.state = CalibrationState::Calibrating;
        self.started = now;
        self.samples_seen = 0;
        self.stats = None;
        for history in &mut self.history {
            history.clear();
        }
        crate::metrics::set_baseline_calibrated(false);
    }
}
