//! Trigger fusion and cooldown.

use std::collections::VecDeque;
use std::time::Duration;

use clipwatch_models::{ChunkMetrics, MetricChannel, TriggerEvent, TriggerReason, TriggerSource};

use crate::baseline::Anomaly;
use crate::config::DetectionConfig;

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    Accepted(TriggerEvent),
    /// A rule fired but the cooldown rejected it.
    Suppressed {
        reason: TriggerReason,
        since_last_accepted: f64,
    },
    Quiet,
}

impl TriggerDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TriggerDecision::Accepted(_))
    }
}

/// Fixed rule thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Audio spike metric, inclusive
    pub audio: f64,
    /// Motion percentage, inclusive
    pub motion: f64,
    /// Scene-change score, exclusive
    pub scene: f64,
}

impl Thresholds {
    /// First rule that fires, in audio, motion, scene order.
    pub fn evaluate(&self, metrics: &ChunkMetrics) -> Option<(TriggerReason, u8)> {
        if metrics.audio_db_change >= self.audio {
            return Some((
                TriggerReason::new(TriggerSource::Threshold, Some(MetricChannel::Audio), "Audio Spike"),
                ratio_confidence(metrics.audio_db_change, self.audio),
            ));
        }
        if metrics.motion_level >= self.motion {
            return Some((
                TriggerReason::new(
                    TriggerSource::Threshold,
                    Some(MetricChannel::Motion),
                    "Motion Detected",
                ),
                ratio_confidence(metrics.motion_level, self.motion),
            ));
        }
        if metrics.scene_change > self.scene {
            return Some((
                TriggerReason::new(TriggerSource::Threshold, Some(MetricChannel::Scene), "Scene Change"),
                ratio_confidence(metrics.scene_change, self.scene),
            ));
        }
        None
    }
}

fn ratio_confidence(value: f64, threshold: f64) -> u8 {
    if threshold <= 0.0 {
        return 100;
    }
    (value / threshold * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Sliding window of the last `K` ML outcomes.
#[derive(Debug, Clone)]
struct ConsecutiveWindow {
    outcomes: VecDeque<bool>,
    required: usize,
}

impl ConsecutiveWindow {
    fn new(required: usize) -> Self {
        let required = required.max(1);
        Self {
            outcomes: VecDeque::with_capacity(required),
            required,
        }
    }

    fn push(&mut self, passed: bool) -> bool {
        self.outcomes.push_back(passed);
        while self.outcomes.len() > self.required {
            self.outcomes.pop_front();
        }
        self.outcomes.len() == self.required && self.outcomes.iter().all(|&o| o)
    }

    fn clear(&mut self) {
        self.outcomes.clear();
    }
}

/// Combines ML, adaptive and fixed-threshold signals into one decision.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    thresholds: Thresholds,
    ml_threshold: f64,
    ml_window: ConsecutiveWindow,
    cooldown: f64,
    last_accepted: Option<f64>,
}

impl TriggerPolicy {
    pub fn new(thresholds: Thresholds, ml_threshold: f64, ml_consecutive: usize, cooldown: Duration) -> Self {
        Self {
            thresholds,
            ml_threshold,
            ml_window: ConsecutiveWindow::new(ml_consecutive),
            cooldown: cooldown.as_secs_f64(),
            last_accepted: None,
        }
    }

    pub fn from_config(config: &DetectionConfig, cooldown: Duration) -> Self {
        Self::new(
            Thresholds {
                audio: config.audio_threshold,
                motion: config.motion_threshold,
                scene: config.scene_threshold,
            },
            config.ml_threshold,
            config.ml_consecutive,
            cooldown,
        )
    }

    /// Timestamp of the last accepted trigger.
    pub fn last_accepted(&self) -> Option<f64> {
        self.last_accepted
    }

    /// Evaluate one analysis cycle.
    ///
    /// An ML probability, when present, is the only signal considered.
    /// Without one, a baseline anomaly wins over the fixed thresholds.
    pub fn evaluate(
        &mut self,
        timestamp: f64,
        metrics: &ChunkMetrics,
        anomaly: Option<Anomaly>,
        ml_probability: Option<f64>,
    ) -> TriggerDecision {
        let candidate = match ml_probability {
            Some(p) => {
                if self.ml_window.push(p >= self.ml_threshold) {
                    Some((
                        TriggerReason::new(TriggerSource::Ml, None, format!("AI Detection (P={:.2})", p)),
                        (p * 100.0).round().clamp(0.0, 100.0) as u8,
                    ))
                } else {
                    None
                }
            }
            None => {
                // A cycle without a score breaks the consecutive run.
                self.ml_window.clear();
                anomaly
                    .map(|a| {
                        (
                            TriggerReason::new(TriggerSource::Adaptive, Some(a.channel), a.label()),
                            a.confidence_percent,
                        )
                    })
                    .or_else(|| self.thresholds.evaluate(metrics))
            }
        };

        let Some((reason, confidence_percent)) = candidate else {
            return TriggerDecision::Quiet;
        };

        if let Some(last) = self.last_accepted {
            let since = timestamp - last;
            if since < self.cooldown {
                return TriggerDecision::Suppressed {
                    reason,
                    since_last_accepted: since,
                };
            }
        }

        self.last_accepted = Some(timestamp);
        TriggerDecision::Accepted(TriggerEvent {
            timestamp,
            reason,
            confidence_percent,
            metrics: *metrics,
        })
    }
}
