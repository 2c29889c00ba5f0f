//! Trigger events produced by the detection policy.

use serde::{Deserialize, Serialize};

use crate::analysis::ChunkMetrics;

/// Signal channel tracked by the adaptive baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricChannel {
    Audio,
    Motion,
    Scene,
}

impl MetricChannel {
    /// Fixed anomaly priority order.
    pub const PRIORITY: [MetricChannel; 3] =
        [MetricChannel::Audio, MetricChannel::Motion, MetricChannel::Scene];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricChannel::Audio => "audio",
            MetricChannel::Motion => "motion",
            MetricChannel::Scene => "scene",
        }
    }
}

impl std::fmt::Display for MetricChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule family produced a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// External ML probability with consecutive smoothing
    Ml,
    /// Z-score anomaly against the calibrated baseline
    Adaptive,
    /// Fixed configured thresholds
    Threshold,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Ml => "ml",
            TriggerSource::Adaptive => "adaptive",
            TriggerSource::Threshold => "threshold",
        }
    }
}

/// Why a trigger fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerReason {
    pub source: TriggerSource,
    /// Channel responsible, if the rule is channel-specific
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<MetricChannel>,
    /// Human-readable label, e.g. "Audio Spike"
    pub label: String,
}

impl TriggerReason {
    pub fn new(
        source: TriggerSource,
        channel: Option<MetricChannel>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source,
            channel,
            label: label.into(),
        }
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// An accepted highlight trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Detection moment as unix seconds
    pub timestamp: f64,
    pub reason: TriggerReason,
    /// Confidence (0-100)
    pub confidence_percent: u8,
    /// Metrics that produced the trigger
    pub metrics: ChunkMetrics,
}
