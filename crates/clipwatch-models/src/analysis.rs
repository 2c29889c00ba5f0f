//! Per-chunk analysis metrics and ML feature vectors.

use serde::{Deserialize, Serialize};

/// Raw metrics extracted from one captured chunk.
///
/// `Default` is the all-zero value used whenever analysis fails.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkMetrics {
    /// Frames inspected by the analyzer
    pub frames_analyzed: u64,
    /// Display audio level (0-100)
    pub audio_level: f64,
    /// Motion level (0-100)
    pub motion_level: f64,
    /// Peak scene-change score (0-1)
    pub scene_change: f64,
    /// Audio spike metric derived from RMS dB (0-20)
    pub audio_db_change: f64,
}

impl ChunkMetrics {
    /// Whether every signal is zero (typically a degraded analysis).
    pub fn is_empty(&self) -> bool {
        self.audio_level == 0.0
            && self.motion_level == 0.0
            && self.scene_change == 0.0
            && self.audio_db_change == 0.0
    }
}

/// Semantic features derived from speech in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticFeatures {
    /// Sentiment polarity (-1..1)
    pub sentiment: f64,
    /// Combined excitement estimate (0..1)
    pub excitement: f64,
    /// Mean weight of matched hype phrases
    pub hype_score: f64,
}

/// Input to the optional excitement scorer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub audio_level: f64,
    pub motion_level: f64,
    pub scene_change: f64,
    pub sentiment: f64,
    pub excitement: f64,
    pub hype_score: f64,
}

impl FeatureVector {
    /// Combine raw metrics with semantic features.
    pub fn new(metrics: &ChunkMetrics, semantic: &SemanticFeatures) -> Self {
        Self {
            audio_level: metrics.audio_level,
            motion_level: metrics.motion_level,
            scene_change: metrics.scene_change,
            sentiment: semantic.sentiment,
            excitement: semantic.excitement,
            hype_score: semantic.hype_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metrics_are_empty() {
        assert!(ChunkMetrics::default().is_empty());

        let metrics = ChunkMetrics {
            motion_level: 4.0,
            ..Default::default()
        };
        assert!(!metrics.is_empty());
    }

    #[test]
    fn test_feature_vector_serializes_flat() {
        let metrics = ChunkMetrics {
            audio_level: 70.0,
            ..Default::default()
        };
        let semantic = SemanticFeatures {
            hype_score: 2.5,
            ..Default::default()
        };
        let json = serde_json::to_value(FeatureVector::new(&metrics, &semantic)).unwrap();
        assert_eq!(json["audio_level"], 70.0);
        assert_eq!(json["hype_score"], 2.5);
    }
}
