//! Per-chunk signal extraction from FFmpeg filter output.
//!
//! A single decode pass runs `astats` for loudness and a scene-score
//! select on a 2 fps sample. Values are read back from stderr.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use clipwatch_models::ChunkMetrics;
use regex::Regex;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::traits::ChunkAnalyzer;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const AUDIO_FILTER: &str = "astats=metadata=1:reset=1:measure_overall=RMS_level";
const VIDEO_FILTER: &str = r"fps=2,select=gt(scene\,0.3),metadata=print:key=lavfi.scene_score";

static RMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Overall RMS|RMS level dB):\s*([-\d.]+)").unwrap());
static SCENE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lavfi\.scene_score=([\d.]+)").unwrap());
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").unwrap());

/// Runs the FFmpeg analysis pass over a chunk.
#[derive(Debug, Clone)]
pub struct FfmpegAnalyzer {
    timeout: Duration,
}

impl Default for FfmpegAnalyzer {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl FfmpegAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ChunkAnalyzer for FfmpegAnalyzer {
    async fn analyze(&self, path: &Path) -> MediaResult<ChunkMetrics> {
        let cmd = FfmpegCommand::null_sink(path)
            .log_level("info")
            .audio_filter(AUDIO_FILTER)
            .video_filter(VIDEO_FILTER);

        let output = FfmpegRunner::new()
            .with_timeout(self.timeout)
            .run(&cmd)
            .await?;

        Ok(parse_analysis(&output.stderr))
    }
}

/// Map an RMS level in dB to the 0-20 spike metric.
pub fn audio_spike_from_db(rms_db: f64) -> f64 {
    let change = if rms_db > -20.0 {
        15.0 + (rms_db + 20.0) * 0.2
    } else if rms_db > -30.0 {
        8.0 + (rms_db + 30.0) * 0.7
    } else {
        (rms_db + 50.0) * 0.2
    };
    change.clamp(0.0, 20.0)
}

/// Map an RMS level in dB to the 0-100 display level.
pub fn display_level_from_db(rms_db: f64) -> f64 {
    ((rms_db + 60.0) * 1.67).clamp(0.0, 100.0)
}

/// Parse analyzer stderr into metrics.
///
/// Unrecognized or malformed lines are skipped, so garbage input yields
/// all-zero metrics.
pub fn parse_analysis(stderr: &str) -> ChunkMetrics {
    let mut metrics = ChunkMetrics::default();
    let mut peak_spike: Option<f64> = None;
    let mut peak_scene: Option<f64> = None;

    for line in stderr.lines() {
        if let Some(cap) = RMS_RE.captures(line) {
            let Some(rms_db) = cap.get(2).and_then(|m| m.as_str().parse::<f64>().ok()) else {
                continue;
            };
            if !rms_db.is_finite() {
                continue;
            }
            let spike = audio_spike_from_db(rms_db);
            peak_spike = Some(peak_spike.map_or(spike, |p| p.max(spike)));
            metrics.audio_level = display_level_from_db(rms_db);
        } else if let Some(cap) = SCENE_RE.captures(line) {
            let Some(score) = cap.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
                continue;
            };
            if !score.is_finite() {
                continue;
            }
            peak_scene = Some(peak_scene.map_or(score, |p| p.max(score)));
        }
    }

    if let Some(spike) = peak_spike {
        metrics.audio_db_change = spike;
    }
    if let Some(scene) = peak_scene {
        metrics.scene_change = scene;
        metrics.motion_level = (scene * 100.0).min(100.0);
    }

    // Stats lines are carriage-return separated, take the final count.
    metrics.frames_analyzed = FRAME_RE
        .captures_iter(stderr)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<u64>().ok())
        .last()
        .unwrap_or(0);

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_formula_bands() {
        assert!((audio_spike_from_db(-10.0) - 17.0).abs() < 1e-9);
        assert!((audio_spike_from_db(-25.0) - 11.5).abs() < 1e-9);
        assert!((audio_spike_from_db(-40.0) - 2.0).abs() < 1e-9);
        assert_eq!(audio_spike_from_db(-80.0), 0.0);
        assert_eq!(audio_spike_from_db(40.0), 20.0);
    }

    #[test]
    fn test_display_level_clamped() {
        assert_eq!(display_level_from_db(-90.0), 0.0);
        assert_eq!(display_level_from_db(10.0), 100.0);
        assert!((display_level_from_db(-30.0) - 50.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_analysis() {
        let stderr = "\
[Parsed_astats_0 @ 0x1] Channel: 1
[Parsed_astats_0 @ 0x1] RMS level dB: -35.000000
[Parsed_astats_0 @ 0x1] Overall
[Parsed_astats_0 @ 0x1] RMS level dB: -18.000000
[Parsed_metadata_2 @ 0x2] lavfi.scene_score=0.412000
[Parsed_metadata_2 @ 0x2] lavfi.scene_score=0.655000
frame=   12 fps=0.0 q=-0.0 size=N/A\rframe=   60 fps=0.0 q=-0.0 Lsize=N/A
";
        let metrics = parse_analysis(stderr);

        assert!((metrics.audio_db_change - 15.4).abs() < 1e-9);
        assert!((metrics.audio_level - 70.14).abs() < 1e-9);
        assert!((metrics.scene_change - 0.655).abs() < 1e-9);
        assert!((metrics.motion_level - 65.5).abs() < 1e-9);
        assert_eq!(metrics.frames_analyzed, 60);
    }

    #[test]
    fn test_malformed_output_is_zero() {
        let metrics = parse_analysis("RMS level dB: -inf\nlavfi.scene_score=\nnonsense\n");
        assert_eq!(metrics, ChunkMetrics::default());
        assert_eq!(parse_analysis(""), ChunkMetrics::default());
    }
}
