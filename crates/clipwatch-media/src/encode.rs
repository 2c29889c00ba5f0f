//! Clip encoding from buffered chunks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::traits::ClipEncoder;

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
    pub timeout: Duration,
    pub thumbnail_timeout: Duration,
    /// Seek into the clip before grabbing the thumbnail frame
    pub thumbnail_at: f64,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            timeout: Duration::from_secs(30),
            thumbnail_timeout: Duration::from_secs(10),
            thumbnail_at: 1.0,
        }
    }
}

/// FFmpeg implementation of [`ClipEncoder`].
#[derive(Debug, Clone, Default)]
pub struct FfmpegClipEncoder {
    settings: EncodeSettings,
}

impl FfmpegClipEncoder {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.settings.timeout)
    }

    async fn run_concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        build: impl FnOnce(FfmpegCommand) -> FfmpegCommand,
    ) -> MediaResult<()> {
        if inputs.is_empty() {
            return Err(MediaError::NoInputs);
        }

        let list_path = concat_list_path(output);
        write_concat_list(&list_path, inputs).await?;

        let cmd = build(FfmpegCommand::files(&list_path, output).concat_list());
        let result = self.runner().run(&cmd).await;

        if let Err(e) = tokio::fs::remove_file(&list_path).await {
            debug!(path = %list_path.display(), "Failed to remove concat list: {}", e);
        }
        if result.is_err() {
            let _ = tokio::fs::remove_file(output).await;
        }

        result.map(|_| ())
    }
}

#[async_trait]
impl ClipEncoder for FfmpegClipEncoder {
    async fn encode(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        start_offset: f64,
        duration: f64,
    ) -> MediaResult<()> {
        info!(
            inputs = inputs.len(),
            start_offset, duration, "Encoding clip {}", output.display()
        );

        let settings = &self.settings;
        self.run_concat(inputs, output, |cmd| {
            cmd.trim(start_offset, duration)
                .video_codec(settings.video_codec.clone())
                .audio_codec(settings.audio_codec.clone())
                .preset(settings.preset.clone())
                .crf(settings.crf)
                .faststart()
        })
        .await
    }

    async fn concat_copy(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        start_offset: f64,
        duration: f64,
    ) -> MediaResult<()> {
        warn!(
            inputs = inputs.len(),
            "Stream-copying clip {} without re-encoding",
            output.display()
        );

        self.run_concat(inputs, output, |cmd| {
            cmd.trim(start_offset, duration).stream_copy().faststart()
        })
        .await
    }

    async fn copy_verbatim(&self, input: &Path, output: &Path) -> MediaResult<()> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn thumbnail(&self, clip: &Path, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::files(clip, output)
            .seek(self.settings.thumbnail_at)
            .single_frame()
            .output_args(["-q:v", "2"]);

        FfmpegRunner::new()
            .with_timeout(self.settings.thumbnail_timeout)
            .run(&cmd)
            .await
            .map(|_| ())
    }
}

/// Concat list written beside the output file.
fn concat_list_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".concat.txt");
    output.with_file_name(name)
}

/// Write an FFmpeg concat demuxer list.
pub async fn write_concat_list(list_path: &Path, inputs: &[PathBuf]) -> MediaResult<()> {
    let mut body = String::new();
    for input in inputs {
        let escaped = input.to_string_lossy().replace('\'', r"'\''");
        body.push_str(&format!("file '{}'\n", escaped));
    }
    tokio::fs::write(list_path, body).await?;
    Ok(())
}

/// Thumbnail path for a clip: same stem, `.jpg` extension.
pub fn thumbnail_path_for(clip: &Path) -> PathBuf {
    clip.with_extension("jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_concat_list_escapes_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        let inputs = vec![
            PathBuf::from("/work/seg_000001.ts"),
            PathBuf::from("/work/it's.ts"),
        ];

        write_concat_list(&list, &inputs).await.unwrap();
        let body = tokio::fs::read_to_string(&list).await.unwrap();

        assert_eq!(
            body,
            "file '/work/seg_000001.ts'\nfile '/work/it'\\''s.ts'\n"
        );
    }

    #[test]
    fn test_derived_paths() {
        let clip = Path::new("/clips/highlight_20240101_120000.mp4");
        assert_eq!(
            concat_list_path(clip),
            PathBuf::from("/clips/highlight_20240101_120000.mp4.concat.txt")
        );
        assert_eq!(
            thumbnail_path_for(clip),
            PathBuf::from("/clips/highlight_20240101_120000.jpg")
        );
    }

    #[tokio::test]
    async fn test_encode_without_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FfmpegClipEncoder::default();
        let result = encoder
            .encode(&[], &dir.path().join("out.mp4"), 0.0, 20.0)
            .await;
        assert!(matches!(result, Err(MediaError::NoInputs)));
    }

    #[tokio::test]
    async fn test_copy_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("bucket.ts");
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&bucket, vec![7u8; 4096]).unwrap();

        let encoder = FfmpegClipEncoder::default();
        encoder.copy_verbatim(&bucket, &clip).await.unwrap();
        assert_eq!(std::fs::metadata(&clip).unwrap().len(), 4096);

        let missing = encoder
            .copy_verbatim(&dir.path().join("nope.ts"), &clip)
            .await;
        assert!(matches!(missing, Err(MediaError::FileNotFound(_))));
    }
}
