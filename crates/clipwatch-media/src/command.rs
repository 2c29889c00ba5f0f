//! FFmpeg command builder and subprocess runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Keep this many bytes of stderr in error values.
const STDERR_TAIL_BYTES: usize = 2048;

/// Builder for FFmpeg commands.
///
/// The input is a string rather than a path because live captures read
/// directly from an HLS URL.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: String,
    output: String,
    /// Arguments placed before -i
    input_args: Vec<String>,
    /// Arguments placed after -i
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command reading `input` and writing `output`.
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Create a command between two files.
    pub fn files(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self::new(
            input.as_ref().to_string_lossy(),
            output.as_ref().to_string_lossy(),
        )
    }

    /// Create a command that decodes `input` and discards the output.
    ///
    /// Used for filter-only passes whose results are read from stderr.
    pub fn null_sink(input: impl AsRef<Path>) -> Self {
        Self::new(input.as_ref().to_string_lossy(), "-")
            .output_arg("-f")
            .output_arg("null")
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek the input before decoding.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit how much of the input is read.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Frame-accurate output trim: skip `start` seconds, keep `duration`.
    pub fn trim(self, start: f64, duration: f64) -> Self {
        self.output_arg("-ss")
            .output_arg(format!("{:.3}", start))
            .output_arg("-t")
            .output_arg(format!("{:.3}", duration))
    }

    /// Read the input as a concat demuxer list.
    pub fn concat_list(self) -> Self {
        self.input_args(["-f", "concat", "-safe", "0"])
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.clone());

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());

        args
    }
}

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last part of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let trimmed = self.stderr.trim_end();
        if trimmed.len() <= STDERR_TAIL_BYTES {
            return trimmed.to_string();
        }
        let mut start = trimmed.len() - STDERR_TAIL_BYTES;
        while !trimmed.is_char_boundary(start) {
            start += 1;
        }
        trimmed[start..].to_string()
    }
}

/// Runs subprocesses with a timeout and optional cancellation.
///
/// On timeout or cancellation the child is killed.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the process once the receiver reads `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command; a non-zero exit is an error.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<CommandOutput> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let output = self.run_program("ffmpeg", &args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(output.stderr_tail()),
                output.exit_code,
            ))
        }
    }

    /// Run any program, collecting stdout and stderr.
    ///
    /// Exit status is reported in the output, not as an error.
    pub async fn run_program(&self, program: &str, args: &[String]) -> MediaResult<CommandOutput> {
        let started = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status = self.wait_for_completion(&mut child, program).await?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        metrics::histogram!("clipwatch_subprocess_duration_seconds", "program" => program.to_string())
            .record(started.elapsed().as_secs_f64());

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }

    async fn wait_for_completion(&self, child: &mut Child, program: &str) -> MediaResult<ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled = async move {
            match cancel_rx.as_mut() {
                Some(rx) => loop {
                    if *rx.borrow_and_update() {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        let timeout = self.timeout;
        let waited = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status.map_err(MediaError::from),
                    Err(_) => Err(MediaError::Timeout(limit)),
                },
                None => child.wait().await.map_err(MediaError::from),
            }
        };

        let outcome = tokio::select! {
            result = waited => Some(result),
            _ = cancelled => None,
        };

        match outcome {
            Some(Err(MediaError::Timeout(limit))) => {
                warn!(
                    "{} timed out after {:.1} seconds, killing process",
                    program,
                    limit.as_secs_f64()
                );
                let _ = child.kill().await;
                Err(MediaError::Timeout(limit))
            }
            Some(result) => result,
            None => {
                info!("{} cancelled, killing process", program);
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::ToolNotFound("ffmpeg"))
}

/// Check if streamlink is available.
pub fn check_streamlink() -> MediaResult<PathBuf> {
    which::which("streamlink").map_err(|_| MediaError::ToolNotFound("streamlink"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("list.txt", "out.mp4")
            .concat_list()
            .trim(4.0, 20.0)
            .video_codec("libx264")
            .crf(23);

        let args = cmd.build_args();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let concat_pos = args.iter().position(|a| a == "concat").unwrap();
        let seek_pos = args.iter().position(|a| a == "-ss").unwrap();

        assert!(concat_pos < input_pos);
        assert!(seek_pos > input_pos);
        assert!(args.contains(&"4.000".to_string()));
        assert!(args.contains(&"20.000".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_null_sink() {
        let args = FfmpegCommand::null_sink("seg.ts").build_args();
        let tail: Vec<&str> = args.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, vec!["-", "null", "-f"]);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let output = CommandOutput {
            stderr: "x".repeat(STDERR_TAIL_BYTES * 2),
            ..Default::default()
        };
        assert_eq!(output.stderr_tail().len(), STDERR_TAIL_BYTES);
    }

    #[tokio::test]
    async fn test_run_program_collects_output() {
        let output = FfmpegRunner::new()
            .with_timeout(Duration::from_secs(5))
            .run_program("sh", &args(&["-c", "echo out; echo err 1>&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_run_program_times_out() {
        let result = FfmpegRunner::new()
            .with_timeout(Duration::from_millis(100))
            .run_program("sleep", &args(&["5"]))
            .await;

        assert!(matches!(result, Err(MediaError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_run_program_cancelled() {
        let (tx, rx) = watch::channel(false);
        let runner = FfmpegRunner::new().with_cancel(rx);

        let handle = tokio::spawn(async move { runner.run_program("sleep", &args(&["5"])).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }
}
