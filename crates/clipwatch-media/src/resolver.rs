//! Stream URL resolution through streamlink.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::command::{check_streamlink, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::traits::StreamResolver;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves channels with `streamlink --stream-url`.
#[derive(Debug, Clone)]
pub struct StreamlinkResolver {
    timeout: Duration,
    retry_streams: u32,
    retry_max: u32,
}

impl Default for StreamlinkResolver {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_streams: 3,
            retry_max: 5,
        }
    }
}

impl StreamlinkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_args(&self, channel: &str, quality: &str) -> Vec<String> {
        vec![
            "--stream-url".to_string(),
            source_url_for(channel),
            quality.to_string(),
            "--retry-streams".to_string(),
            self.retry_streams.to_string(),
            "--retry-max".to_string(),
            self.retry_max.to_string(),
        ]
    }
}

#[async_trait]
impl StreamResolver for StreamlinkResolver {
    async fn resolve(&self, channel: &str, quality: &str) -> MediaResult<String> {
        check_streamlink()?;

        let args = self.build_args(channel, quality);
        debug!("Running streamlink {}", args.join(" "));

        let output = FfmpegRunner::new()
            .with_timeout(self.timeout)
            .run_program("streamlink", &args)
            .await?;

        if !output.success() {
            warn!(channel, exit_code = ?output.exit_code, "streamlink failed");
            return Err(MediaError::resolve_failed(format!(
                "streamlink exited with {:?}: {}",
                output.exit_code,
                output.stderr_tail()
            )));
        }

        parse_stream_url(&output.stdout)
    }
}

/// Full source URL for a channel name; URLs pass through unchanged.
pub fn source_url_for(channel: &str) -> String {
    let channel = channel.trim();
    if channel.contains("://") {
        channel.to_string()
    } else {
        format!("https://www.twitch.tv/{}", channel)
    }
}

/// Extract the playable URL from streamlink stdout.
pub fn parse_stream_url(stdout: &str) -> MediaResult<String> {
    let url = stdout.trim();
    if url.starts_with("http") {
        Ok(url.to_string())
    } else {
        Err(MediaError::resolve_failed(format!(
            "unexpected streamlink output: {}",
            url.chars().take(200).collect::<String>()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_url_for() {
        assert_eq!(source_url_for("somechannel"), "https://www.twitch.tv/somechannel");
        assert_eq!(
            source_url_for("https://www.youtube.com/live/abc"),
            "https://www.youtube.com/live/abc"
        );
    }

    #[test]
    fn test_parse_stream_url() {
        let url = parse_stream_url("https://video.example/live.m3u8\n").unwrap();
        assert_eq!(url, "https://video.example/live.m3u8");

        assert!(parse_stream_url("error: No playable streams found").is_err());
        assert!(parse_stream_url("").is_err());
    }

    #[test]
    fn test_build_args() {
        let args = StreamlinkResolver::new().build_args("chan", "best");
        assert_eq!(args[0], "--stream-url");
        assert_eq!(args[2], "best");
        assert!(args.windows(2).any(|w| w[0] == "--retry-max" && w[1] == "5"));
    }
}
