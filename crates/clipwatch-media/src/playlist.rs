//! HLS playlist fetching and ad-marker scanning.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{MediaError, MediaResult};
use crate::traits::PlaylistFetcher;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Case-insensitive markers of stitched advertising.
static AD_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(twitch-stitched-ad|twitch-ad-quartile|EXT-X-DISCONTINUITY)").unwrap()
});

/// Whether a playlist must be treated as containing ads.
///
/// Missing, blank and non-M3U text count as ads, since nothing about them
/// can be verified.
pub fn has_ads(playlist: Option<&str>) -> bool {
    let Some(text) = playlist else {
        return true;
    };
    let text = text.trim_start_matches('\u{feff}').trim();
    if text.is_empty() || !text.starts_with("#EXTM3U") {
        return true;
    }
    AD_MARKERS.is_match(text)
}

/// Fetches playlists over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPlaylistFetcher {
    client: reqwest::Client,
}

impl HttpPlaylistFetcher {
    pub fn new() -> MediaResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> MediaResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PlaylistFetcher for HttpPlaylistFetcher {
    async fn fetch(&self, url: &str) -> MediaResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::playlist_fetch(format!("HTTP {}", status)));
        }
        Ok(response.text().await?)
    }
}
