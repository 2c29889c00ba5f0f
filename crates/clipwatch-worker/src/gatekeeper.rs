//! Ad-free stream URL acquisition and revalidation.

use std::sync::Arc;
use std::time::Duration;

use clipwatch_media::{has_ads, PlaylistFetcher, StreamResolver};
use tracing::{debug, info, warn};

use crate::error::{GateError, WorkerError, WorkerResult};
use crate::retry::{attempt_with_retry, BackoffPolicy, RetryResult};

/// Obtains playable URLs whose playlists carry no ad markers.
#[derive(Clone)]
pub struct GateKeeper {
    resolver: Arc<dyn StreamResolver>,
    fetcher: Arc<dyn PlaylistFetcher>,
    check_interval: Duration,
}

impl GateKeeper {
    pub fn new(
        resolver: Arc<dyn StreamResolver>,
        fetcher: Arc<dyn PlaylistFetcher>,
        check_interval: Duration,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            check_interval,
        }
    }

    /// Resolve, fetch and scan until a clean URL is found or attempts run out.
    pub async fn acquire_clean_url(
        &self,
        channel: &str,
        quality: &str,
        policy: &BackoffPolicy,
    ) -> Result<String, GateError> {
        info!(channel, quality, max_attempts = policy.max_attempts, "Acquiring clean stream URL");

        let result = attempt_with_retry(policy, |attempt| async move {
            let url = self.resolve(channel, quality).await?;
            if self.is_clean(&url).await {
                Ok(url)
            } else {
                debug!(channel, attempt, "Ad markers present, retrying");
                Err(WorkerError::AdDetected)
            }
        })
        .await;

        crate::metrics::record_url_acquisition(result.is_success(), result.attempts());

        match result {
            RetryResult::Success { value, attempts } => {
                info!(channel, attempts, "Clean URL acquired");
                Ok(value)
            }
            RetryResult::Failed { error, attempts } => {
                warn!(channel, attempts, "Giving up on clean URL: {}", error);
                Err(GateError::RetriesExhausted { attempts })
            }
        }
    }

    /// Re-resolve and re-check every `check_interval` for `duration`.
    ///
    /// Returns false as soon as any check fails.
    pub async fn validate_stable(&self, channel: &str, quality: &str, duration: Duration) -> bool {
        let started = tokio::time::Instant::now();
        let mut checks = 0u32;

        while started.elapsed() < duration {
            let url = match self.resolve(channel, quality).await {
                Ok(url) => url,
                Err(e) => {
                    warn!(channel, "Stream unavailable during validation: {}", e);
                    return false;
                }
            };
            if !self.is_clean(&url).await {
                warn!(channel, "Ads detected during validation");
                return false;
            }
            checks += 1;
            tokio::time::sleep(self.check_interval).await;
        }

        info!(channel, checks, "Stream remained clean for {:?}", duration);
        true
    }

    /// Fetch and scan the playlist of an already-resolved URL.
    pub async fn is_clean(&self, url: &str) -> bool {
        let playlist = match self.fetcher.fetch(url).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("Playlist fetch failed: {}", e);
                None
            }
        };
        !has_ads(playlist.as_deref())
    }

    async fn resolve(&self, channel: &str, quality: &str) -> WorkerResult<String> {
        self.resolver
            .resolve(channel, quality)
            .await
            .map_err(WorkerError::Resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clipwatch_media::{MediaError, MediaResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    const CLEAN: &str = "#EXTM3U\n#EXTINF:2.0,\nseg.ts\n";
    const ADS: &str = "#EXTM3U\n#EXT-X-DISCONTINUITY\n#EXTINF:2.0,\nad.ts\n";

    /// Fails every call from `fail_from` on.
    struct CountingResolver {
        calls: AtomicU32,
        fail_from: Option<u32>,
    }

    #[async_trait]
    impl StreamResolver for CountingResolver {
        async fn resolve(&self, _channel: &str, _quality: &str) -> MediaResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_from.is_some_and(|from| n >= from) {
                Err(MediaError::resolve_failed("offline"))
            } else {
                Ok(format!("https://cdn.example/{}.m3u8", n))
            }
        }
    }

    /// Serves the playlists in order, repeating the last one.
    struct ScriptedFetcher {
        playlists: Vec<Option<&'static str>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PlaylistFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> MediaResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let idx = n.min(self.playlists.len() - 1);
            match self.playlists[idx] {
                Some(text) => Ok(text.to_string()),
                None => Err(MediaError::playlist_fetch("HTTP 404")),
            }
        }
    }

    fn gatekeeper(
        fail_resolve: bool,
        playlists: Vec<Option<&'static str>>,
    ) -> (GateKeeper, Arc<CountingResolver>) {
        gatekeeper_failing_from(fail_resolve.then_some(0), playlists)
    }

    fn gatekeeper_failing_from(
        fail_from: Option<u32>,
        playlists: Vec<Option<&'static str>>,
    ) -> (GateKeeper, Arc<CountingResolver>) {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            fail_from,
        });
        let fetcher = Arc::new(ScriptedFetcher {
            playlists,
            calls: AtomicU32::new(0),
        });
        (
            GateKeeper::new(resolver.clone(), fetcher, Duration::from_secs(2)),
            resolver,
        )
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new("acquire_url")
            .with_max_attempts(max_attempts)
            .with_interval(Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_exhausts_attempts() {
        let (gate, resolver) = gatekeeper(true, vec![Some(CLEAN)]);

        let err = gate
            .acquire_clean_url("chan", "best", &policy(3))
            .await
            .unwrap_err();

        assert!(matches!(err, GateError::RetriesExhausted { attempts: 3 }));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_skips_ads_and_bad_playlists() {
        let (gate, resolver) = gatekeeper(false, vec![Some(ADS), None, Some(CLEAN)]);

        let url = gate
            .acquire_clean_url("chan", "best", &policy(5))
            .await
            .unwrap();

        assert_eq!(url, "https://cdn.example/2.m3u8");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_never_exceeds_attempts_when_always_ads() {
        let (gate, resolver) = gatekeeper(false, vec![Some(ADS)]);

        let result = gate.acquire_clean_url("chan", "best", &policy(4)).await;
        assert!(result.is_err());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_stable() {
        let (gate, resolver) = gatekeeper(false, vec![Some(CLEAN)]);
        assert!(gate.validate_stable("chan", "best", Duration::from_secs(10)).await);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 5);

        let (gate, _) = gatekeeper(false, vec![Some(CLEAN), Some(ADS)]);
        assert!(!gate.validate_stable("chan", "best", Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_stable_fails_when_stream_drops() {
        let (gate, resolver) = gatekeeper_failing_from(Some(2), vec![Some(CLEAN)]);

        let started = tokio::time::Instant::now();
        assert!(!gate.validate_stable("chan", "best", Duration::from_secs(10)).await);

        // Two clean checks, then the third resolve fails and ends the window early.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_is_clean() {
        let (gate, _) = gatekeeper(false, vec![Some(CLEAN)]);
        assert!(gate.is_clean("https://cdn.example/live.m3u8").await);

        let (gate, _) = gatekeeper(false, vec![None]);
        assert!(!gate.is_clean("https://cdn.example/live.m3u8").await);
    }
}
