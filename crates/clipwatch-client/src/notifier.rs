//! Notification sink for clip, metrics and stream-end events.

use std::time::Duration;

use async_trait::async_trait;
use clipwatch_models::{ClipCreated, MetricsUpdate, StreamEnded};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Receives processor events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn clip_created(&self, payload: &ClipCreated) -> ClientResult<()>;

    async fn metrics_update(&self, payload: &MetricsUpdate) -> ClientResult<()>;

    async fn stream_ended(&self, payload: &StreamEnded) -> ClientResult<()>;
}

/// Per-endpoint request timeouts.
#[derive(Debug, Clone)]
pub struct NotifierTimeouts {
    pub clip: Duration,
    pub metrics: Duration,
    pub stream_ended: Duration,
}

impl Default for NotifierTimeouts {
    fn default() -> Self {
        Self {
            clip: Duration::from_secs(5),
            metrics: Duration::from_secs(2),
            stream_ended: Duration::from_secs(5),
        }
    }
}

/// POSTs JSON events to a web server.
pub struct HttpNotifier {
    http: Client,
    base_url: Url,
    timeouts: NotifierTimeouts,
}

impl HttpNotifier {
    pub fn new(base_url: Url, timeouts: NotifierTimeouts) -> ClientResult<Self> {
        let http = Client::builder().build().map_err(ClientError::Network)?;
        Ok(Self {
            http,
            base_url,
            timeouts,
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        payload: &T,
        timeout: Duration,
    ) -> ClientResult<()> {
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RequestFailed(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn clip_created(&self, payload: &ClipCreated) -> ClientResult<()> {
        self.post("/api/clips", payload, self.timeouts.clip).await
    }

    async fn metrics_update(&self, payload: &MetricsUpdate) -> ClientResult<()> {
        self.post("/api/internal/metrics", payload, self.timeouts.metrics)
            .await
    }

    async fn stream_ended(&self, payload: &StreamEnded) -> ClientResult<()> {
        self.post(
            "/api/internal/stream-ended",
            payload,
            self.timeouts.stream_ended,
        )
        .await
    }
}

/// Writes events to the log only. Used when no server is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn clip_created(&self, payload: &ClipCreated) -> ClientResult<()> {
        info!(
            filename = %payload.filename,
            size = payload.file_size,
            reason = %payload.trigger_reason,
            "Clip created"
        );
        Ok(())
    }

    async fn metrics_update(&self, payload: &MetricsUpdate) -> ClientResult<()> {
        debug!(
            frames = payload.frames_processed,
            uptime = %payload.stream_uptime,
            clips = payload.clips_generated,
            "Metrics update"
        );
        Ok(())
    }

    async fn stream_ended(&self, payload: &StreamEnded) -> ClientResult<()> {
        info!(
            url = %payload.url,
            total_clips = payload.total_clips,
            "Stream ended"
        );
        Ok(())
    }
}
