//! Speech-to-text for captured chunks.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Produces a transcript for a media chunk.
///
/// `Ok(None)` means the chunk had no recognizable speech.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn transcribe(&self, path: &Path) -> ClientResult<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: String,
}

/// Uploads chunk bytes to a `/transcribe` endpoint.
pub struct HttpTranscriptSource {
    http: Client,
    base_url: Url,
}

impl HttpTranscriptSource {
    pub fn new(base_url: Url, timeout: Duration) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Network)?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl TranscriptSource for HttpTranscriptSource {
    async fn transcribe(&self, path: &Path) -> ClientResult<Option<String>> {
        let bytes = tokio::fs::read(path).await?;
        let url = self.base_url.join("/transcribe")?;

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::RequestFailed(format!(
                "transcription service returned {}",
                response.status()
            )));
        }

        let body: TranscribeResponse = response.json().await?;
        let text = body.text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
