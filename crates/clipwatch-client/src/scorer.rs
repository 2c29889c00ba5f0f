//! Excitement scoring through an external ML service.

use std::time::Duration;

use async_trait::async_trait;
use clipwatch_models::FeatureVector;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Maps a feature vector to a highlight probability in `[0, 1]`.
#[async_trait]
pub trait ExcitementScorer: Send + Sync {
    async fn score(&self, features: &FeatureVector) -> ClientResult<f64>;
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    probability: f64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Configuration for the scoring client.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

/// Client for a `/predict` scoring endpoint.
pub struct HttpExcitementScorer {
    http: Client,
    config: ScorerConfig,
}

impl HttpExcitementScorer {
    pub fn new(config: ScorerConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Network)?;

        Ok(Self { http, config })
    }

    /// Check if the scoring service is healthy.
    pub async fn health_check(&self) -> ClientResult<bool> {
        let url = self.config.base_url.join("/health")?;

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Scoring service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Scoring service health check error: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ExcitementScorer for HttpExcitementScorer {
    async fn score(&self, features: &FeatureVector) -> ClientResult<f64> {
        let url = self.config.base_url.join("/predict")?;
        debug!("Requesting excitement score from {}", url);

        let response = self.http.post(url).json(features).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RequestFailed(format!(
                "scoring service returned {}: {}",
                status, body
            )));
        }

        let predict: PredictResponse = response.json().await?;
        normalize_probability(predict.probability)
    }
}

/// Clamp a probability into `[0, 1]`, rejecting NaN and infinities.
pub fn normalize_probability(p: f64) -> ClientResult<f64> {
    if p.is_finite() {
        Ok(p.clamp(0.0, 1.0))
    } else {
        Err(ClientError::InvalidResponse(format!(
            "probability is not finite: {}",
            p
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scorer(server: &MockServer) -> HttpExcitementScorer {
        HttpExcitementScorer::new(ScorerConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_probability() {
        assert_eq!(normalize_probability(0.42).unwrap(), 0.42);
        assert_eq!(normalize_probability(1.7).unwrap(), 1.0);
        assert_eq!(normalize_probability(-0.2).unwrap(), 0.0);
        assert!(normalize_probability(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_score_posts_features() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(body_partial_json(serde_json::json!({ "audio_level": 80.0 })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "probability": 1.3 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let features = FeatureVector {
            audio_level: 80.0,
            ..Default::default()
        };
        let p = scorer(&server).score(&features).await.unwrap();
        assert_eq!(p, 1.0);
    }

    #[tokio::test]
    async fn test_score_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = scorer(&server).score(&FeatureVector::default()).await;
        assert!(matches!(result, Err(ClientError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })),
            )
            .mount(&server)
            .await;

        assert!(scorer(&server).health_check().await.unwrap());
    }
}
