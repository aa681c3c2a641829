//! External text-summarization collaborator.
//!
//! A single opaque request/response to an external service, behind a trait
//! so the daemon runs with or without one configured.

use crate::config::SummarizeConfig;
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Summarization provider seam.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text`. Empty input is BadRequest; provider failures map
    /// to ExternalService.
    async fn summarize(&self, text: &str) -> ApiResult<String>;
}

/// Provider used when no service is configured.
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _text: &str) -> ApiResult<String> {
        Err(ApiError::ExternalService(
            "summarization service is not configured".into(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// HTTP-backed provider.
pub struct HttpSummarizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSummarizer {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Build a provider from config.
    pub fn new(config: &SummarizeConfig) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::ExternalService(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str) -> ApiResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::BadRequest(
                "text is required for summarization".into(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Summarization request failed");
                ApiError::ExternalService("failed to summarize text".into())
            })?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Summarization service rejected request");
            return Err(ApiError::ExternalService(
                "failed to summarize text".into(),
            ));
        }

        let body: SummaryResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Malformed summarization response");
            ApiError::ExternalService("failed to summarize text".into())
        })?;

        Ok(body.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_provider_fails_as_external_service() {
        let err = NoopSummarizer
            .summarize("anything")
            .await
            .expect_err("noop always fails");
        assert_eq!(err.error_code(), "external_service");
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_http_provider_rejects_empty_text() {
        let provider = HttpSummarizer::new(&SummarizeConfig {
            endpoint: "http://127.0.0.1:9/never-called".into(),
            api_key: "k".into(),
        })
        .expect("client builds");

        let err = provider.summarize("   ").await.expect_err("empty text");
        assert_eq!(err.error_code(), "bad_request");
    }
}
