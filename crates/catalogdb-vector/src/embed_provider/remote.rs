//! OpenAI-compatible `/embeddings` client.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use catalogdb_core::config::EmbeddingSettings;
use catalogdb_core::error::{Error, Result};

use super::{check_output, EmbedProvider};

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct RemoteProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    id: String,
    dim: usize,
    batch_size: usize,
    max_retries: usize,
    min_delay: Duration,
}

impl RemoteProvider {
    /// Build from settings, reading the API key from the env var named by
    /// `embedding.api_key_env`.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::EmbeddingFatal(format!("API key env var {} is not set", settings.api_key_env)))?;
        Self::new(&settings.api_url, &settings.model, api_key, settings.dim, Duration::from_secs(settings.timeout_secs))
            .map(|p| p.with_batch_size(settings.batch_size).with_max_retries(settings.max_retries))
    }

    pub fn new(url: &str, model: &str, api_key: String, dim: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::EmbeddingFatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            api_key,
            id: format!("remote:{model}:d{dim}"),
            dim,
            batch_size: 32,
            max_retries: 3,
            min_delay: Duration::from_millis(500),
        })
    }

    pub fn with_batch_size(mut self, n: usize) -> Self { self.batch_size = n.max(1); self }
    pub fn with_max_retries(mut self, n: usize) -> Self { self.max_retries = n; self }
    pub fn with_min_delay(mut self, d: Duration) -> Self { self.min_delay = d; self }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFatal(format!("malformed embeddings response: {e}")))?;

        let mut data = parsed.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Map an HTTP status to the retry taxonomy: rate limits and server errors are
/// transient, everything else means the request or credentials are wrong.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> Error {
    let msg = format!("embedding endpoint returned {status}: {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Error::EmbeddingRetryable(msg)
    } else {
        Error::EmbeddingFatal(msg)
    }
}

fn classify_transport(e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::EmbeddingFatal(format!("invalid embedding request: {e}"))
    } else {
        Error::EmbeddingRetryable(format!("embedding request failed: {e}"))
    }
}

#[async_trait]
impl EmbedProvider for RemoteProvider {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let backoff = ExponentialBuilder::default()
                .with_min_delay(self.min_delay)
                .with_max_delay(Duration::from_secs(10))
                .with_max_times(self.max_retries);
            let vectors = (|| async move { self.request(chunk).await })
                .retry(backoff)
                .when(Error::is_retryable)
                .notify(|e, after| warn!(error = %e, retry_in_ms = after.as_millis() as u64, "embedding request failed, retrying"))
                .await?;
            check_output(chunk.len(), self.dim, &vectors)?;
            out.extend(vectors);
        }
        debug!(texts = texts.len(), provider = %self.id, "remote embeddings fetched");
        Ok(out)
    }
}
