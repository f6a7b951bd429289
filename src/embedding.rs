//! OpenAI embedding provider and the tokio-backed batch throttle.
//!
//! The batching, truncation and failure policy live in
//! [`codectx_core::embedding::EmbeddingClient`]; this module supplies the
//! transport and the pause between batches.
//!
//! # Retry Strategy
//!
//! Each batch request is retried inside the provider:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors → retry
//!
//! Backoff doubles from one second (1s, 2s, 4s, …) and is capped at 32s.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use codectx_core::embedding::{EmbeddingClient, EmbeddingProvider, Throttle};
use codectx_core::Error;

use crate::config::EmbeddingConfig;

/// Environment variable holding the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Embedding provider backed by the OpenAI `POST /embeddings` endpoint.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    max_retries: u32,
    backoff_unit: Duration,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            backoff_unit: Duration::from_secs(1),
        })
    }

    /// Create a provider using the key from `OPENAI_API_KEY`.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(format!("{} environment variable not set", OPENAI_API_KEY_ENV))
            })?;
        Self::new(config, api_key)
    }

    /// Scale the retry backoff. The delay before retry `n` is
    /// `unit × 2^(n-1)`, capped at `unit × 32`.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * (1u32 << (attempt - 1).min(5))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "transient embedding API error");
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow!("Invalid OpenAI response: non-numeric embedding value"))
            })
            .collect::<Result<_>>()?;
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Fixed pause between embedding batches.
pub struct SleepThrottle {
    pause: Duration,
}

impl SleepThrottle {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

#[async_trait]
impl Throttle for SleepThrottle {
    async fn pause(&self) {
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
    }
}

/// Wrap `provider` in an [`EmbeddingClient`] configured from `config`.
pub fn client_with_provider(config: &EmbeddingConfig, provider: Box<dyn EmbeddingProvider>) -> EmbeddingClient {
    EmbeddingClient::new(provider)
        .with_batch_size(config.batch_size)
        .with_max_input_chars(config.max_input_chars)
        .with_throttle(Box::new(SleepThrottle::new(Duration::from_millis(config.batch_pause_ms))))
}

/// Build the embedding client for the configured provider.
///
/// Fails with a configuration error before any work starts if the
/// credential is missing.
pub fn create_client(config: &EmbeddingConfig) -> Result<EmbeddingClient> {
    match config.provider.as_str() {
        "openai" => {
            let provider = OpenAIProvider::from_env(config)?;
            Ok(client_with_provider(config, Box::new(provider)))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}
