//! Embedding provider trait, batched embedding client, and vector utilities.
//!
//! The [`EmbeddingProvider`] trait is the seam to a concrete backend (the
//! OpenAI provider lives in the `codectx` app crate). [`EmbeddingClient`]
//! wraps a provider with the request policy:
//!
//! | Policy | Default |
//! |--------|---------|
//! | Batch size | 100 inputs per request |
//! | Input truncation | 8000 characters |
//! | Pause between batches | supplied by a [`Throttle`] |
//! | Failure | abort with [`EmbeddingFailure`] at the batch offset |
//!
//! Batches are issued strictly one after another. The throttle is invoked
//! between batches, never before the first or after the last.

use async_trait::async_trait;
use tracing::debug;

use crate::error::EmbeddingFailure;

/// Default number of inputs per provider request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default maximum input length in characters.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8000;

/// Default embedding dimensionality.
pub const DEFAULT_DIMS: usize = 1536;

/// A backend that turns a batch of texts into vectors.
///
/// Implementations return one vector per input, in input order. Retries of
/// transient transport errors belong to the implementation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Pause inserted between consecutive embedding batches.
#[async_trait]
pub trait Throttle: Send + Sync {
    async fn pause(&self);
}

/// A throttle that never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThrottle;

#[async_trait]
impl Throttle for NoThrottle {
    async fn pause(&self) {}
}

/// Batched, rate-limited embedding client.
pub struct EmbeddingClient {
    provider: Box<dyn EmbeddingProvider>,
    throttle: Box<dyn Throttle>,
    batch_size: usize,
    max_input_chars: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            throttle: Box::new(NoThrottle),
            batch_size: DEFAULT_BATCH_SIZE,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn with_throttle(mut self, throttle: Box<dyn Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| EmbeddingFailure {
            offset: 0,
            message: "provider returned no vector".to_string(),
        })
    }

    /// Embed many texts, preserving input order.
    ///
    /// Inputs are truncated to the configured character limit and sent in
    /// batches. The first failing batch aborts the call; its starting
    /// offset is reported in the returned [`EmbeddingFailure`].
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingFailure> {
        let dims = self.provider.dims();
        let mut out = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_index * self.batch_size;
            if batch_index > 0 {
                self.throttle.pause().await;
            }

            let inputs: Vec<String> = batch
                .iter()
                .map(|t| truncate_input(t, self.max_input_chars).to_string())
                .collect();

            debug!(offset, size = inputs.len(), model = self.provider.model_name(), "embedding batch");

            let vectors = self
                .provider
                .embed_batch(&inputs)
                .await
                .map_err(|e| EmbeddingFailure {
                    offset,
                    message: format!("{:#}", e),
                })?;

            if vectors.len() != inputs.len() {
                return Err(EmbeddingFailure {
                    offset,
                    message: format!(
                        "provider returned {} vectors for {} inputs",
                        vectors.len(),
                        inputs.len()
                    ),
                });
            }

            if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
                return Err(EmbeddingFailure {
                    offset,
                    message: format!(
                        "vector for input {} has {} dimensions, expected {}",
                        offset + i,
                        v.len(),
                        dims
                    ),
                });
            }

            out.extend(vectors);
        }

        Ok(out)
    }
}

/// Truncate `text` to at most `max_chars` characters.
pub fn truncate_input(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use codectx_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, i.e. `1 − cosine_distance`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    dot / denom
}
