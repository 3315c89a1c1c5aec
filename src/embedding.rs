//! Embedding client.
//!
//! Defines the [`Embedder`] trait the pipeline depends on and the
//! [`HfInferenceClient`] implementation that calls the Hugging Face
//! Inference API's feature-extraction pipeline.
//!
//! # Retry Strategy
//!
//! The provider answers HTTP 503 (or a "loading" body) while the model is
//! warming up. That signal is retried up to `max_attempts` times with a
//! fixed delay via [`RetryPolicy`]; when the budget is exhausted the call
//! fails with [`EmbeddingError::ModelUnavailable`]. Every other error
//! propagates immediately — per-chunk drop decisions belong to the caller.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::retry::RetryPolicy;

/// Errors from the embedding provider, classified so the retry policy can
/// tell transient warm-up signals from permanent failures.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model is warming up")]
    WarmingUp,
    #[error("embedding model unavailable after retries")]
    ModelUnavailable,
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::WarmingUp)
    }
}

/// Converts chunk text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. Implementations return a constant dimensionality,
    /// so vectors within a job are always comparable.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Embedding client backed by the Hugging Face Inference API.
pub struct HfInferenceClient {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_token: Option<String>,
    policy: RetryPolicy,
}

impl HfInferenceClient {
    /// Build a client from configuration. Reads the API token from the
    /// `HUGGINGFACE_ACCESS_TOKEN` environment variable; anonymous calls
    /// are allowed but heavily rate-limited.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dims,
            api_token: std::env::var("HUGGINGFACE_ACCESS_TOKEN").ok(),
            policy: RetryPolicy::fixed(
                config.max_attempts,
                Duration::from_secs(config.warmup_delay_secs),
            ),
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "https://router.huggingface.co/hf-inference/models/{}/pipeline/feature-extraction",
            self.model
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "inputs": text }));

        if let Some(token) = &self.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 503 || body.contains("loading") {
                return Err(EmbeddingError::WarmingUp);
            }
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json().await?;
        let vector = parse_feature_extraction(&json)?;

        if vector.len() != self.dims {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dims, got {}",
                self.dims,
                vector.len()
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl Embedder for HfInferenceClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let result = self
            .policy
            .run(EmbeddingError::is_transient, || self.request_embedding(text))
            .await;

        match result {
            Err(EmbeddingError::WarmingUp) => Err(EmbeddingError::ModelUnavailable),
            other => other,
        }
    }
}

/// Parse a feature-extraction response: either a flat vector of floats or
/// a batch of one vector per input (take the first row).
fn parse_feature_extraction(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let array = json
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidResponse("not an array".to_string()))?;

    let row = match array.first() {
        Some(serde_json::Value::Array(inner)) => inner.as_slice(),
        _ => array.as_slice(),
    };

    row.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::InvalidResponse("non-numeric element".to_string()))
        })
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as a BLOB (little-endian f32 bytes) for storage.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_vector() {
        let json = serde_json::json!([0.1, 0.2, 0.3]);
        let vec = parse_feature_extraction(&json).unwrap();
        assert_eq!(vec.len(), 3);
        assert!((vec[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn parses_batched_vector() {
        let json = serde_json::json!([[0.5, 0.6], [0.7, 0.8]]);
        let vec = parse_feature_extraction(&json).unwrap();
        assert_eq!(vec, vec![0.5, 0.6]);
    }

    #[test]
    fn rejects_non_array() {
        let json = serde_json::json!({"error": "nope"});
        assert!(parse_feature_extraction(&json).is_err());
    }

    #[test]
    fn only_warming_up_is_transient() {
        assert!(EmbeddingError::WarmingUp.is_transient());
        assert!(!EmbeddingError::ModelUnavailable.is_transient());
        assert!(!EmbeddingError::Api {
            status: 400,
            body: String::new()
        }
        .is_transient());
    }

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
