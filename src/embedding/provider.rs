//! Embedding providers.
//!
//! Everything that can turn text into vectors implements
//! [`EmbeddingProvider`]. The service layer never knows which backend it
//! talks to; switching providers switches the collection suffix (see the
//! store) so vectors of different dimensions never mix.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::{EmbeddingProviderKind, Settings};
use crate::types::{Result, StashError};

/// Capability surface required from an embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embeddings for a batch of inputs, order-preserving.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Stable identity `"provider:model"`, used for cache keys and
    /// collection suffixes.
    fn id(&self) -> String;

    /// Output dimension when known ahead of the first call.
    fn dimension(&self) -> Option<usize>;
}

/// Build the configured embedding backend.
pub fn embedding_provider_from_settings(
    settings: &Settings,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.embedding_provider {
        EmbeddingProviderKind::Local => Ok(Arc::new(OllamaEmbedder::new(
            "http://localhost:11434",
            &settings.embedding_model,
            Duration::from_secs(60),
        )?)),
        EmbeddingProviderKind::Remote => {
            let api_key = settings.remote_api_key.as_deref().ok_or_else(|| {
                StashError::Config("REMOTE_API_KEY is required for remote embeddings".into())
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                &settings.remote_api_base,
                &settings.embedding_model,
                Duration::from_secs(60),
                5,
            )?))
        }
    }
}

// ── Local provider (Ollama-compatible) ─────────────────────────────────

/// Embeddings from a local Ollama-compatible HTTP endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StashError::EmbeddingBackend(format!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = OllamaRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    StashError::EmbeddingBackend(format!("embedding request timed out: {err}"))
                } else {
                    StashError::EmbeddingBackend(format!("embedding endpoint unreachable: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StashError::EmbeddingBackend(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|err| StashError::EmbeddingBackend(format!("malformed response: {err}")))?;
        validate_batch(&parsed.embeddings, inputs.len())?;
        Ok(parsed.embeddings)
    }

    fn id(&self) -> String {
        format!("ollama:{}", self.model)
    }

    fn dimension(&self) -> Option<usize> {
        None
    }
}

// ── Remote provider (OpenAI-compatible) ────────────────────────────────

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint with
/// retry-and-backoff on transient failures.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(StashError::Config("missing remote embedding API key".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| StashError::Config("API key contains invalid characters".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| StashError::EmbeddingBackend(format!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            max_retries: max_retries.max(1),
        })
    }

    fn backoff(attempt: usize) -> Duration {
        Duration::from_millis(500 * (1 << attempt.min(5) as u32))
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = OpenAiRequest {
            model: &self.model,
            input: inputs,
        };

        let mut attempt = 0usize;
        loop {
            let outcome = self.client.post(&self.endpoint).json(&request).send().await;
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let mut parsed: OpenAiResponse = response.json().await.map_err(|err| {
                            StashError::EmbeddingBackend(format!("malformed response: {err}"))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        let vectors: Vec<Vec<f32>> =
                            parsed.data.into_iter().map(|d| d.embedding).collect();
                        validate_batch(&vectors, inputs.len())?;
                        return Ok(vectors);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "embedding request failed, retrying");
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(StashError::EmbeddingBackend(format!(
                        "remote embeddings failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect();
                    if retryable && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "embedding request errored, retrying");
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    return Err(StashError::EmbeddingBackend(err.to_string()));
                }
            }
        }
    }

    fn id(&self) -> String {
        format!("openai:{}", self.model)
    }

    fn dimension(&self) -> Option<usize> {
        None
    }
}

// ── Deterministic mock provider ────────────────────────────────────────

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token hashes into a bucket of a fixed-size
/// vector which is then unit-normalized, so texts sharing vocabulary land
/// close in cosine space. No network, no model weights; identical inputs
/// always produce identical vectors. Used by the test suite and by offline
/// smoke runs.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[0..8].try_into().expect("8 bytes"))
                as usize
                % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            // Empty text still needs a valid unit vector.
            vector[0] = 1.0;
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }

    fn id(&self) -> String {
        format!("mock:hash-{}", self.dimension)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}

/// Reject ragged or miscounted batches before they reach the store.
fn validate_batch(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(StashError::EmbeddingBackend(format!(
            "provider returned {} embeddings for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(first) = vectors.first() {
        if first.is_empty() {
            return Err(StashError::EmbeddingBackend(
                "provider returned an empty vector".into(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != first.len()) {
            return Err(StashError::EmbeddingBackend(format!(
                "ragged batch: expected dimension {}, got {}",
                first.len(),
                bad.len()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbedder::new();
        let inputs = vec![
            "Hello world".to_string(),
            "Goodbye world".to_string(),
            "Hello world".to_string(),
        ];
        let first = provider.embed_batch(&inputs).await.unwrap();
        let second = provider.embed_batch(&inputs).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
    }

    #[tokio::test]
    async fn mock_embeddings_are_unit_length() {
        let provider = MockEmbedder::new();
        let vectors = provider
            .embed_batch(&["some words here".to_string(), "".to_string()])
            .await
            .unwrap();
        for vector in vectors {
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
        }
    }

    #[tokio::test]
    async fn shared_vocabulary_means_nearby_vectors() {
        let provider = MockEmbedder::new();
        let vectors = provider
            .embed_batch(&[
                "The melting point of titanium is 1668 C.".to_string(),
                "What is the melting point of titanium?".to_string(),
                "Completely unrelated gardening advice about tulips.".to_string(),
            ])
            .await
            .unwrap();
        let sim = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        let related = sim(&vectors[0], &vectors[1]);
        let unrelated = sim(&vectors[0], &vectors[2]);
        assert!(related > 0.7, "related similarity too low: {related}");
        assert!(related > unrelated);
    }

    #[test]
    fn ragged_batches_are_rejected() {
        let vectors = vec![vec![0.0f32; 4], vec![0.0f32; 5]];
        assert!(validate_batch(&vectors, 2).is_err());
        assert!(validate_batch(&vectors[..1].to_vec(), 2).is_err());
    }

    #[test]
    fn provider_ids_carry_the_model() {
        assert_eq!(MockEmbedder::new().id(), "mock:hash-384");
    }
}
