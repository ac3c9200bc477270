//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embeddings` endpoint.
//!
//! Providers make exactly one request per call and classify failures as
//! [`ProviderError::Transient`] or [`ProviderError::Fatal`]. Retries,
//! backoff, and caching live one layer up in [`client::Embedder`].
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Failure classification
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → transient
//! - Network errors and timeouts → transient
//! - HTTP 4xx (not 429) and malformed bodies → fatal

pub mod cache;
pub mod client;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Failure from a single provider request.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Worth retrying: rate limits, server errors, connection failures.
    #[error("transient embedding failure: {0}")]
    Transient(String),
    /// Retrying will not help: bad request, bad credentials, malformed response.
    #[error("embedding request rejected: {0}")]
    Fatal(String),
}

/// Failure from [`client::Embedder::embed`].
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding service unavailable for model {model} after {attempts} attempts: {reason}")]
    Unavailable {
        model: String,
        attempts: u32,
        reason: String,
    },
    #[error("embedding rejected: {0}")]
    Rejected(String),
    #[error("embedding cache error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Trait for embedding providers.
///
/// Contract: one text in, one fixed-length vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    /// Scopes the embedding cache.
    fn model_name(&self) -> &str;
    /// Expected vector dimensionality, when known.
    fn dims(&self) -> Option<usize>;
    fn is_enabled(&self) -> bool {
        true
    }
    /// Embed one text with a single request.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"`. Search then runs
/// lexical-only and chunks are stored without vectors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> Option<usize> {
        None
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Fatal("embedding provider is disabled".to_string()))
    }
}

// ============ OpenAI Provider ============

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` (or `embedding.url` when set, for
/// OpenAI-compatible servers). Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(k) => k,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let request = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let json = send_json(request, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| {
            ProviderError::Fatal("Invalid OpenAI response: missing data[0].embedding".to_string())
        })?;

    parse_vector(embedding, "OpenAI")
}

// ============ Ollama Provider ============

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embeddings` with `{model, prompt}` and reads
/// `{embedding}` back. Requires Ollama to be running with an embedding
/// model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            url,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let request = self
            .client
            .post(format!("{}/api/embeddings", self.url.trim_end_matches('/')))
            .json(&body);

        let json = send_json(request, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    let embedding = json.get("embedding").ok_or_else(|| {
        ProviderError::Fatal("Invalid Ollama response: missing embedding".to_string())
    })?;
    parse_vector(embedding, "Ollama")
}

// ============ Shared HTTP plumbing ============

/// Send a JSON request and classify the outcome.
async fn send_json(
    request: reqwest::RequestBuilder,
    service: &str,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .header("Content-Type", "application/json")
        .send()
        .await
        .map_err(|e| ProviderError::Transient(format!("{} connection error: {}", service, e)))?;

    let status = response.status();

    if status.is_success() {
        return response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::Fatal(format!("{} returned invalid JSON: {}", service, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", service, status, body_text);

    // Rate limited or server error: retryable
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(ProviderError::Transient(message));
    }

    Err(ProviderError::Fatal(message))
}

fn parse_vector(value: &serde_json::Value, service: &str) -> Result<Vec<f32>, ProviderError> {
    let items = value.as_array().ok_or_else(|| {
        ProviderError::Fatal(format!("Invalid {} response: embedding is not an array", service))
    })?;

    let vec = items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| {
            ProviderError::Fatal(format!("Invalid {} response: non-numeric embedding", service))
        })?;

    if vec.is_empty() {
        return Err(ProviderError::Fatal(format!(
            "Invalid {} response: empty embedding",
            service
        )));
    }

    Ok(vec)
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use workspace_recall::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
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

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// zero vectors, or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
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

    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [{ "index": 0, "embedding": [0.5, -0.25, 1.0] }],
            "model": "text-embedding-3-small"
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.5, -0.25, 1.0]);

        let bad = serde_json::json!({ "data": [] });
        assert!(matches!(
            parse_openai_response(&bad),
            Err(ProviderError::Fatal(_))
        ));
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embedding": [0.1, 0.2] });
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);

        let bad = serde_json::json!({ "embedding": ["x"] });
        assert!(matches!(
            parse_ollama_response(&bad),
            Err(ProviderError::Fatal(_))
        ));
        let empty = serde_json::json!({ "embedding": [] });
        assert!(parse_ollama_response(&empty).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let p = DisabledProvider;
        assert!(!p.is_enabled());
        assert_eq!(p.model_name(), "disabled");
        assert!(p.embed("anything").await.is_err());
    }

    #[test]
    fn test_create_provider_dispatch() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "disabled");

        let ollama = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&ollama).unwrap();
        assert_eq!(provider.model_name(), "nomic-embed-text");

        let unknown = EmbeddingConfig {
            provider: "nope".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&unknown).is_err());
    }
}
