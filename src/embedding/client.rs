//! Cached, retrying embedding client.
//!
//! [`Embedder::embed`] hashes the text, answers from the
//! [`EmbeddingCache`] when it can, and otherwise calls the provider with
//! linear backoff (1×, 2×, … the configured delay). Successful vectors are
//! written to the cache before they are returned, so for a fixed model the
//! same text reaches the provider successfully at most once.

use std::sync::Arc;
use std::time::Duration;

use super::cache::EmbeddingCache;
use super::{EmbedError, EmbeddingProvider, ProviderError};
use crate::chunk::content_hash;
use crate::config::EmbeddingConfig;

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay; retry `n` waits `n × backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: EmbeddingCache, retry: RetryPolicy) -> Self {
        Self {
            provider,
            cache,
            retry,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_enabled()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed `text`, consulting the cache first.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if !self.provider.is_enabled() {
            return Err(EmbedError::Disabled);
        }

        let hash = content_hash(text);
        let model = self.provider.model_name();

        if let Some(vector) = self.cache.get(&hash, model).await? {
            return Ok(vector);
        }

        let vector = self.embed_with_retry(text).await?;
        self.cache.put(&hash, model, &vector).await?;
        Ok(vector)
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let model = self.provider.model_name();
        let mut last_reason = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }

            match self.provider.embed(text).await {
                Ok(vector) => {
                    if let Some(dims) = self.provider.dims() {
                        if vector.len() != dims {
                            return Err(EmbedError::Rejected(format!(
                                "model {} returned {} dimensions, expected {}",
                                model,
                                vector.len(),
                                dims
                            )));
                        }
                    }
                    return Ok(vector);
                }
                Err(ProviderError::Transient(reason)) => {
                    tracing::debug!(model, attempt, %reason, "embedding attempt failed");
                    last_reason = reason;
                }
                Err(ProviderError::Fatal(reason)) => return Err(EmbedError::Rejected(reason)),
            }
        }

        Err(EmbedError::Unavailable {
            model: model.to_string(),
            attempts: self.retry.max_retries + 1,
            reason: last_reason,
        })
    }
}
