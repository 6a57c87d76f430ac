//! Embedding provider seam, retry policy, and the deterministic offline client.
//!
//! The pipeline talks to providers only through [`EmbeddingClient`]. Transient
//! provider failures are retried with exponential backoff behind a shared
//! semaphore, so all workers draw from one rate-limit budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider refused the call because of rate limiting. Retryable.
    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),
    /// Provider failed to produce an embedding. Retryable.
    #[error("embedding provider error: {0}")]
    Provider(String),
    /// The call did not complete within the configured deadline. Retryable.
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
}

/// One embedding result.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResponse {
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Model identifier that produced the vector.
    pub model: String,
    /// Vector dimensionality.
    pub dims: usize,
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding for one chunk of text.
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, EmbeddingError>;
}

/// Retry and rate-limit policy applied around every provider call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per chunk before giving up.
    pub max_attempts: u32,
    /// Base backoff; doubles after each failed attempt.
    pub backoff: Duration,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Embed `text` under the retry policy, drawing a permit from `budget`.
///
/// Each attempt holds a semaphore permit for its duration, so the budget
/// bounds provider calls in flight across every worker. The final error is
/// returned after `max_attempts` failures.
pub async fn embed_with_retry(
    client: &dyn EmbeddingClient,
    budget: &Arc<Semaphore>,
    policy: &RetryPolicy,
    text: &str,
) -> Result<EmbeddingResponse, EmbeddingError> {
    let mut backoff = policy.backoff;
    let mut last_error = EmbeddingError::Provider("no attempt made".to_string());

    for attempt in 1..=policy.max_attempts.max(1) {
        let permit = budget
            .acquire()
            .await
            .map_err(|_| EmbeddingError::Provider("rate budget closed".to_string()))?;
        let outcome = tokio::time::timeout(policy.timeout, client.embed(text)).await;
        drop(permit);

        match outcome {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => {
                tracing::warn!(attempt, error = %err, "Embedding attempt failed");
                last_error = err;
            }
            Err(_) => {
                tracing::warn!(attempt, timeout = ?policy.timeout, "Embedding attempt timed out");
                last_error = EmbeddingError::Timeout(policy.timeout);
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(last_error)
}

/// Deterministic embedding client for offline use and tests.
///
/// Folds the text's bytes into the vector slots and L2-normalizes, so equal
/// text always maps to an equal vector.
pub struct HashingClient {
    model: String,
    dims: usize,
}

impl HashingClient {
    /// Construct a hashing client producing `dims`-dimensional vectors.
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
        }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dims];
        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dims;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, EmbeddingError> {
        if self.dims == 0 {
            return Err(EmbeddingError::Provider(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(EmbeddingResponse {
            vector: self.encode(text),
            model: self.model.clone(),
            dims: self.dims,
        })
    }
}
