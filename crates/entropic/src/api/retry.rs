//! Automatic retry with exponential backoff and jitter.
//!
//! Every backend and embedder call runs under a per-call timeout and is
//! retried on transient failures (throttling, 5xx, network errors, timeouts).
//! Permanent failures such as 400/401 are returned immediately.

use super::backend::{BackendFuture, DeltaSink, EmbedFuture, Embedder, TextCompletion};
use crate::error::{BackendError, EmbeddingError};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            timeout: Duration::from_secs(120),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Errors the retry loop knows how to classify and synthesize.
pub trait Retryable: Display {
    fn is_transient(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for BackendError {
    fn is_transient(&self) -> bool {
        BackendError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        BackendError::Timeout(after)
    }
}

impl Retryable for EmbeddingError {
    fn is_transient(&self) -> bool {
        EmbeddingError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        EmbeddingError::Timeout(after)
    }
}

/// Run `call` under the configured timeout, retrying transient failures.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, label: &str, mut call: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(config.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(config.timeout)),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{label} failed (attempt {}/{}): {e}; retrying in {:.1}s",
                    attempt + 1,
                    config.max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A [`TextCompletion`] that applies [`RetryConfig`] to every call.
///
/// Streaming calls are retried only while nothing has been emitted yet;
/// once a delta reached the caller a failure is returned as is.
pub struct RetryingCompletion {
    inner: Arc<dyn TextCompletion>,
    config: RetryConfig,
}

impl RetryingCompletion {
    pub fn new(inner: Arc<dyn TextCompletion>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

impl TextCompletion for RetryingCompletion {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: Option<u32>,
    ) -> BackendFuture<'a, String> {
        Box::pin(with_retry(&self.config, "generation", move || {
            self.inner.generate(prompt, max_tokens)
        }))
    }

    fn generate_stream<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: Option<u32>,
        on_delta: &'a mut DeltaSink<'_>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                let mut emitted = false;
                let outcome = {
                    let mut tracked = |delta: &str| {
                        emitted = true;
                        on_delta(delta);
                    };
                    let call = self.inner.generate_stream(prompt, max_tokens, &mut tracked);
                    match tokio::time::timeout(self.config.timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(BackendError::Timeout(self.config.timeout)),
                    }
                };
                match outcome {
                    Ok(text) => return Ok(text),
                    Err(e) if !emitted && e.is_transient() && attempt < self.config.max_retries => {
                        let delay = self.config.delay_for_attempt(attempt);
                        warn!("streaming generation failed: {e}; retrying in {:.1}s", delay.as_secs_f64());
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn max_context_length(&self) -> usize {
        self.inner.max_context_length()
    }

    fn token_count(&self, text: &str) -> usize {
        self.inner.token_count(text)
    }
}

/// An [`Embedder`] that applies [`RetryConfig`] to every call.
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    config: RetryConfig,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

impl Embedder for RetryingEmbedder {
    fn encode<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        Box::pin(with_retry(&self.config, "embedding", move || {
            self.inner.encode(text)
        }))
    }
}
