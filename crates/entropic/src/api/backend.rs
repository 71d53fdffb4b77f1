//! Backend seams: the text-completion and embedding traits every other module
//! talks to, plus closure-backed adapters for local use and tests.

use crate::context::budget::{DEFAULT_CHARS_PER_TOKEN, estimate_tokens};
use crate::error::{BackendError, EmbeddingError};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`TextCompletion`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Boxed future returned by [`Embedder::encode`].
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>>;

/// Callback receiving incremental text as it is produced.
pub type DeltaSink<'a> = dyn FnMut(&str) + Send + 'a;

/// A language model that turns a prompt into text.
///
/// Implementations must be safe to call concurrently; the draft engine fans
/// out candidate generations over one shared backend.
pub trait TextCompletion: Send + Sync {
    /// Generate a completion for `prompt`.
    fn generate<'a>(&'a self, prompt: &'a str, max_tokens: Option<u32>)
    -> BackendFuture<'a, String>;

    /// Generate a completion, forwarding text deltas to `on_delta` as they
    /// arrive. Returns the full text. The default emits the whole completion
    /// as a single delta.
    fn generate_stream<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: Option<u32>,
        on_delta: &'a mut DeltaSink<'_>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let text = self.generate(prompt, max_tokens).await?;
            on_delta(&text);
            Ok(text)
        })
    }

    /// Context window of the underlying model, in tokens.
    fn max_context_length(&self) -> usize;

    /// Token count of `text` as the model would see it.
    fn token_count(&self, text: &str) -> usize {
        estimate_tokens(text, DEFAULT_CHARS_PER_TOKEN)
    }
}

/// Maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn encode<'a>(&'a self, text: &'a str) -> EmbedFuture<'a>;
}

type TokenCounter = Box<dyn Fn(&str) -> usize + Send + Sync>;

/// A [`TextCompletion`] backed by a synchronous closure.
///
/// # Example
///
/// ```ignore
/// let echo = FnCompletion::new(8_192, |prompt| Ok(format!("echo: {prompt}")))
///     .with_token_counter(|text| text.split_whitespace().count());
/// ```
pub struct FnCompletion<F>
where
    F: Fn(&str) -> Result<String, BackendError> + Send + Sync,
{
    respond: F,
    max_context: usize,
    counter: Option<TokenCounter>,
}

impl<F> FnCompletion<F>
where
    F: Fn(&str) -> Result<String, BackendError> + Send + Sync,
{
    pub fn new(max_context: usize, respond: F) -> Self {
        Self {
            respond,
            max_context,
            counter: None,
        }
    }

    /// Replace the default character-ratio token estimate.
    pub fn with_token_counter(mut self, counter: impl Fn(&str) -> usize + Send + Sync + 'static) -> Self {
        self.counter = Some(Box::new(counter));
        self
    }
}

impl<F> TextCompletion for FnCompletion<F>
where
    F: Fn(&str) -> Result<String, BackendError> + Send + Sync,
{
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        _max_tokens: Option<u32>,
    ) -> BackendFuture<'a, String> {
        let result = (self.respond)(prompt);
        Box::pin(async move { result })
    }

    fn max_context_length(&self) -> usize {
        self.max_context
    }

    fn token_count(&self, text: &str) -> usize {
        match &self.counter {
            Some(count) => count(text),
            None => estimate_tokens(text, DEFAULT_CHARS_PER_TOKEN),
        }
    }
}

/// An [`Embedder`] backed by a synchronous closure.
pub struct FnEmbedder<F>(F)
where
    F: Fn(&str) -> Result<Vec<f32>, EmbeddingError> + Send + Sync;

impl<F> FnEmbedder<F>
where
    F: Fn(&str) -> Result<Vec<f32>, EmbeddingError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Embedder for FnEmbedder<F>
where
    F: Fn(&str) -> Result<Vec<f32>, EmbeddingError> + Send + Sync,
{
    fn encode<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        let result = (self.0)(text);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_stream_emits_whole_completion() {
        let backend = FnCompletion::new(100, |p| Ok(p.to_uppercase()));
        let mut seen = Vec::new();
        let mut sink = |d: &str| seen.push(d.to_string());
        let text = backend.generate_stream("abc", None, &mut sink).await.unwrap();
        assert_eq!(text, "ABC");
        assert_eq!(seen, vec!["ABC".to_string()]);
    }

    #[test]
    fn token_counter_override() {
        let backend = FnCompletion::new(100, |_| Ok(String::new()))
            .with_token_counter(|t| t.split_whitespace().count());
        assert_eq!(backend.token_count("one two three"), 3);

        let default = FnCompletion::new(100, |_| Ok(String::new()));
        assert_eq!(default.token_count("1234567"), 2);
    }

    #[tokio::test]
    async fn fn_embedder_passes_through() {
        let embedder = FnEmbedder::new(|t| Ok(vec![t.len() as f32]));
        assert_eq!(embedder.encode("four").await.unwrap(), vec![4.0]);
    }
}
