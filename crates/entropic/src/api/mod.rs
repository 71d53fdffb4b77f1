//! Backend integration: the completion and embedding traits, the OpenRouter
//! client with SSE streaming, local and HTTP embedders, and retry with
//! backoff.

pub mod backend;
pub mod client;
pub mod embedding;
pub mod retry;
pub mod streaming;

pub use backend::{
    BackendFuture, DeltaSink, EmbedFuture, Embedder, FnCompletion, FnEmbedder, TextCompletion,
};
pub use client::{ClientConfig, DEFAULT_MODEL, OpenRouterClient};
pub use embedding::{HashingEmbedder, HttpEmbedder};
pub use retry::{RetryConfig, RetryingCompletion, RetryingEmbedder};
