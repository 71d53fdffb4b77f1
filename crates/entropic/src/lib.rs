//! Entropy-ranked context extension for language models.
//!
//! `entropic` lets a model with a fixed context window work over far more
//! text than fits in it. Ingested text is split into overlapping segments
//! and scored by information density. Dense segments stay in the working
//! context; the rest are summarized, embedded and committed to a retrieval
//! store, from which the most relevant passages are pulled back per query.
//! Answers come from a draft cycle: a solution framework, one or more
//! candidate drafts over sampled context, and an optional synthesis step.
//!
//! # Getting started
//!
//! ```ignore
//! use entropic::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenRouterClient::from_env(ClientConfig::default())?;
//!     let config = EngineConfig::default().with_candidates(3);
//!     let mut session = Session::new(
//!         Arc::new(client),
//!         Arc::new(HashingEmbedder::default()),
//!         config,
//!     )?
//!     .with_event_handler(LoggingHandler);
//!
//!     session.ingest(&std::fs::read_to_string("report.txt")?).await?;
//!     let answer = session.chat("What changed in the third quarter?").await?;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Score text:** [`EntropyEvaluator`](context::entropy::EntropyEvaluator)
//!   computes word, n-gram, semantic, structural and composite entropy.
//!
//! - **Split and classify text:** [`Segmenter`](context::segmenter::Segmenter)
//!   produces overlapping segments and partitions them by entropy threshold.
//!
//! - **Store and search compressed text:**
//!   [`RetrievalStore`](store::RetrievalStore) commits segments as summaries
//!   with embeddings and answers similarity queries.
//!   [`recursive_compress`](store::RetrievalStore::recursive_compress) shrinks
//!   oversized text into a token budget.
//!
//! - **Generate answers:** [`DraftEngine`](draft::DraftEngine) runs the
//!   framework, candidate and synthesis stages, with pluggable
//!   [`SamplingStrategy`](draft::SamplingStrategy) and
//!   [`SynthesisStrategy`](draft::SynthesisStrategy).
//!
//! - **Hold a conversation:** [`Session`](session::Session) ties everything
//!   together and reports progress through
//!   [`EventHandler`](session::events::EventHandler).
//!
//! - **Plug in a model:** implement
//!   [`TextCompletion`](api::backend::TextCompletion) and
//!   [`Embedder`](api::backend::Embedder), or use the bundled
//!   [`OpenRouterClient`](api::client::OpenRouterClient) and
//!   [`HashingEmbedder`](api::embedding::HashingEmbedder).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Backend traits, OpenRouter client, SSE streaming, embedders, retry |
//! | [`context`] | Entropy scoring, segmentation, budgets, history and retained windows |
//! | [`store`] | Retrieval store, vector index, recursive compression |
//! | [`draft`] | Context sampling, candidate generation, synthesis |
//! | [`session`] | Session orchestration, configuration, events |
//! | [`error`] | Error types tagged with the pipeline stage that failed |

pub mod api;
pub mod context;
pub mod draft;
pub mod error;
pub mod prelude;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub use error::{Error, Result, Stage};

/// Generate a process-unique identifier: `{prefix}-{nanos:x}-{counter:04x}`.
pub(crate) fn generate_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // The counter keeps ids distinct within one clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts:x}-{count:04x}")
}
