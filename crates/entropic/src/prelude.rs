//! Convenience re-exports for common `entropic` types.
//!
//! ```ignore
//! use entropic::prelude::*;
//! ```
//!
//! Pulls in what most programs need: the session and its configuration,
//! the backend traits with the bundled client and embedders, the strategy
//! enums and the event handlers. Lower-level pieces (vector index, prompt
//! templates, individual samplers and synthesizers) stay in their modules.

// ── Session ─────────────────────────────────────────────────────────
pub use crate::session::config::EngineConfig;
pub use crate::session::{IngestReport, Session};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::session::events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler, SessionEvent,
};

// ── Backends ────────────────────────────────────────────────────────
pub use crate::api::{
    ClientConfig, Embedder, FnCompletion, FnEmbedder, HashingEmbedder, HttpEmbedder,
    OpenRouterClient, RetryConfig, TextCompletion,
};

// ── Pipeline components ─────────────────────────────────────────────
pub use crate::context::{EntropyEvaluator, EntropyMethod, EntropyScore, Segment, Segmenter};
pub use crate::draft::{DraftStage, SamplingStrategy, SynthesisStrategy};
pub use crate::store::{Passage, RetrievalStore};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{BackendError, ConfigError, EmbeddingError, Error, Stage};
