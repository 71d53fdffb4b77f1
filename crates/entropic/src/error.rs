//! Error taxonomy for the context extender.
//!
//! Leaf errors ([`BackendError`], [`EmbeddingError`], [`IndexError`],
//! [`BudgetError`], [`ConfigError`]) describe what went wrong; the top-level
//! [`Error`] additionally records the pipeline [`Stage`] that was running so
//! callers can tell a failed summary commit from a failed synthesis call.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage at which an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Splitting and classifying ingested text.
    Ingest,
    /// Summarizing, embedding and indexing a segment.
    Commit,
    /// Embedding a query and ranking stored items.
    Search,
    /// Recursive compression of an oversized context.
    Compress,
    /// Generating the shared solution framework.
    Framework,
    /// Generating candidate drafts.
    Generate,
    /// Merging drafts into the final answer.
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Commit => "commit",
            Stage::Search => "search",
            Stage::Compress => "compress",
            Stage::Framework => "framework",
            Stage::Generate => "generate",
            Stage::Synthesize => "synthesize",
        };
        f.write_str(name)
    }
}

/// Failure reported by a text-completion backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend returned an empty completion")]
    EmptyResponse,
    #[error("failed to parse backend response: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("summarization failed: {0}")]
    Summarization(#[source] Box<BackendError>),
    #[error("all {attempted} draft generations failed; last error: {last}")]
    AllDraftsFailed { attempted: usize, last: String },
}

impl BackendError {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Request(_) | BackendError::Timeout(_) | BackendError::EmptyResponse => {
                true
            }
            BackendError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            BackendError::Summarization(inner) => inner.is_transient(),
            BackendError::Parse(_)
            | BackendError::InvalidRequest(_)
            | BackendError::AllDraftsFailed { .. } => false,
        }
    }
}

/// Failure reported by an embedder.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedder returned an empty vector")]
    Empty,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("failed to parse embedding response: {0}")]
    Parse(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Request(_) | EmbeddingError::Timeout(_) => true,
            EmbeddingError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            EmbeddingError::Empty | EmbeddingError::NonFinite | EmbeddingError::Parse(_) => false,
        }
    }
}

/// Vector index inconsistency.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index returned id {0} with no stored item")]
    Orphan(String),
}

/// Token budget could not be satisfied.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error(
        "compression stopped after {depth} rounds at {tokens} tokens, above the {max_tokens}-token budget"
    )]
    CompressionBudgetExceeded {
        depth: usize,
        tokens: usize,
        max_tokens: usize,
    },
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unknown {kind} strategy '{name}'")]
    UnknownStrategy { kind: &'static str, name: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level error returned by session, store and draft operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{stage}: {source}")]
    Budget {
        stage: Stage,
        #[source]
        source: BudgetError,
    },
    #[error("{stage}: {source}")]
    Backend {
        stage: Stage,
        #[source]
        source: BackendError,
    },
    #[error("{stage}: {source}")]
    Embedding {
        stage: Stage,
        #[source]
        source: EmbeddingError,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn backend(stage: Stage, source: BackendError) -> Self {
        Error::Backend { stage, source }
    }

    pub(crate) fn embedding(stage: Stage, source: EmbeddingError) -> Self {
        Error::Embedding { stage, source }
    }

    /// The pipeline stage the error surfaced at, when one applies.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Budget { stage, .. }
            | Error::Backend { stage, .. }
            | Error::Embedding { stage, .. } => Some(*stage),
            Error::Index(_) | Error::Config(_) => None,
        }
    }

    /// Whether the underlying failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Backend { source, .. } => source.is_transient(),
            Error::Embedding { source, .. } => source.is_transient(),
            Error::Budget { .. } | Error::Index(_) | Error::Config(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_transience_follows_status() {
        let throttled = BackendError::Http {
            status: 429,
            body: "slow down".into(),
        };
        let rejected = BackendError::Http {
            status: 401,
            body: "bad key".into(),
        };
        assert!(throttled.is_transient());
        assert!(!rejected.is_transient());
    }

    #[test]
    fn summarization_inherits_inner_transience() {
        let err = BackendError::Summarization(Box::new(BackendError::Timeout(
            Duration::from_secs(1),
        )));
        assert!(err.is_transient());
        let err = BackendError::Summarization(Box::new(BackendError::InvalidRequest("x".into())));
        assert!(!err.is_transient());
    }

    #[test]
    fn top_level_error_reports_stage() {
        let err = Error::backend(Stage::Synthesize, BackendError::EmptyResponse);
        assert_eq!(err.stage(), Some(Stage::Synthesize));
        assert!(err.to_string().starts_with("synthesize:"));

        let err: Error = IndexError::Orphan("it-1".into()).into();
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn budget_error_message_names_the_numbers() {
        let err = Error::Budget {
            stage: Stage::Compress,
            source: BudgetError::CompressionBudgetExceeded {
                depth: 5,
                tokens: 2400,
                max_tokens: 2000,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("2400"));
        assert!(msg.contains("2000"));
        assert!(!err.is_transient());
    }
}
