//! [`EngineConfig`]: every tunable of a session in one value.
//!
//! Build it in code with the `with_*` methods or load it from JSON, where
//! any omitted field takes its default:
//!
//! ```json
//! {
//!   "segmenter": { "target_size": 256, "threshold": 2.5 },
//!   "draft": { "candidates": 3, "sampling": "relevance", "synthesis": "consensus" },
//!   "max_retries": 2
//! }
//! ```

use crate::api::retry::RetryConfig;
use crate::context::budget::BudgetConfig;
use crate::context::entropy::EntropyConfig;
use crate::context::segmenter::SegmenterConfig;
use crate::draft::{DraftConfig, SamplingStrategy, SynthesisStrategy};
use crate::error::ConfigError;
use crate::store::{CompressionConfig, RetrievalConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub segmenter: SegmenterConfig,
    pub entropy: EntropyConfig,
    pub retrieval: RetrievalConfig,
    pub compression: CompressionConfig,
    pub draft: DraftConfig,
    pub budget: BudgetConfig,
    /// Retries after a transient backend or embedding failure.
    pub max_retries: u32,
    /// Upper bound on a single backend or embedding call, in seconds.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            entropy: EntropyConfig::default(),
            retrieval: RetrievalConfig::default(),
            compression: CompressionConfig::default(),
            draft: DraftConfig::default(),
            budget: BudgetConfig::default(),
            max_retries: 1,
            timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn with_segment_size(mut self, target_size: usize, overlap: usize) -> Self {
        self.segmenter.target_size = target_size;
        self.segmenter.overlap = overlap;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.segmenter.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.retrieval.top_k = top_k;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.compression.max_depth = max_depth;
        self
    }

    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.draft.candidates = candidates;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingStrategy) -> Self {
        self.draft.sampling = sampling;
        self
    }

    pub fn with_synthesis(mut self, synthesis: SynthesisStrategy) -> Self {
        self.draft.synthesis = synthesis;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.draft.seed = seed;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Retry policy for backend and embedding calls.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_retries(self.max_retries)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.segmenter.validate()?;
        self.entropy.validate()?;
        self.retrieval.validate()?;
        self.compression.validate()?;
        self.draft.validate()?;
        self.budget.validate()?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}
