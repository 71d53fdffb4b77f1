//! Prompt budget: how many tokens a single generation prompt may use, and
//! how that allowance is shared between retained context, retrieved passages
//! and conversation history.
//!
//! The prompt ceiling is a fraction of the backend's context window (0.8 by
//! default) minus an optional output reserve, so the model always has room
//! to answer.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimate the token count of `text` from its character length.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    if text.is_empty() || chars_per_token <= 0.0 {
        return 0;
    }
    (text.chars().count() as f64 / chars_per_token).ceil() as usize
}

/// How the prompt allowance is split. Shares are fractions of the prompt
/// ceiling and must not sum above 1.0; whatever is left over covers the
/// instruction scaffolding around the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Fraction of the backend context window usable by a prompt.
    pub prompt_fraction: f64,
    /// Tokens held back for the model's output.
    pub output_reserve: usize,
    /// Share of the prompt for the most recent retained segments.
    pub retained_share: f64,
    /// Share of the prompt for conversation history.
    pub history_share: f64,
    /// Share of the prompt for retrieved passages.
    pub passage_share: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            prompt_fraction: 0.8,
            output_reserve: 0,
            retained_share: 0.4,
            history_share: 0.2,
            passage_share: 0.3,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.prompt_fraction > 0.0 && self.prompt_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "budget.prompt_fraction",
                format!("{} is outside (0, 1]", self.prompt_fraction),
            ));
        }
        let shares = [
            ("budget.retained_share", self.retained_share),
            ("budget.history_share", self.history_share),
            ("budget.passage_share", self.passage_share),
        ];
        for (field, share) in shares {
            if !share.is_finite() || share < 0.0 {
                return Err(ConfigError::invalid(field, format!("{share} is negative")));
            }
        }
        let total = self.retained_share + self.history_share + self.passage_share;
        if total > 1.0 + f64::EPSILON {
            return Err(ConfigError::invalid(
                "budget shares",
                format!("shares sum to {total:.2}, above 1.0"),
            ));
        }
        Ok(())
    }
}

/// Token allowance for prompts sent to one backend.
///
/// # Example
///
/// ```ignore
/// let budget = PromptBudget::new(8_192, &BudgetConfig::default());
/// assert_eq!(budget.max_prompt_tokens(), 6_553);
/// let history_tokens = budget.history_tokens();
/// ```
#[derive(Debug, Clone)]
pub struct PromptBudget {
    max_context: usize,
    config: BudgetConfig,
}

impl PromptBudget {
    pub fn new(max_context: usize, config: &BudgetConfig) -> Self {
        Self {
            max_context,
            config: config.clone(),
        }
    }

    /// Override the output reserve.
    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.config.output_reserve = tokens;
        self
    }

    /// Backend context window in tokens.
    pub fn max_context(&self) -> usize {
        self.max_context
    }

    /// Largest prompt, in tokens, that may be sent to the backend.
    pub fn max_prompt_tokens(&self) -> usize {
        ((self.max_context as f64 * self.config.prompt_fraction) as usize)
            .saturating_sub(self.config.output_reserve)
    }

    pub fn retained_tokens(&self) -> usize {
        self.share(self.config.retained_share)
    }

    pub fn history_tokens(&self) -> usize {
        self.share(self.config.history_share)
    }

    pub fn passage_tokens(&self) -> usize {
        self.share(self.config.passage_share)
    }

    fn share(&self, fraction: f64) -> usize {
        (self.max_prompt_tokens() as f64 * fraction) as usize
    }

    /// Usage snapshot for a prompt of `tokens` tokens.
    pub fn usage(&self, tokens: usize) -> BudgetUsage {
        let max = self.max_prompt_tokens();
        let usage_pct = if max > 0 {
            tokens as f64 / max as f64
        } else {
            1.0
        };
        BudgetUsage {
            tokens,
            max_tokens: max,
            usage_pct,
        }
    }
}

/// Snapshot of prompt usage against the ceiling.
#[derive(Debug, Clone, Copy)]
pub struct BudgetUsage {
    pub tokens: usize,
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl BudgetUsage {
    pub fn fits(&self) -> bool {
        self.tokens <= self.max_tokens
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "prompt: ~{} tokens ({:.0}% of {})",
            self.tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}
