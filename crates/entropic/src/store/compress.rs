//! Recursive compression of text that exceeds a token budget.
//!
//! Each round splits the text, keeps high-entropy segments verbatim and
//! commits the rest to the store, replacing them with their summaries. The
//! round's output is the retained segments followed by the summaries. When
//! every segment clears the threshold the lowest-scoring half is demoted,
//! so every round commits something and shrinks the text. Rounds stop at the
//! first output that fits or after `max_depth` rounds.

use super::RetrievalStore;
use crate::context::segmenter::split;
use crate::context::summarizer::{build_summary_prompt, clip_summary};
use crate::error::{BudgetError, ConfigError, Error, Result, Stage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Maximum compression rounds per call.
    pub max_depth: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::invalid("compression.max_depth", "must be at least 1"));
        }
        Ok(())
    }
}

/// Outcome of a successful compression.
#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub text: String,
    pub rounds: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// Ids of the items committed along the way.
    pub committed: Vec<String>,
}

impl RetrievalStore {
    /// Compress `text` until it fits in `max_tokens`, committing compressed
    /// segments to the store. Text that already fits is returned unchanged.
    pub async fn recursive_compress(&self, text: &str, max_tokens: usize) -> Result<String> {
        self.compress_with_report(text, max_tokens)
            .await
            .map(|report| report.text)
    }

    pub async fn compress_with_report(
        &self,
        text: &str,
        max_tokens: usize,
    ) -> Result<CompressionReport> {
        let tokens_before = self.backend.token_count(text);
        let mut current = text.to_string();
        let mut tokens = tokens_before;
        let mut committed = Vec::new();
        let mut rounds = 0;

        while tokens > max_tokens && rounds < self.compression.max_depth {
            rounds += 1;
            let segments = self.segmenter.split(&current);
            if segments.is_empty() {
                break;
            }

            let method = self.segmenter.config().method;
            let threshold = self.segmenter.config().threshold;
            let scores: Vec<f64> = self
                .segmenter
                .score_segments(&segments)
                .iter()
                .map(|s| s.get(method))
                .collect();
            let mut demote: Vec<bool> = scores.iter().map(|s| *s < threshold).collect();
            if !demote.contains(&true) {
                let mut order: Vec<usize> = (0..segments.len()).collect();
                order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
                for &i in order.iter().take((segments.len() / 2).max(1)) {
                    demote[i] = true;
                }
            }

            let mut kept = Vec::new();
            let mut summaries = Vec::new();
            for (segment, compress) in segments.iter().zip(demote) {
                let content = segment.fresh_content();
                if content.is_empty() {
                    continue;
                }
                if compress {
                    let item = self.commit_item(content).await?;
                    summaries.push(clip_summary(&item.summary, content));
                    committed.push(item.id);
                } else {
                    kept.push(content.to_string());
                }
            }

            kept.extend(summaries);
            let next = kept.join("\n");
            let next_tokens = self.backend.token_count(&next);
            debug!(
                "Compression round {rounds}: {tokens} -> {next_tokens} tokens (budget {max_tokens})"
            );
            if next_tokens >= tokens {
                warn!("Compression round {rounds} made no progress");
            }
            current = next;
            tokens = next_tokens;
        }

        if tokens > max_tokens {
            return Err(Error::Budget {
                stage: Stage::Compress,
                source: BudgetError::CompressionBudgetExceeded {
                    depth: rounds,
                    tokens,
                    max_tokens,
                },
            });
        }

        if rounds > 0 {
            info!(
                "Compressed {tokens_before} -> {tokens} tokens in {rounds} round(s), {} item(s) committed",
                committed.len()
            );
        }
        Ok(CompressionReport {
            text: current,
            rounds,
            tokens_before,
            tokens_after: tokens,
            committed,
        })
    }

    /// Shrink `text` until its summary prompt fits the backend's window.
    /// Each round summarizes window-sized pieces and joins the results; at
    /// most `max_depth` rounds run. Text that already fits is returned as is.
    pub(crate) async fn fit_summary_source(&self, text: &str) -> Result<String> {
        let window = self.backend.max_context_length();
        let mut source = text.to_string();
        let mut rounds = 0;
        loop {
            let tokens = self.backend.token_count(&build_summary_prompt(&source));
            if tokens <= window {
                return Ok(source);
            }
            if rounds == self.compression.max_depth {
                return Err(Error::Budget {
                    stage: Stage::Commit,
                    source: BudgetError::CompressionBudgetExceeded {
                        depth: rounds,
                        tokens,
                        max_tokens: window,
                    },
                });
            }
            rounds += 1;

            let pieces = self.summary_pieces(&source, window);
            debug!(
                "Summary prompt of {tokens} tokens exceeds the {window}-token window; round {rounds} summarizes {} piece(s)",
                pieces.len()
            );
            let mut summaries = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                let summary = self.summarize(piece).await?;
                summaries.push(clip_summary(&summary, piece));
            }
            source = summaries.join("\n");
        }
    }

    /// Split `text` into pieces whose summary prompts fit in `window`.
    fn summary_pieces(&self, text: &str, window: usize) -> Vec<String> {
        let scaffold = self.backend.token_count(&build_summary_prompt(""));
        let room = window.saturating_sub(scaffold).max(1);
        let words = text.split_whitespace().count().max(1);
        let tokens = self.backend.token_count(text).max(1);
        let mut target = (room.saturating_mul(words) / tokens).clamp(1, words);
        loop {
            let pieces: Vec<String> = split(text, target, 0, true)
                .iter()
                .map(|s| s.fresh_content().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            let fits = pieces
                .iter()
                .all(|p| self.backend.token_count(&build_summary_prompt(p)) <= window);
            if fits || target == 1 {
                return pieces;
            }
            target /= 2;
        }
    }
}
