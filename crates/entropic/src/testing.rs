//! Shared fixtures for unit tests.

use crate::api::backend::FnCompletion;
use crate::context::entropy::EntropyEvaluator;
use crate::context::segmenter::{Segmenter, SegmenterConfig};
use crate::context::summarizer::summary_source;
use crate::draft::prompt::{CANDIDATE_INSTRUCTION, FRAMEWORK_INSTRUCTION};
use crate::error::BackendError;

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// First quarter of the words of `text`, at least one.
pub(crate) fn quarter(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let keep = words.len().div_ceil(4).max(1);
    words[..keep.min(words.len())].join(" ")
}

/// Deterministic reply to any prompt the crate builds.
pub(crate) fn scripted_reply(prompt: &str) -> String {
    if let Some(source) = summary_source(prompt) {
        quarter(source)
    } else if prompt.starts_with(FRAMEWORK_INSTRUCTION) {
        "1. Analyze the ask. 2. Gather facts. 3. Answer. 4. Watch gaps. 5. Check.".to_string()
    } else if prompt.starts_with(CANDIDATE_INSTRUCTION) {
        "Candidate answer drawn from the sampled context.".to_string()
    } else {
        "Synthesized final answer.".to_string()
    }
}

/// A word-counting backend with a 100k-token window that answers every
/// prompt via [`scripted_reply`].
pub(crate) fn scripted_backend()
-> FnCompletion<impl Fn(&str) -> Result<String, BackendError> + Send + Sync> {
    FnCompletion::new(100_000, |prompt| Ok(scripted_reply(prompt))).with_token_counter(word_count)
}

pub(crate) fn segmenter_with(threshold: f64) -> Segmenter {
    let config = SegmenterConfig {
        target_size: 40,
        overlap: 0,
        threshold,
        ..Default::default()
    };
    Segmenter::new(config, EntropyEvaluator::default())
        .unwrap_or_else(|e| panic!("test segmenter config rejected: {e}"))
}

pub(crate) fn test_segmenter() -> Segmenter {
    segmenter_with(3.0)
}
