//! Splitting text into overlapping segments and classifying them by entropy.
//!
//! Segments are byte-exact slices of the source. Each one owns a run of
//! "fresh" words plus up to `overlap` trailing words of its predecessor, and
//! the whitespace following its last word. Concatenating the fresh parts of
//! every segment therefore reproduces the source exactly (see [`reassemble`]).
//!
//! In sentence mode a segment ends at the last sentence terminator inside
//! its window. A window with no terminator is cut at its last word, so no
//! segment ever exceeds the target size.

use super::entropy::{EntropyEvaluator, EntropyMethod, EntropyScore, SENTENCE_ENDINGS};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A contiguous slice of a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    text: String,
    ordinal: usize,
    source_offset: usize,
    fresh_start: usize,
    word_count: usize,
}

impl Segment {
    /// Raw source slice, overlap and trailing whitespace included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Trimmed text, overlap included. This is what gets scored.
    pub fn content(&self) -> &str {
        self.text.trim()
    }

    /// The part of the source this segment contributes for the first time.
    pub fn fresh_text(&self) -> &str {
        self.text.get(self.fresh_start..).unwrap_or_default()
    }

    /// Trimmed fresh text. This is what gets retained or committed.
    pub fn fresh_content(&self) -> &str {
        self.fresh_text().trim()
    }

    /// Words repeated from the previous segment.
    pub fn overlap_text(&self) -> &str {
        self.text.get(..self.fresh_start).unwrap_or_default().trim()
    }

    /// Position of this segment in its split, starting at zero.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Byte offset of [`text`](Self::text) in the source.
    pub fn source_offset(&self) -> usize {
        self.source_offset
    }

    /// Byte range of [`text`](Self::text) in the source.
    pub fn source_range(&self) -> Range<usize> {
        self.source_offset..self.source_offset + self.text.len()
    }

    /// Words in the segment, overlap included.
    pub fn word_count(&self) -> usize {
        self.word_count
    }
}

/// Rebuild the source text from a complete, ordered split.
pub fn reassemble(segments: &[Segment]) -> String {
    segments.iter().map(Segment::fresh_text).collect()
}

/// Byte ranges of whitespace-separated words.
fn word_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push(s..i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(s..text.len());
    }
    spans
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')', ']', '}', '»', '”', '’'])
        .ends_with(SENTENCE_ENDINGS)
}

/// Exclusive word index at which a sentence-mode segment starting at `start`
/// should end, given its window ends at `window_end`.
fn sentence_boundary(text: &str, spans: &[Range<usize>], start: usize, window_end: usize) -> usize {
    let word = |i: usize| text.get(spans[i].clone()).unwrap_or_default();
    (start..window_end)
        .rev()
        .find(|&i| ends_sentence(word(i)))
        .map_or(window_end, |i| i + 1)
}

/// Split `text` into segments of about `target` words with `overlap` words
/// carried over between neighbours. Text without any words yields no
/// segments.
pub fn split(text: &str, target: usize, overlap: usize, by_sentence: bool) -> Vec<Segment> {
    let spans = word_spans(text);
    let n = spans.len();
    let target = target.max(1);
    let mut segments: Vec<Segment> = Vec::new();
    let mut fresh = 0;
    let mut prev_first = 0;

    while fresh < n {
        let first = if segments.is_empty() {
            fresh
        } else {
            fresh.saturating_sub(overlap).max(prev_first)
        };
        // Each segment takes at least one fresh word, so the loop always advances.
        let budget = target.saturating_sub(fresh - first).max(1);
        let window_end = (fresh + budget).min(n);
        let end = if by_sentence {
            sentence_boundary(text, &spans, fresh, window_end)
        } else {
            window_end
        };

        let fresh_byte = if segments.is_empty() {
            0
        } else {
            spans[fresh].start
        };
        let start_byte = if first < fresh {
            spans[first].start
        } else {
            fresh_byte
        };
        let end_byte = if end < n { spans[end].start } else { text.len() };

        segments.push(Segment {
            text: text.get(start_byte..end_byte).unwrap_or_default().to_string(),
            ordinal: segments.len(),
            source_offset: start_byte,
            fresh_start: fresh_byte - start_byte,
            word_count: end - first,
        });
        prev_first = first;
        fresh = end;
    }
    segments
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Target words per segment (the batch size).
    pub target_size: usize,
    /// Words repeated from the previous segment.
    pub overlap: usize,
    /// Break only at sentence ends.
    pub by_sentence: bool,
    /// Segments scoring below this are compressed rather than retained.
    pub threshold: f64,
    /// Score the semantic measure against the rest of the split.
    pub context_aware: bool,
    /// Measure compared against the threshold.
    pub method: EntropyMethod,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            overlap: 50,
            by_sentence: true,
            threshold: 3.0,
            context_aware: true,
            method: EntropyMethod::Composite,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_size == 0 {
            return Err(ConfigError::invalid("segmenter.target_size", "must be at least 1"));
        }
        if self.overlap >= self.target_size {
            return Err(ConfigError::invalid(
                "segmenter.overlap",
                format!(
                    "{} must be smaller than target_size {}",
                    self.overlap, self.target_size
                ),
            ));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::invalid(
                "segmenter.threshold",
                format!("{} is not a non-negative number", self.threshold),
            ));
        }
        Ok(())
    }
}

/// Splits and classifies text with one configuration.
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmenterConfig,
    evaluator: EntropyEvaluator,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig, evaluator: EntropyEvaluator) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, evaluator })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &EntropyEvaluator {
        &self.evaluator
    }

    pub fn split(&self, text: &str) -> Vec<Segment> {
        split(
            text,
            self.config.target_size,
            self.config.overlap,
            self.config.by_sentence,
        )
    }

    /// Entropy scores aligned with `segments`.
    pub fn score_segments(&self, segments: &[Segment]) -> Vec<EntropyScore> {
        self.score_with(segments, self.config.context_aware)
    }

    fn score_with(&self, segments: &[Segment], context_aware: bool) -> Vec<EntropyScore> {
        let texts: Vec<&str> = segments.iter().map(Segment::content).collect();
        self.evaluator.score_batch(&texts, context_aware)
    }

    /// Partition into (retained, compressed) using the configured threshold.
    pub fn classify(&self, segments: &[Segment]) -> (Vec<Segment>, Vec<Segment>) {
        self.classify_with(segments, self.config.threshold, self.config.context_aware)
    }

    /// Partition into (retained, compressed). A segment is retained when its
    /// score is at least `threshold`. Both halves keep source order.
    pub fn classify_with(
        &self,
        segments: &[Segment],
        threshold: f64,
        context_aware: bool,
    ) -> (Vec<Segment>, Vec<Segment>) {
        let scores = self.score_with(segments, context_aware);
        let method = self.config.method;
        let (retained, compressed): (Vec<_>, Vec<_>) = segments
            .iter()
            .zip(&scores)
            .partition(|(_, score)| score.get(method) >= threshold);
        (
            retained.into_iter().map(|(s, _)| s.clone()).collect(),
            compressed.into_iter().map(|(s, _)| s.clone()).collect(),
        )
    }

    /// The `top_k` highest-scoring segments, best first.
    pub fn extract_key_segments(
        &self,
        segments: &[Segment],
        top_k: usize,
    ) -> Vec<(Segment, EntropyScore)> {
        let method = self.config.method;
        let mut scored: Vec<(Segment, EntropyScore)> = segments
            .iter()
            .cloned()
            .zip(self.score_segments(segments))
            .collect();
        scored.sort_by(|a, b| b.1.get(method).total_cmp(&a.1.get(method)));
        scored.truncate(top_k);
        scored
    }
}
