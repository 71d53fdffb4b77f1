//! Summary prompts for committing low-entropy segments.
//!
//! A committed segment is replaced in working context by its summary, so the
//! summary must be strictly shorter than the source for compression to make
//! progress. [`clip_summary`] enforces that when the backend over-delivers.

use serde::{Deserialize, Serialize};

/// Instruction preceding the text to summarize.
const SUMMARIZATION_PROMPT: &str = "\
Summarize the following text concisely. Focus on:
- Facts, figures, names and identifiers
- Claims and the conclusions drawn from them
- Anything a later question might ask about

Rules:
- Only include facts explicitly stated in the text. Do not infer or extrapolate.
- Preserve numbers, names and quoted phrases verbatim.
- Write plain prose with no preamble. The summary must be shorter than the text.";

/// Marker between the instruction and the text in a summary prompt.
pub const TEXT_MARKER: &str = "=== TEXT TO SUMMARIZE ===";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Maximum tokens for the summarization response.
    pub max_summary_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_summary_tokens: 256,
        }
    }
}

/// Build the single-turn prompt asking the backend to summarize `text`.
pub fn build_summary_prompt(text: &str) -> String {
    format!("{SUMMARIZATION_PROMPT}\n\n{TEXT_MARKER}\n{text}")
}

/// Recover the text being summarized from a prompt built by
/// [`build_summary_prompt`].
pub fn summary_source(prompt: &str) -> Option<&str> {
    prompt
        .split_once(TEXT_MARKER)
        .map(|(_, text)| text.strip_prefix('\n').unwrap_or(text))
}

/// Ensure `summary` has fewer words than `source`. A summary that is not
/// shorter is cut to half the source's words (at least one).
pub fn clip_summary(summary: &str, source: &str) -> String {
    let summary = summary.trim();
    let source_words = source.split_whitespace().count();
    let summary_words = summary.split_whitespace().count();
    if summary_words < source_words {
        return summary.to_string();
    }
    let keep = (source_words / 2).max(1);
    summary
        .split_whitespace()
        .take(keep)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_instruction_and_text() {
        let prompt = build_summary_prompt("Revenue rose 12% in Q3.");
        assert!(prompt.contains("Summarize"));
        assert!(prompt.ends_with("Revenue rose 12% in Q3."));
    }

    #[test]
    fn source_round_trips_through_prompt() {
        let text = "line one\nline two";
        assert_eq!(summary_source(&build_summary_prompt(text)), Some(text));
        assert_eq!(summary_source("no marker here"), None);
    }

    #[test]
    fn short_summary_is_kept() {
        assert_eq!(clip_summary(" two words ", "one two three four"), "two words");
    }

    #[test]
    fn long_summary_is_clipped() {
        let clipped = clip_summary("a b c d e f", "w x y z");
        assert_eq!(clipped, "a b");
        assert_eq!(clip_summary("a b", "z"), "a");
    }

    #[test]
    fn preserves_full_content_in_prompt() {
        let long_content = "x".repeat(5000);
        let prompt = build_summary_prompt(&long_content);
        assert!(prompt.contains(&long_content));
    }
}
