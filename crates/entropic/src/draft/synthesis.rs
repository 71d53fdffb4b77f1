//! Merging candidate drafts into one answer.
//!
//! `majority` picks a draft locally; the other strategies make one backend
//! call over a strategy-specific prompt. All of them stream through the
//! optional delta sink.

use super::Draft;
use super::prompt::{consensus_prompt, hierarchical_prompt, weighted_prompt};
use crate::api::backend::{BackendFuture, DeltaSink, TextCompletion};
use crate::context::entropy::{SENTENCE_ENDINGS, term_jaccard, terms};
use crate::error::{BackendError, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// ── Strategy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStrategy {
    /// Return the most representative draft without a backend call.
    Majority,
    /// Merge drafts weighted by query coverage and length.
    Weighted,
    /// Analyze, reconcile, then merge in one structured call.
    #[default]
    Hierarchical,
    /// Merge around the claims several drafts agree on.
    Consensus,
}

impl fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynthesisStrategy::Majority => "majority",
            SynthesisStrategy::Weighted => "weighted",
            SynthesisStrategy::Hierarchical => "hierarchical",
            SynthesisStrategy::Consensus => "consensus",
        };
        f.write_str(name)
    }
}

impl FromStr for SynthesisStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "majority" => Ok(SynthesisStrategy::Majority),
            "weighted" => Ok(SynthesisStrategy::Weighted),
            "hierarchical" => Ok(SynthesisStrategy::Hierarchical),
            "consensus" => Ok(SynthesisStrategy::Consensus),
            other => Err(ConfigError::UnknownStrategy {
                kind: "synthesis",
                name: other.to_string(),
            }),
        }
    }
}

impl SynthesisStrategy {
    /// `agreement` is the lexical similarity at which two drafts (or two
    /// sentences) count as saying the same thing.
    pub fn build(self, agreement: f64) -> Box<dyn Synthesizer> {
        match self {
            SynthesisStrategy::Majority => Box::new(MajoritySynthesizer { agreement }),
            SynthesisStrategy::Weighted => Box::new(WeightedSynthesizer),
            SynthesisStrategy::Hierarchical => Box::new(HierarchicalSynthesizer),
            SynthesisStrategy::Consensus => Box::new(ConsensusSynthesizer { agreement }),
        }
    }
}

// ── Trait ──────────────────────────────────────────────────────────

/// Everything a synthesizer sees.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub query: &'a str,
    pub framework: &'a str,
    pub drafts: &'a [Draft],
    pub max_tokens: Option<u32>,
}

pub trait Synthesizer: Send + Sync {
    fn strategy(&self) -> SynthesisStrategy;

    /// Merge `input.drafts` into the final answer, forwarding text to
    /// `on_delta` when given.
    fn synthesize<'a>(
        &'a self,
        backend: &'a dyn TextCompletion,
        input: SynthesisInput<'a>,
        on_delta: Option<&'a mut DeltaSink<'_>>,
    ) -> BackendFuture<'a, String>;
}

async fn complete(
    backend: &dyn TextCompletion,
    prompt: &str,
    max_tokens: Option<u32>,
    on_delta: Option<&mut DeltaSink<'_>>,
) -> Result<String, BackendError> {
    match on_delta {
        Some(sink) => backend.generate_stream(prompt, max_tokens, sink).await,
        None => backend.generate(prompt, max_tokens).await,
    }
}

// ── Majority ───────────────────────────────────────────────────────

/// Picks the medoid of the largest cluster of mutually similar drafts.
pub struct MajoritySynthesizer {
    agreement: f64,
}

/// Index of the draft agreeing with the most others. Ties go to the draft
/// with the higher total similarity, then to the earlier draft.
pub fn majority_index(drafts: &[Draft], agreement: f64) -> Option<usize> {
    let n = drafts.len();
    let similarity: Vec<Vec<f64>> = drafts
        .iter()
        .map(|a| drafts.iter().map(|b| term_jaccard(&a.text, &b.text)).collect())
        .collect();
    (0..n).max_by(|&a, &b| {
        let support = |i: usize| similarity[i].iter().filter(|s| **s >= agreement).count();
        let total = |i: usize| similarity[i].iter().sum::<f64>();
        support(a)
            .cmp(&support(b))
            .then(total(a).total_cmp(&total(b)))
            .then(b.cmp(&a))
    })
}

impl Synthesizer for MajoritySynthesizer {
    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::Majority
    }

    fn synthesize<'a>(
        &'a self,
        _backend: &'a dyn TextCompletion,
        input: SynthesisInput<'a>,
        on_delta: Option<&'a mut DeltaSink<'_>>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let pick = majority_index(input.drafts, self.agreement).ok_or(BackendError::EmptyResponse)?;
            debug!("Majority synthesis picked draft {pick} of {}", input.drafts.len());
            let text = input.drafts[pick].text.clone();
            if let Some(sink) = on_delta {
                sink(&text);
            }
            Ok(text)
        })
    }
}

// ── Weighted ───────────────────────────────────────────────────────

pub struct WeightedSynthesizer;

/// Normalized draft weights: 0.7 × share of query terms the draft covers
/// plus 0.3 × length relative to the longest draft.
pub fn draft_weights(query: &str, drafts: &[Draft]) -> Vec<f64> {
    let query_terms: HashSet<String> = terms(query).into_iter().collect();
    let lengths: Vec<usize> = drafts.iter().map(|d| d.text.split_whitespace().count()).collect();
    let longest = lengths.iter().copied().max().unwrap_or(0).max(1);
    let raw: Vec<f64> = drafts
        .iter()
        .zip(&lengths)
        .map(|(draft, &len)| {
            let covered: HashSet<String> = terms(&draft.text).into_iter().collect();
            let coverage = if query_terms.is_empty() {
                0.0
            } else {
                query_terms.intersection(&covered).count() as f64 / query_terms.len() as f64
            };
            0.7 * coverage + 0.3 * (len as f64 / longest as f64) + 1e-3
        })
        .collect();
    let total: f64 = raw.iter().sum();
    raw.iter().map(|w| w / total).collect()
}

impl Synthesizer for WeightedSynthesizer {
    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::Weighted
    }

    fn synthesize<'a>(
        &'a self,
        backend: &'a dyn TextCompletion,
        input: SynthesisInput<'a>,
        on_delta: Option<&'a mut DeltaSink<'_>>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let weights = draft_weights(input.query, input.drafts);
            let prompt = weighted_prompt(input.query, input.framework, input.drafts, &weights);
            complete(backend, &prompt, input.max_tokens, on_delta).await
        })
    }
}

// ── Hierarchical ───────────────────────────────────────────────────

pub struct HierarchicalSynthesizer;

impl Synthesizer for HierarchicalSynthesizer {
    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::Hierarchical
    }

    fn synthesize<'a>(
        &'a self,
        backend: &'a dyn TextCompletion,
        input: SynthesisInput<'a>,
        on_delta: Option<&'a mut DeltaSink<'_>>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let prompt = hierarchical_prompt(input.query, input.framework, input.drafts);
            complete(backend, &prompt, input.max_tokens, on_delta).await
        })
    }
}

// ── Consensus ──────────────────────────────────────────────────────

pub struct ConsensusSynthesizer {
    agreement: f64,
}

fn sentences(text: &str) -> Vec<&str> {
    text.split(SENTENCE_ENDINGS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Draft sentences sorted by whether another draft backs them up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims {
    /// Corroborated sentences, deduplicated, in order of first appearance.
    pub agreed: Vec<String>,
    /// Sentences no other draft supports, with the index of the draft that
    /// made them.
    pub disputed: Vec<(usize, String)>,
}

pub fn sort_claims(drafts: &[Draft], agreement: f64) -> Claims {
    let split: Vec<Vec<&str>> = drafts.iter().map(|d| sentences(&d.text)).collect();
    let mut claims = Claims::default();
    for (i, own) in split.iter().enumerate() {
        for sentence in own {
            let corroborated = split
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .any(|(_, other)| other.iter().any(|s| term_jaccard(sentence, s) >= agreement));
            if corroborated {
                if !claims.agreed.iter().any(|c| term_jaccard(c, sentence) >= agreement) {
                    claims.agreed.push(sentence.to_string());
                }
            } else if !claims
                .disputed
                .iter()
                .any(|(_, c)| term_jaccard(c, sentence) >= agreement)
            {
                claims.disputed.push((i, sentence.to_string()));
            }
        }
    }
    claims
}

/// Sentences that some other draft corroborates, deduplicated, in order of
/// first appearance.
pub fn agreed_claims(drafts: &[Draft], agreement: f64) -> Vec<String> {
    sort_claims(drafts, agreement).agreed
}

impl Synthesizer for ConsensusSynthesizer {
    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::Consensus
    }

    fn synthesize<'a>(
        &'a self,
        backend: &'a dyn TextCompletion,
        input: SynthesisInput<'a>,
        on_delta: Option<&'a mut DeltaSink<'_>>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let claims = sort_claims(input.drafts, self.agreement);
            debug!(
                "Consensus synthesis: {} agreed, {} disputed claim(s)",
                claims.agreed.len(),
                claims.disputed.len()
            );
            let prompt = consensus_prompt(input.query, input.framework, input.drafts, &claims);
            complete(backend, &prompt, input.max_tokens, on_delta).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::backend::FnCompletion;
    use std::sync::Mutex;

    fn drafts(texts: &[&str]) -> Vec<Draft> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Draft {
                id: i,
                sample_id: format!("s-{i}"),
                text: t.to_string(),
            })
            .collect()
    }

    fn input<'a>(drafts: &'a [Draft]) -> SynthesisInput<'a> {
        SynthesisInput {
            query: "where is the capital of france",
            framework: "framework",
            drafts,
            max_tokens: None,
        }
    }

    #[test]
    fn majority_prefers_the_agreeing_cluster() {
        let d = drafts(&[
            "The capital of France is Lyon.",
            "Paris is the capital of France.",
            "The capital of France is Paris.",
        ]);
        // The two Paris drafts agree with each other; Lyon agrees with neither.
        assert_eq!(majority_index(&d, 0.8), Some(1));
        assert_eq!(majority_index(&[], 0.5), None);
    }

    #[test]
    fn weights_favour_query_coverage() {
        let d = drafts(&["The capital of France is Paris.", "Bananas are yellow."]);
        let w = draft_weights("capital of france", &d);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn agreed_claims_need_a_second_draft() {
        let d = drafts(&[
            "Paris is the capital. It sits on the Seine.",
            "Paris is the capital. The Eiffel Tower is there.",
        ]);
        let claims = agreed_claims(&d, 0.5);
        assert_eq!(claims, vec!["Paris is the capital".to_string()]);
    }

    #[test]
    fn unsupported_sentences_are_disputed() {
        let d = drafts(&[
            "Paris is the capital. It sits on the Seine.",
            "Paris is the capital. The Eiffel Tower is there.",
        ]);
        let claims = sort_claims(&d, 0.5);
        assert_eq!(claims.agreed, vec!["Paris is the capital".to_string()]);
        assert_eq!(
            claims.disputed,
            vec![
                (0, "It sits on the Seine".to_string()),
                (1, "The Eiffel Tower is there".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn majority_makes_no_backend_call_and_streams() {
        let backend = FnCompletion::new(1000, |_| panic!("majority must not call the backend"));
        let d = drafts(&["alpha beta", "alpha beta", "gamma"]);
        let mut seen = String::new();
        let mut sink = |delta: &str| seen.push_str(delta);
        let out = SynthesisStrategy::Majority
            .build(0.5)
            .synthesize(&backend, input(&d), Some(&mut sink))
            .await
            .unwrap();
        assert_eq!(out, "alpha beta");
        assert_eq!(seen, "alpha beta");
    }

    #[tokio::test]
    async fn backend_strategies_send_one_prompt() {
        for strategy in [
            SynthesisStrategy::Weighted,
            SynthesisStrategy::Hierarchical,
            SynthesisStrategy::Consensus,
        ] {
            let prompts = Mutex::new(Vec::new());
            let backend = FnCompletion::new(1000, |p| {
                prompts.lock().unwrap().push(p.to_string());
                Ok("merged".to_string())
            });
            let d = drafts(&["one answer", "another answer"]);
            let out = strategy
                .build(0.5)
                .synthesize(&backend, input(&d), None)
                .await
                .unwrap();
            assert_eq!(out, "merged");
            let prompts = prompts.lock().unwrap().clone();
            assert_eq!(prompts.len(), 1, "{strategy}");
            assert!(prompts[0].contains("one answer") && prompts[0].contains("another answer"));
        }
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let backend = FnCompletion::new(1000, |_| Err(BackendError::EmptyResponse));
        let d = drafts(&["a", "b"]);
        let err = SynthesisStrategy::Hierarchical
            .build(0.5)
            .synthesize(&backend, input(&d), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyResponse));
    }
}
