//! Context sampling: how each candidate draft gets its slice of the
//! retrieved passages.
//!
//! Every sampler returns exactly the requested number of bundles and never
//! fails. With no passages each bundle is empty; bundles never exceed the
//! number of passages available.

use super::prompt::render_passages;
use crate::context::entropy::{EntropyEvaluator, term_jaccard};
use crate::error::ConfigError;
use crate::store::Passage;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::trace;

// ── Bundles ────────────────────────────────────────────────────────

/// The passages one candidate draft sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBundle {
    pub id: String,
    pub passages: Vec<Passage>,
}

impl ContextBundle {
    /// A bundle holding every passage, used when only one draft is made.
    pub fn all(passages: &[Passage]) -> Self {
        Self {
            id: "all".to_string(),
            passages: passages.to_vec(),
        }
    }

    pub fn render(&self) -> String {
        render_passages(&self.passages)
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

fn bundles_from(
    kind: SamplingStrategy,
    passages: &[Passage],
    picks: Vec<Vec<usize>>,
) -> Vec<ContextBundle> {
    picks
        .into_iter()
        .enumerate()
        .map(|(i, mut picked)| {
            picked.sort_unstable();
            ContextBundle {
                id: format!("{kind}-{i}"),
                passages: picked.into_iter().map(|j| passages[j].clone()).collect(),
            }
        })
        .collect()
}

// ── Strategy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    /// Uniform draws without replacement.
    Random,
    /// Draws weighted by each passage's composite entropy.
    Entropy,
    /// Draws weighted by each passage's query similarity.
    Relevance,
    /// Greedy max-min lexical dissimilarity, one seed passage per bundle.
    #[default]
    Diversity,
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplingStrategy::Random => "random",
            SamplingStrategy::Entropy => "entropy",
            SamplingStrategy::Relevance => "relevance",
            SamplingStrategy::Diversity => "diversity",
        };
        f.write_str(name)
    }
}

impl FromStr for SamplingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(SamplingStrategy::Random),
            "entropy" => Ok(SamplingStrategy::Entropy),
            "relevance" => Ok(SamplingStrategy::Relevance),
            "diversity" => Ok(SamplingStrategy::Diversity),
            other => Err(ConfigError::UnknownStrategy {
                kind: "sampling",
                name: other.to_string(),
            }),
        }
    }
}

impl SamplingStrategy {
    /// Build the sampler for this strategy. `seed` makes the randomized
    /// strategies reproducible.
    pub fn build(self, evaluator: EntropyEvaluator, seed: u64) -> Box<dyn ContextSampler> {
        match self {
            SamplingStrategy::Random => Box::new(RandomSampler::new(seed)),
            SamplingStrategy::Entropy => Box::new(WeightedSampler::entropy(evaluator, seed)),
            SamplingStrategy::Relevance => Box::new(WeightedSampler::relevance(seed)),
            SamplingStrategy::Diversity => Box::new(DiversitySampler),
        }
    }
}

/// Picks the passages each candidate draft sees.
pub trait ContextSampler: Send + Sync {
    fn strategy(&self) -> SamplingStrategy;

    /// Exactly `candidates` bundles of up to `bundle_size` passages each.
    fn sample(
        &self,
        passages: &[Passage],
        candidates: usize,
        bundle_size: usize,
    ) -> Vec<ContextBundle>;
}

fn bundle_len(passages: &[Passage], bundle_size: usize) -> usize {
    bundle_size.max(1).min(passages.len())
}

// ── Random ─────────────────────────────────────────────────────────

pub struct RandomSampler {
    rng: Mutex<StdRng>,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ContextSampler for RandomSampler {
    fn strategy(&self) -> SamplingStrategy {
        SamplingStrategy::Random
    }

    fn sample(
        &self,
        passages: &[Passage],
        candidates: usize,
        bundle_size: usize,
    ) -> Vec<ContextBundle> {
        let size = bundle_len(passages, bundle_size);
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let picks = (0..candidates)
            .map(|_| index::sample(&mut *rng, passages.len(), size).into_vec())
            .collect();
        bundles_from(self.strategy(), passages, picks)
    }
}

// ── Weighted (entropy / relevance) ─────────────────────────────────

enum Weighting {
    Entropy(EntropyEvaluator),
    Relevance,
}

/// Draws without replacement with probability proportional to a
/// per-passage weight.
pub struct WeightedSampler {
    weighting: Weighting,
    rng: Mutex<StdRng>,
}

impl WeightedSampler {
    pub fn entropy(evaluator: EntropyEvaluator, seed: u64) -> Self {
        Self {
            weighting: Weighting::Entropy(evaluator),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn relevance(seed: u64) -> Self {
        Self {
            weighting: Weighting::Relevance,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn weights(&self, passages: &[Passage]) -> Vec<f64> {
        // The floor keeps zero-weight passages drawable.
        match &self.weighting {
            Weighting::Entropy(evaluator) => passages
                .iter()
                .map(|p| evaluator.score(&p.original, None).composite.max(0.0) + 1e-3)
                .collect(),
            Weighting::Relevance => passages
                .iter()
                .map(|p| p.similarity.max(0.0) + 1e-3)
                .collect(),
        }
    }
}

fn top_weighted(weights: &[f64], size: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));
    order.truncate(size);
    order
}

impl ContextSampler for WeightedSampler {
    fn strategy(&self) -> SamplingStrategy {
        match self.weighting {
            Weighting::Entropy(_) => SamplingStrategy::Entropy,
            Weighting::Relevance => SamplingStrategy::Relevance,
        }
    }

    fn sample(
        &self,
        passages: &[Passage],
        candidates: usize,
        bundle_size: usize,
    ) -> Vec<ContextBundle> {
        let size = bundle_len(passages, bundle_size);
        let weights = self.weights(passages);
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let picks = (0..candidates)
            .map(|_| {
                match index::sample_weighted(&mut *rng, passages.len(), |i| weights[i], size) {
                    Ok(picked) => picked.into_vec(),
                    Err(e) => {
                        trace!("Weighted draw failed ({e}), falling back to top weights");
                        top_weighted(&weights, size)
                    }
                }
            })
            .collect();
        bundles_from(self.strategy(), passages, picks)
    }
}

// ── Diversity ──────────────────────────────────────────────────────

/// Bundle `i` starts from passage `i mod len`, then repeatedly adds the
/// passage whose least dissimilarity to the bundle so far is greatest.
/// Fully deterministic.
pub struct DiversitySampler;

impl DiversitySampler {
    fn greedy(similarity: &[Vec<f64>], start: usize, size: usize) -> Vec<usize> {
        let mut chosen = vec![start];
        while chosen.len() < size {
            let spread = |i: usize| {
                chosen
                    .iter()
                    .map(|&c| 1.0 - similarity[i][c])
                    .fold(f64::INFINITY, f64::min)
            };
            let next = (0..similarity.len())
                .filter(|i| !chosen.contains(i))
                .max_by(|&a, &b| spread(a).total_cmp(&spread(b)).then(b.cmp(&a)));
            match next {
                Some(i) => chosen.push(i),
                None => break,
            }
        }
        chosen
    }
}

impl ContextSampler for DiversitySampler {
    fn strategy(&self) -> SamplingStrategy {
        SamplingStrategy::Diversity
    }

    fn sample(
        &self,
        passages: &[Passage],
        candidates: usize,
        bundle_size: usize,
    ) -> Vec<ContextBundle> {
        if passages.is_empty() {
            return bundles_from(self.strategy(), passages, vec![Vec::new(); candidates]);
        }
        let size = bundle_len(passages, bundle_size);
        let similarity: Vec<Vec<f64>> = passages
            .iter()
            .map(|a| {
                passages
                    .iter()
                    .map(|b| term_jaccard(&a.original, &b.original))
                    .collect()
            })
            .collect();
        let picks = (0..candidates)
            .map(|i| Self::greedy(&similarity, i % passages.len(), size))
            .collect();
        bundles_from(self.strategy(), passages, picks)
    }
}
