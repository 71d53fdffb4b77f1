//! Information-density scoring.
//!
//! Four complementary Shannon-entropy measures (base 2) are computed for a
//! piece of text and combined into one composite score:
//!
//! - **word**: entropy of the normalized term distribution
//! - **ngram**: entropy of the n-gram distribution (bigrams by default)
//! - **semantic**: word entropy scaled by how dissimilar the text is from the
//!   rest of its corpus (TF-IDF cosine); repetitive, redundant passages sink
//! - **structural**: entropy of sentence lengths, punctuation and line kinds
//!
//! Every measure is `0.0` for empty or single-term text and is never NaN or
//! negative.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Characters that terminate a sentence.
pub(crate) const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', '。', '！', '？', '…'];

/// Split `text` into lowercase terms with punctuation stripped from the edges.
pub fn terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard similarity of the term sets of `a` and `b`. Two texts with no
/// terms at all are considered identical.
pub fn term_jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = terms(a).into_iter().collect();
    let b: HashSet<String> = terms(b).into_iter().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f64 / union as f64
}

fn shannon<I: IntoIterator<Item = usize>>(counts: I) -> f64 {
    let counts: Vec<usize> = counts.into_iter().filter(|&c| c > 0).collect();
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    h.max(0.0)
}

fn tally<T: std::hash::Hash + Eq, I: IntoIterator<Item = T>>(items: I) -> HashMap<T, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
}

/// Entropy of the term distribution.
pub fn word_entropy(text: &str) -> f64 {
    shannon(tally(terms(text)).into_values())
}

/// Entropy of the distribution of consecutive `n`-term windows. Text with
/// fewer than `n` terms has no n-grams and scores zero.
pub fn ngram_entropy(text: &str, n: usize) -> f64 {
    let words = terms(text);
    if n == 0 || words.len() < n {
        return 0.0;
    }
    shannon(tally(words.windows(n).map(|w| w.join(" "))).into_values())
}

/// Entropy of the sentence-length distribution, punctuation usage and line
/// kinds (headings, list items, quotes, tables, code fences, prose).
pub fn structural_entropy(text: &str) -> f64 {
    let lengths = text
        .split(SENTENCE_ENDINGS)
        .map(|s| s.split_whitespace().count())
        .filter(|&n| n > 0);
    let length_h = shannon(tally(lengths).into_values());

    let punctuation = text.chars().filter(|c| is_punctuation(*c));
    let punct_h = shannon(tally(punctuation).into_values());

    let kinds = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(LineKind::of);
    let markup_h = shannon(tally(kinds).into_values());

    0.6 * length_h + 0.3 * punct_h + 0.1 * markup_h
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '。' | '，' | '！' | '？' | '；' | '：' | '、' | '…')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LineKind {
    Heading,
    ListItem,
    Quote,
    Table,
    Fence,
    Prose,
}

impl LineKind {
    fn of(line: &str) -> Self {
        if line.starts_with("```") {
            LineKind::Fence
        } else if line.starts_with('#') {
            LineKind::Heading
        } else if line.starts_with('>') {
            LineKind::Quote
        } else if line.starts_with('|') {
            LineKind::Table
        } else if line.starts_with("- ") || line.starts_with("* ") || is_numbered(line) {
            LineKind::ListItem
        } else {
            LineKind::Prose
        }
    }
}

fn is_numbered(line: &str) -> bool {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && line.get(digits..).is_some_and(|rest| rest.starts_with(". "))
}

/// Semantic entropy of `text` against `corpus`. One occurrence of `text`
/// itself is excluded from the corpus; with nothing left to compare against,
/// this equals the word entropy.
pub fn semantic_entropy(text: &str, corpus: Option<&[&str]>) -> f64 {
    let word = word_entropy(text);
    let Some(corpus) = corpus else {
        return word;
    };
    let mut docs = Vec::with_capacity(corpus.len() + 1);
    docs.push(text);
    let mut skipped_self = false;
    for doc in corpus {
        if !skipped_self && *doc == text {
            skipped_self = true;
            continue;
        }
        docs.push(*doc);
    }
    let index = TfIdf::new(&docs);
    match index.mean_dissimilarity(0) {
        Some(d) => word * d,
        None => word,
    }
}

/// L2-normalized TF-IDF vectors for a small document set.
struct TfIdf {
    vectors: Vec<HashMap<String, f64>>,
}

impl TfIdf {
    fn new(docs: &[&str]) -> Self {
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| terms(d)).collect();
        let mut df: HashMap<&str, usize> = HashMap::new();
        for words in &tokenized {
            let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
            for w in unique {
                *df.entry(w).or_insert(0) += 1;
            }
        }
        let n = docs.len() as f64;
        let vectors = tokenized
            .iter()
            .map(|words| {
                let mut v: HashMap<String, f64> = HashMap::new();
                for (term, tf) in tally(words.iter()) {
                    let d = df.get(term.as_str()).copied().unwrap_or(0) as f64;
                    let idf = ((1.0 + n) / (1.0 + d)).ln() + 1.0;
                    v.insert(term.clone(), tf as f64 * idf);
                }
                let norm = v.values().map(|x| x * x).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for x in v.values_mut() {
                        *x /= norm;
                    }
                }
                v
            })
            .collect();
        Self { vectors }
    }

    fn cosine(&self, a: usize, b: usize) -> f64 {
        let (small, large) = if self.vectors[a].len() <= self.vectors[b].len() {
            (&self.vectors[a], &self.vectors[b])
        } else {
            (&self.vectors[b], &self.vectors[a])
        };
        small
            .iter()
            .filter_map(|(t, x)| large.get(t).map(|y| x * y))
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }

    /// Mean of `1 - cosine` between document `i` and every other document.
    fn mean_dissimilarity(&self, i: usize) -> Option<f64> {
        let others = self.vectors.len().checked_sub(1)?;
        if others == 0 {
            return None;
        }
        let total: f64 = (0..self.vectors.len())
            .filter(|&j| j != i)
            .map(|j| 1.0 - self.cosine(i, j))
            .sum();
        Some(total / others as f64)
    }
}

// ── Scores ─────────────────────────────────────────────────────────

/// Which measure drives segment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntropyMethod {
    Word,
    Ngram,
    Semantic,
    Structural,
    #[default]
    Composite,
}

impl fmt::Display for EntropyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntropyMethod::Word => "word",
            EntropyMethod::Ngram => "ngram",
            EntropyMethod::Semantic => "semantic",
            EntropyMethod::Structural => "structural",
            EntropyMethod::Composite => "composite",
        };
        f.write_str(name)
    }
}

impl FromStr for EntropyMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "word" => Ok(EntropyMethod::Word),
            "ngram" => Ok(EntropyMethod::Ngram),
            "semantic" => Ok(EntropyMethod::Semantic),
            "structural" => Ok(EntropyMethod::Structural),
            "composite" => Ok(EntropyMethod::Composite),
            other => Err(ConfigError::UnknownStrategy {
                kind: "entropy",
                name: other.to_string(),
            }),
        }
    }
}

/// The four measures plus their weighted combination.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EntropyScore {
    pub word: f64,
    pub ngram: f64,
    pub semantic: f64,
    pub structural: f64,
    pub composite: f64,
}

impl EntropyScore {
    pub fn get(&self, method: EntropyMethod) -> f64 {
        match method {
            EntropyMethod::Word => self.word,
            EntropyMethod::Ngram => self.ngram,
            EntropyMethod::Semantic => self.semantic,
            EntropyMethod::Structural => self.structural,
            EntropyMethod::Composite => self.composite,
        }
    }
}

/// Non-negative weights for the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyWeights {
    pub word: f64,
    pub ngram: f64,
    pub semantic: f64,
    pub structural: f64,
}

impl Default for EntropyWeights {
    fn default() -> Self {
        Self {
            word: 0.25,
            ngram: 0.25,
            semantic: 0.25,
            structural: 0.25,
        }
    }
}

impl EntropyWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [self.word, self.ngram, self.semantic, self.structural];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::invalid(
                "entropy.weights",
                "weights must be finite and non-negative",
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid(
                "entropy.weights",
                "at least one weight must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    pub weights: EntropyWeights,
    /// Window length for the n-gram measure.
    pub ngram_size: usize,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            weights: EntropyWeights::default(),
            ngram_size: 2,
        }
    }
}

impl EntropyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if self.ngram_size == 0 {
            return Err(ConfigError::invalid("entropy.ngram_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Scores text with a fixed weighting.
///
/// # Example
///
/// ```ignore
/// let evaluator = EntropyEvaluator::default();
/// let score = evaluator.score("The quick brown fox jumps.", None);
/// assert!(score.composite > 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EntropyEvaluator {
    config: EntropyConfig,
}

impl EntropyEvaluator {
    pub fn new(config: EntropyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EntropyConfig {
        &self.config
    }

    /// Score one text, optionally against a corpus for the semantic measure.
    pub fn score(&self, text: &str, corpus: Option<&[&str]>) -> EntropyScore {
        let word = word_entropy(text);
        let semantic = match corpus {
            Some(_) => semantic_entropy(text, corpus),
            None => word,
        };
        self.combine(
            word,
            ngram_entropy(text, self.config.ngram_size),
            semantic,
            structural_entropy(text),
        )
    }

    /// Score every text. With `context_aware`, each text's semantic measure
    /// is taken against the rest of the batch; otherwise texts are scored in
    /// isolation.
    pub fn score_batch(&self, texts: &[&str], context_aware: bool) -> Vec<EntropyScore> {
        let index = context_aware.then(|| TfIdf::new(texts));
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let word = word_entropy(text);
                let semantic = index
                    .as_ref()
                    .and_then(|idx| idx.mean_dissimilarity(i))
                    .map_or(word, |d| word * d);
                self.combine(
                    word,
                    ngram_entropy(text, self.config.ngram_size),
                    semantic,
                    structural_entropy(text),
                )
            })
            .collect()
    }

    /// Indices of `texts` ordered by descending composite score. Ties keep
    /// their original order.
    pub fn rank(&self, texts: &[&str]) -> Vec<(usize, EntropyScore)> {
        let mut ranked: Vec<(usize, EntropyScore)> =
            self.score_batch(texts, true).into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.composite.total_cmp(&a.1.composite));
        ranked
    }

    fn combine(&self, word: f64, ngram: f64, semantic: f64, structural: f64) -> EntropyScore {
        let w = &self.config.weights;
        let composite =
            w.word * word + w.ngram * ngram + w.semantic * semantic + w.structural * structural;
        EntropyScore {
            word,
            ngram,
            semantic,
            structural,
            composite: if composite.is_finite() { composite.max(0.0) } else { 0.0 },
        }
    }
}
