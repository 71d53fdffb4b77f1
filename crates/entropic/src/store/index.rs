//! Nearest-neighbour index over summary embeddings.

use crate::error::IndexError;

/// Cosine similarity between two embedding vectors. Mismatched lengths,
/// empty input and zero vectors give `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        return 0.0;
    }

    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// Storage and similarity search for fixed-dimension vectors keyed by id.
pub trait VectorIndex: Send + Sync {
    /// Dimension fixed by the first insert, if any.
    fn dimension(&self) -> Option<usize>;

    /// Insert or replace the vector for `id`. Fails without modifying the
    /// index when the dimension does not match.
    fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<(), IndexError>;

    /// Up to `k` ids ordered by descending similarity to `query`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, IndexError>;

    fn remove(&mut self, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// Exhaustive scan index. Ties keep insertion order.
#[derive(Debug, Default)]
pub struct LinearIndex {
    entries: Vec<(String, Vec<f32>)>,
    dimension: Option<usize>,
}

impl LinearIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, actual: usize) -> Result<(), IndexError> {
        match self.dimension {
            Some(expected) if expected != actual => {
                Err(IndexError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

impl VectorIndex for LinearIndex {
    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.is_empty() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension.unwrap_or(1),
                actual: 0,
            });
        }
        self.check(vector.len())?;
        self.dimension = Some(vector.len());
        match self.entries.iter_mut().find(|(existing, _)| existing == id) {
            Some(entry) => entry.1 = vector,
            None => self.entries.push((id.to_string(), vector)),
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, IndexError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        self.check(query.len())?;
        let mut scored: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != id);
        self.entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.dimension = None;
    }
}
