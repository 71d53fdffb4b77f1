//! Retrieval store: committed segments, their summaries and summary
//! embeddings, searchable by query similarity.
//!
//! A commit summarizes the text with the completion backend, embeds the
//! summary and indexes it. The item becomes visible only once all three
//! steps succeed; a failed commit leaves the store unchanged. Commits and
//! searches may run concurrently from many tasks; the lock is never held
//! across a backend call.
//!
//! [`compress`] adds recursive compression of oversized text on top of the
//! store.

pub mod compress;
pub mod index;

use crate::api::backend::{Embedder, TextCompletion};
use crate::context::segmenter::Segmenter;
use crate::context::summarizer::{SummarizerConfig, build_summary_prompt};
use crate::error::{BackendError, ConfigError, EmbeddingError, Error, IndexError, Result, Stage};
use crate::generate_id;
use chrono::{DateTime, Utc};
use index::{LinearIndex, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub use compress::{CompressionConfig, CompressionReport};

/// A committed segment.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: String,
    pub original: String,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub id: String,
    pub original: String,
    pub summary: String,
    /// Cosine similarity between the query and the item's summary.
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Passages fetched per chat turn.
    pub top_k: usize,
    /// Hits below this cosine similarity are dropped.
    pub similarity_floor: f64,
    /// Output dimension of the built-in hashing embedder.
    pub embedding_dimensions: usize,
    pub summarizer: SummarizerConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_floor: 0.2,
            embedding_dimensions: 256,
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_floor) {
            return Err(ConfigError::invalid(
                "retrieval.similarity_floor",
                format!("{} is outside [-1, 1]", self.similarity_floor),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::invalid(
                "retrieval.embedding_dimensions",
                "must be at least 1",
            ));
        }
        if self.summarizer.max_summary_tokens == 0 {
            return Err(ConfigError::invalid(
                "retrieval.summarizer.max_summary_tokens",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

struct StoreState {
    items: HashMap<String, StoredItem>,
    order: Vec<String>,
    index: Box<dyn VectorIndex>,
}

pub struct RetrievalStore {
    backend: Arc<dyn TextCompletion>,
    embedder: Arc<dyn Embedder>,
    segmenter: Segmenter,
    config: RetrievalConfig,
    compression: CompressionConfig,
    state: RwLock<StoreState>,
}

impl RetrievalStore {
    pub fn new(
        backend: Arc<dyn TextCompletion>,
        embedder: Arc<dyn Embedder>,
        segmenter: Segmenter,
        config: RetrievalConfig,
        compression: CompressionConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        compression.validate()?;
        Ok(Self {
            backend,
            embedder,
            segmenter,
            config,
            compression,
            state: RwLock::new(StoreState {
                items: HashMap::new(),
                order: Vec::new(),
                index: Box::new(LinearIndex::new()),
            }),
        })
    }

    /// Replace the vector index. Existing items are dropped.
    pub fn with_index(self, index: Box<dyn VectorIndex>) -> Self {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.items.clear();
            state.order.clear();
            state.index = index;
        }
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Summarize, embed and index `text`. Returns the new item's id.
    pub async fn commit(&self, text: &str) -> Result<String> {
        self.commit_item(text).await.map(|item| item.id)
    }

    /// Commit several texts in order, stopping at the first failure. Items
    /// committed before the failure stay in the store.
    pub async fn commit_batch(&self, texts: &[&str]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            ids.push(self.commit(text).await?);
        }
        Ok(ids)
    }

    pub(crate) async fn commit_item(&self, text: &str) -> Result<StoredItem> {
        if text.trim().is_empty() {
            return Err(Error::backend(
                Stage::Commit,
                BackendError::InvalidRequest("cannot commit empty text".into()),
            ));
        }

        let source = self.fit_summary_source(text).await?;
        let summary = self.summarize(&source).await?;

        let embedding = self
            .embedder
            .encode(&summary)
            .await
            .and_then(validate_embedding)
            .map_err(|e| Error::embedding(Stage::Commit, e))?;

        let item = StoredItem {
            id: generate_id("it"),
            original: text.to_string(),
            summary,
            embedding,
            created_at: Utc::now(),
        };

        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.index.insert(&item.id, item.embedding.clone())?;
            state.order.push(item.id.clone());
            state.items.insert(item.id.clone(), item.clone());
        }
        debug!(
            "Committed {} ({} chars -> {} char summary)",
            item.id,
            item.original.len(),
            item.summary.len()
        );
        Ok(item)
    }

    /// One summarization call. The result is trimmed and never empty.
    pub(crate) async fn summarize(&self, text: &str) -> Result<String> {
        let prompt = build_summary_prompt(text);
        let summary = self
            .backend
            .generate(&prompt, Some(self.config.summarizer.max_summary_tokens))
            .await
            .map_err(|e| Error::backend(Stage::Commit, BackendError::Summarization(Box::new(e))))?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(Error::backend(
                Stage::Commit,
                BackendError::Summarization(Box::new(BackendError::EmptyResponse)),
            ));
        }
        Ok(summary)
    }

    /// Original texts of the `k` items most similar to `query`.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        Ok(self
            .search_passages(query, k)
            .await?
            .into_iter()
            .map(|p| p.original)
            .collect())
    }

    /// Up to `k` items most similar to `query`, best first, excluding any
    /// below the similarity floor.
    pub async fn search_passages(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .encode(query)
            .await
            .and_then(validate_embedding)
            .map_err(|e| Error::embedding(Stage::Search, e))?;

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let hits = state.index.search(&query_vec, k)?;
        let mut passages = Vec::with_capacity(hits.len());
        for (id, similarity) in hits {
            if similarity < self.config.similarity_floor {
                continue;
            }
            let item = state
                .items
                .get(&id)
                .ok_or_else(|| IndexError::Orphan(id.clone()))?;
            passages.push(Passage {
                id,
                original: item.original.clone(),
                summary: item.summary.clone(),
                similarity,
            });
        }
        info!("Retrieved {} passage(s) for query", passages.len());
        Ok(passages)
    }

    pub fn get(&self, id: &str) -> Option<StoredItem> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.items.get(id).cloned()
    }

    /// Item ids in commit order.
    pub fn ids(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.order.clone()
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every item.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.items.clear();
        state.order.clear();
        state.index.clear();
    }
}

fn validate_embedding(vector: Vec<f32>) -> std::result::Result<Vec<f32>, EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }
    Ok(vector)
}
