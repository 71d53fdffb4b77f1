//! Embedders: a local feature-hashing embedder that needs no network, and an
//! HTTP embedder for OpenAI-compatible `/embeddings` endpoints.

use super::backend::{EmbedFuture, Embedder};
use crate::context::entropy::terms;
use crate::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default output dimension of [`HashingEmbedder`].
pub const DEFAULT_DIMENSIONS: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Deterministic bag-of-terms embedder.
///
/// Unigrams and bigrams are hashed into signed buckets (bigrams at half
/// weight) and the result is L2-normalized, so texts sharing vocabulary land
/// close together under cosine similarity. Text without terms maps to the
/// zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let words = terms(text);
        let mut add = |feature: &str, weight: f32| {
            let h = fnv1a(feature.as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign * weight;
        };
        for word in &words {
            add(word, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn encode<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        let vector = self.embed(text);
        Box::pin(async move { Ok(vector) })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedder for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("entropic/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut req = self.client.post(self.url.as_str()).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(Duration::from_secs(60))
            } else {
                EmbeddingError::Request(e.to_string())
            }
        })?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let vector = parse_embedding(&body)?;
        debug!("Embedded {} chars into {} dims", text.len(), vector.len());
        Ok(vector)
    }
}

fn parse_embedding(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Parse(e.to_string()))?;
    parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or(EmbeddingError::Empty)
}

impl Embedder for HttpEmbedder {
    fn encode<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        Box::pin(self.request(text))
    }
}
