//! The [`Session`]: ingestion, query answering and reset over one retained
//! buffer, one conversation history and one retrieval store.
//!
//! # Answering a query
//!
//! 1. Retrieve the top-k passages for the query.
//! 2. Fit the newest retained segments, the newest history turns and the
//!    best passages into their shares of the prompt budget.
//! 3. If the assembled framework prompt still exceeds the prompt ceiling,
//!    recursively compress the context into the room that is left.
//! 4. Run the draft cycle.
//! 5. Record the exchange in history. Failed or cancelled turns leave
//!    history untouched.

pub mod config;
pub mod events;

use crate::api::backend::{DeltaSink, Embedder, TextCompletion};
use crate::api::retry::{RetryingCompletion, RetryingEmbedder};
use crate::context::budget::PromptBudget;
use crate::context::entropy::EntropyEvaluator;
use crate::context::segmenter::Segmenter;
use crate::context::window::{History, RetainedBuffer};
use crate::draft::prompt::framework_prompt;
use crate::draft::{DraftEngine, DraftRequest};
use crate::error::{ConfigError, Result};
use crate::generate_id;
use crate::store::{Passage, RetrievalStore};
use config::EngineConfig;
use events::{EventHandler, NoopHandler, SessionEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// What one [`Session::ingest`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub segments: usize,
    pub retained: usize,
    pub compressed: usize,
    /// Store ids of the compressed segments, in source order.
    pub item_ids: Vec<String>,
}

pub struct Session {
    id: String,
    config: EngineConfig,
    backend: Arc<dyn TextCompletion>,
    segmenter: Segmenter,
    store: RetrievalStore,
    drafts: DraftEngine,
    budget: PromptBudget,
    retained: RetainedBuffer,
    history: History,
    events: Arc<dyn EventHandler>,
}

impl Session {
    /// Build a session. Every backend and embedding call goes through the
    /// configured retry policy.
    pub fn new(
        backend: Arc<dyn TextCompletion>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let retry = config.retry();
        let backend: Arc<dyn TextCompletion> =
            Arc::new(RetryingCompletion::new(backend, retry.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(RetryingEmbedder::new(embedder, retry));

        let evaluator = EntropyEvaluator::new(config.entropy.clone())?;
        let segmenter = Segmenter::new(config.segmenter.clone(), evaluator.clone())?;
        let store = RetrievalStore::new(
            backend.clone(),
            embedder,
            segmenter.clone(),
            config.retrieval.clone(),
            config.compression.clone(),
        )?;
        let drafts = DraftEngine::new(backend.clone(), evaluator, config.draft.clone())?;

        let mut budget = PromptBudget::new(backend.max_context_length(), &config.budget);
        if config.budget.output_reserve == 0
            && let Some(max_tokens) = config.draft.max_tokens
        {
            budget = budget.with_output_reserve(max_tokens as usize);
        }

        let id = generate_id("ss");
        info!(
            "Session {id}: context window {} tokens, prompt ceiling {}",
            budget.max_context(),
            budget.max_prompt_tokens()
        );
        Ok(Self {
            id,
            config,
            backend,
            segmenter,
            store,
            drafts,
            budget,
            retained: RetainedBuffer::new(),
            history: History::new(),
            events: Arc::new(NoopHandler),
        })
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.events = Arc::new(handler);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    // ── Accessors ──

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn retained(&self) -> &RetainedBuffer {
        &self.retained
    }

    pub fn store(&self) -> &RetrievalStore {
        &self.store
    }

    pub fn budget(&self) -> &PromptBudget {
        &self.budget
    }

    // ── Operations ──

    /// Split `text`, keep its high-entropy segments in the retained buffer
    /// and commit the rest to the store.
    ///
    /// Every compressed segment is committed before anything is retained, so
    /// a failed commit leaves the retained buffer unchanged. Items committed
    /// before the failure stay in the store. Re-ingesting the same text adds
    /// a second copy.
    pub async fn ingest(&mut self, text: &str) -> Result<IngestReport> {
        let segments = self.segmenter.split(text);
        let (retained, compressed) = self.segmenter.classify(&segments);

        let mut item_ids = Vec::with_capacity(compressed.len());
        for segment in &compressed {
            let content = segment.content();
            if content.is_empty() {
                continue;
            }
            let id = self.store.commit(content).await?;
            self.events.on_event(&SessionEvent::Committed { id: &id });
            item_ids.push(id);
        }
        self.retained
            .extend(retained.iter().map(|s| s.fresh_content().to_string()));

        let report = IngestReport {
            segments: segments.len(),
            retained: retained.len(),
            compressed: compressed.len(),
            item_ids,
        };
        self.events.on_event(&SessionEvent::Ingested {
            segments: report.segments,
            retained: report.retained,
            compressed: report.compressed,
        });
        Ok(report)
    }

    /// Answer `query` from the retained context, retrieved passages and
    /// recent history.
    pub async fn chat(&mut self, query: &str) -> Result<String> {
        let (context, passages) = self.assemble(query).await?;
        let request = DraftRequest {
            query,
            context: &context,
            passages: &passages,
        };
        let answer = self.drafts.run(request, self.events.as_ref()).await?;
        self.record(query, &answer);
        Ok(answer)
    }

    /// Like [`chat`](Self::chat), forwarding the answer's text to `on_delta`
    /// as the backend streams it.
    pub async fn chat_stream<F>(&mut self, query: &str, mut on_delta: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let (context, passages) = self.assemble(query).await?;
        let request = DraftRequest {
            query,
            context: &context,
            passages: &passages,
        };
        let sink: &mut DeltaSink<'_> = &mut on_delta;
        let answer = self
            .drafts
            .run_streaming(request, self.events.as_ref(), sink)
            .await?;
        self.record(query, &answer);
        Ok(answer)
    }

    /// Clear history, the retained buffer and the store. Text must be
    /// ingested again afterwards.
    pub fn reset(&mut self) {
        self.history.clear();
        self.retained.clear();
        self.store.clear();
        self.events.on_event(&SessionEvent::Reset);
        info!("Session {} reset", self.id);
    }

    fn record(&mut self, query: &str, answer: &str) {
        self.history.record_exchange(query, answer);
        self.events
            .on_event(&SessionEvent::Answered { query, answer });
    }

    /// Build the context string and passage list for a query, both fitted
    /// to the prompt budget.
    async fn assemble(&self, query: &str) -> Result<(String, Vec<Passage>)> {
        let passages = self
            .store
            .search_passages(query, self.config.retrieval.top_k)
            .await?;
        let passages = self.fit_passages(passages);
        self.events.on_event(&SessionEvent::Retrieved {
            passages: passages.len(),
        });

        let count = |text: &str| self.backend.token_count(text);
        let retained = self.retained.tail_within(self.budget.retained_tokens(), count);
        let history = self.history.tail_within(self.budget.history_tokens(), count);
        let context = [
            ("Retained context", retained),
            ("Conversation so far", history),
        ]
        .into_iter()
        .filter(|(_, body)| !body.is_empty())
        .map(|(title, body)| format!("## {title}\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n");

        let ceiling = self.budget.max_prompt_tokens();
        let prompt_tokens = count(&framework_prompt(query, &context, &passages));
        let usage = self.budget.usage(prompt_tokens);
        debug!("Session {}: {}", self.id, usage.to_log_string());
        if usage.fits() {
            return Ok((context, passages));
        }

        let scaffold = count(&framework_prompt(query, "", &passages));
        let room = ceiling.saturating_sub(scaffold);
        let compressed = self.store.recursive_compress(&context, room).await?;
        let after = count(&framework_prompt(query, &compressed, &passages));
        self.events.on_event(&SessionEvent::PromptCompressed {
            before: prompt_tokens,
            after,
        });
        Ok((compressed, passages))
    }

    /// Keep passages, best first, while their originals fit the passage
    /// share.
    fn fit_passages(&self, passages: Vec<Passage>) -> Vec<Passage> {
        let mut remaining = self.budget.passage_tokens();
        passages
            .into_iter()
            .filter(|p| {
                let tokens = self.backend.token_count(&p.original);
                if tokens <= remaining {
                    remaining -= tokens;
                    true
                } else {
                    debug!("Passage {} ({tokens} tokens) does not fit, skipped", p.id);
                    false
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::backend::FnCompletion;
    use crate::api::embedding::HashingEmbedder;
    use crate::context::budget::BudgetConfig;
    use crate::context::segmenter::SegmenterConfig;
    use crate::error::{BackendError, Stage};
    use crate::testing::{scripted_backend, scripted_reply, word_count};
    use events::FnEventHandler;
    use std::sync::Mutex;

    fn config() -> EngineConfig {
        EngineConfig {
            segmenter: SegmenterConfig {
                target_size: 5,
                overlap: 0,
                threshold: 1.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn session_with(backend: impl TextCompletion + 'static, config: EngineConfig) -> Session {
        Session::new(
            Arc::new(backend),
            Arc::new(HashingEmbedder::new(4096)),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ingest_retains_dense_and_commits_sparse_segments() {
        let mut session = session_with(scripted_backend(), config());
        let report = session
            .ingest("AAAA. The quick brown fox jumps. BBBB.")
            .await
            .unwrap();
        assert_eq!(report.segments, 3);
        assert_eq!(report.retained, 1);
        assert_eq!(report.compressed, 2);
        assert_eq!(session.retained().segments(), ["The quick brown fox jumps."]);

        let originals: Vec<String> = report
            .item_ids
            .iter()
            .map(|id| session.store().get(id).unwrap().original)
            .collect();
        assert_eq!(originals, ["AAAA.", "BBBB."]);
    }

    #[tokio::test]
    async fn failed_commit_retains_nothing() {
        let backend = FnCompletion::new(10_000, |_| Err(BackendError::InvalidRequest("no".into())));
        let mut session = session_with(backend, config());
        let err = session
            .ingest("AAAA. The quick brown fox jumps. BBBB.")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Commit));
        assert!(session.retained().is_empty());
    }

    #[tokio::test]
    async fn chat_records_history_and_reset_clears_everything() {
        let mut session = session_with(scripted_backend(), config());
        session
            .ingest("AAAA. The quick brown fox jumps. BBBB.")
            .await
            .unwrap();
        let answer = session.chat("What does the fox do?").await.unwrap();
        assert_eq!(answer, "Candidate answer drawn from the sampled context.");
        assert_eq!(session.history().len(), 2);

        session.reset();
        assert!(session.history().is_empty());
        assert!(session.retained().is_empty());
        assert!(session.store().is_empty());
    }

    #[tokio::test]
    async fn failed_chat_leaves_history_untouched() {
        let backend = FnCompletion::new(10_000, |prompt| {
            if crate::context::summarizer::summary_source(prompt).is_some() {
                Ok(scripted_reply(prompt))
            } else {
                Err(BackendError::Http {
                    status: 400,
                    body: "bad request".into(),
                })
            }
        });
        let mut session = session_with(backend, config());
        session.ingest("AAAA. BBBB.").await.unwrap();
        let err = session.chat("anything?").await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Framework));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn oversized_context_is_compressed_before_generation() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let log = prompts.clone();
        let backend = FnCompletion::new(400, move |prompt| {
            log.lock().unwrap().push(word_count(prompt));
            Ok(scripted_reply(prompt))
        })
        .with_token_counter(word_count);
        let config = EngineConfig {
            segmenter: SegmenterConfig {
                target_size: 20,
                overlap: 0,
                threshold: 0.0,
                ..Default::default()
            },
            budget: BudgetConfig {
                retained_share: 0.95,
                history_share: 0.0,
                passage_share: 0.05,
                ..Default::default()
            },
            ..Default::default()
        };
        let compressed = Arc::new(Mutex::new(None));
        let seen = compressed.clone();
        let mut session = session_with(backend, config).with_event_handler(FnEventHandler::new(
            move |event| {
                if let SessionEvent::PromptCompressed { before, after } = event {
                    *seen.lock().unwrap() = Some((*before, *after));
                }
            },
        ));

        let text: String = (0..40)
            .map(|i| format!("Finding {i} links enzyme{i} with pathway{i} under condition{i}."))
            .collect::<Vec<_>>()
            .join(" ");
        session.ingest(&text).await.unwrap();
        assert!(!session.retained().is_empty());

        session.chat("Which pathway matters most?").await.unwrap();
        let (before, after) = compressed.lock().unwrap().expect("prompt was compressed");
        let ceiling = session.budget().max_prompt_tokens();
        assert!(before > ceiling);
        assert!(after <= ceiling);
        let largest = prompts.lock().unwrap().iter().copied().max().unwrap();
        assert!(largest <= session.budget().max_context());
    }

    #[tokio::test]
    async fn streaming_chat_forwards_deltas() {
        let mut session = session_with(scripted_backend(), config().with_candidates(2));
        session.ingest("AAAA. The quick brown fox jumps.").await.unwrap();
        let mut streamed = String::new();
        let answer = session
            .chat_stream("What jumps?", |delta| streamed.push_str(delta))
            .await
            .unwrap();
        assert_eq!(streamed, answer);
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let result = Session::new(
            Arc::new(scripted_backend()),
            Arc::new(HashingEmbedder::default()),
            EngineConfig::default().with_threshold(-1.0),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
