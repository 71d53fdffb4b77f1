//! End-to-end session behavior against an in-memory backend.

use entropic::api::BackendFuture;
use entropic::context::SegmenterConfig;
use entropic::context::summarizer::summary_source;
use entropic::error::BudgetError;
use entropic::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Word-counting backend. Summaries keep the last half of the source;
/// every other prompt gets a reply naming its kind.
struct ScriptedBackend {
    max_context: usize,
    /// Candidate generations that should fail, by call order.
    failing_candidates: Vec<usize>,
    candidate_calls: AtomicUsize,
    /// Delay before every non-summary reply.
    latency: Duration,
    /// Largest prompt seen, in words.
    largest_prompt: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            max_context: 100_000,
            failing_candidates: Vec::new(),
            candidate_calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
            largest_prompt: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn reply(&self, prompt: &str) -> Result<String, BackendError> {
        let size = words(prompt);
        self.largest_prompt.fetch_max(size, Ordering::SeqCst);
        if size > self.max_context {
            return Err(BackendError::InvalidRequest(format!(
                "prompt {size} > {}",
                self.max_context
            )));
        }
        if let Some(source) = summary_source(prompt) {
            let words: Vec<&str> = source.split_whitespace().collect();
            let keep = words.len().div_ceil(2).max(1);
            return Ok(words[words.len() - keep.min(words.len())..].join(" "));
        }
        if prompt.starts_with("Before anyone answers") {
            return Ok("Analyze, gather, answer, check.".to_string());
        }
        if prompt.starts_with("Answer the question below") {
            let n = self.candidate_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_candidates.contains(&n) {
                return Err(BackendError::Http {
                    status: 400,
                    body: "rejected".into(),
                });
            }
            return Ok(format!("Candidate {n} says the fox jumps."));
        }
        Ok("The fox jumps, according to every surviving draft.".to_string())
    }
}

impl TextCompletion for ScriptedBackend {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        _max_tokens: Option<u32>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            if summary_source(prompt).is_none() && !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.reply(prompt)
        })
    }

    fn max_context_length(&self) -> usize {
        self.max_context
    }

    fn token_count(&self, text: &str) -> usize {
        words(text)
    }
}

fn words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn sentence_config() -> EngineConfig {
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

fn session(backend: ScriptedBackend, config: EngineConfig) -> Session {
    Session::new(
        Arc::new(backend),
        Arc::new(HashingEmbedder::new(4096)),
        config,
    )
    .expect("valid config")
}

#[tokio::test]
async fn fox_scenario_splits_retains_and_stores() {
    let mut session = session(ScriptedBackend::new(), sentence_config());
    let report = session
        .ingest("AAAA. The quick brown fox jumps. BBBB.")
        .await
        .unwrap();

    assert_eq!((report.segments, report.retained, report.compressed), (3, 1, 2));
    assert_eq!(session.retained().segments(), ["The quick brown fox jumps."]);
    assert_eq!(session.store().len(), 2);
    for id in &report.item_ids {
        let item = session.store().get(id).unwrap();
        assert!(["AAAA.", "BBBB."].contains(&item.original.as_str()));
    }
}

#[tokio::test]
async fn committed_sentence_is_found_by_its_topic() {
    let session = session(ScriptedBackend::new(), EngineConfig::default());
    let store = session.store();
    store.commit("Paris is the capital of France.").await.unwrap();
    store
        .commit("Photosynthesis turns light into chemical energy.")
        .await
        .unwrap();

    let hits = store.search("capital of France", 1).await.unwrap();
    assert_eq!(hits, vec!["Paris is the capital of France.".to_string()]);
}

#[tokio::test]
async fn ten_thousand_tokens_compress_to_two_thousand_or_fail_bounded() {
    let session = session(ScriptedBackend::new(), EngineConfig::default().with_max_depth(5));
    let text: String = (0..1_000)
        .map(|i| format!("Ledger entry {i} records payment {} to vendor {i} today.", i * 3))
        .collect::<Vec<_>>()
        .join(" ");
    assert!(words(&text) >= 10_000);

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        session.store().recursive_compress(&text, 2_000),
    )
    .await
    .expect("compression is bounded");

    match outcome {
        Ok(compressed) => {
            assert!(words(&compressed) <= 2_000);
            assert!(!session.store().is_empty());
        }
        Err(Error::Budget {
            stage: Stage::Compress,
            source: BudgetError::CompressionBudgetExceeded { depth, .. },
        }) => assert!(depth <= 5),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unpunctuated_document_ingests_against_a_narrow_window() {
    let backend = ScriptedBackend {
        max_context: 4_000,
        ..ScriptedBackend::new()
    };
    let largest = backend.largest_prompt.clone();
    let mut session = session(backend, EngineConfig::default());
    let text = (0..10_000)
        .map(|i| format!("col{i} {}", i % 89))
        .collect::<Vec<_>>()
        .join(" ");

    let report = session.ingest(&text).await.unwrap();
    assert!(report.segments > 1);
    assert_eq!(report.retained + report.compressed, report.segments);
    assert!(largest.load(Ordering::SeqCst) <= 4_000);
}

#[tokio::test]
async fn chat_answers_and_records_one_exchange() {
    let mut session = session(ScriptedBackend::new(), sentence_config());
    session
        .ingest("AAAA. The quick brown fox jumps. BBBB.")
        .await
        .unwrap();

    let answer = session.chat("What does the fox do?").await.unwrap();
    assert_eq!(answer, "Candidate 0 says the fox jumps.");

    let turns = session.history().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "What does the fox do?");
    assert_eq!(turns[1].content, answer);
}

#[tokio::test]
async fn multi_draft_survives_a_failed_candidate() {
    let backend = ScriptedBackend {
        failing_candidates: vec![1],
        ..ScriptedBackend::new()
    };
    let config = sentence_config()
        .with_candidates(4)
        .with_sampling(SamplingStrategy::Relevance)
        .with_synthesis(SynthesisStrategy::Consensus);

    let stages = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(AtomicUsize::new(0));
    let (stage_log, failure_count) = (stages.clone(), failed.clone());
    let handler = FnEventHandler::new(move |event| match event {
        SessionEvent::DraftStage(stage) => stage_log.lock().unwrap().push(*stage),
        SessionEvent::DraftFailed { .. } => {
            failure_count.fetch_add(1, Ordering::SeqCst);
        }
        _ => {}
    });

    let mut session = session(backend, config).with_event_handler(handler);
    session
        .ingest("AAAA. The quick brown fox jumps. BBBB.")
        .await
        .unwrap();
    let answer = session.chat("What does the fox do?").await.unwrap();

    assert_eq!(answer, "The fox jumps, according to every surviving draft.");
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(
        *stages.lock().unwrap(),
        [
            DraftStage::Sampling,
            DraftStage::Generating,
            DraftStage::Synthesizing,
            DraftStage::Done
        ]
    );
}

#[tokio::test]
async fn all_candidates_failing_surfaces_generate_stage() {
    let backend = ScriptedBackend {
        failing_candidates: vec![0, 1, 2],
        ..ScriptedBackend::new()
    };
    let mut session = session(backend, sentence_config().with_candidates(3));
    let err = session.chat("Anything?").await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Generate));
    assert!(session.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_chat_leaves_history_untouched() {
    let backend = ScriptedBackend {
        latency: Duration::from_secs(30),
        ..ScriptedBackend::new()
    };
    let mut session = session(backend, sentence_config());
    let outcome =
        tokio::time::timeout(Duration::from_secs(1), session.chat("Slow question?")).await;
    assert!(outcome.is_err(), "chat should still be in flight");
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn streaming_chat_passes_text_through() {
    let mut session = session(ScriptedBackend::new(), sentence_config());
    let mut streamed = String::new();
    let answer = session
        .chat_stream("What does the fox do?", |delta| streamed.push_str(delta))
        .await
        .unwrap();
    assert_eq!(streamed, answer);
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn reset_requires_reingestion() {
    let mut session = session(ScriptedBackend::new(), sentence_config());
    session
        .ingest("AAAA. The quick brown fox jumps. BBBB.")
        .await
        .unwrap();
    session.chat("What does the fox do?").await.unwrap();

    session.reset();
    assert!(session.history().is_empty());
    assert!(session.retained().is_empty());
    assert!(session.store().is_empty());
    assert!(session.store().search("fox", 3).await.unwrap().is_empty());

    let report = session.ingest("AAAA. BBBB.").await.unwrap();
    assert_eq!(session.store().len(), report.item_ids.len());
}
