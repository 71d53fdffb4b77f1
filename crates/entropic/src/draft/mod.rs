//! Multi-draft answer generation.
//!
//! A draft cycle runs forward through [`DraftStage`]s:
//!
//! 1. **Sampling**: the configured [`SamplingStrategy`] splits the retrieved
//!    passages into one [`ContextBundle`] per candidate.
//! 2. **Generating**: one call produces a shared solution framework, then
//!    every candidate is generated concurrently from the framework and its
//!    bundle. Failed candidates are dropped; the cycle fails only when none
//!    succeed.
//! 3. **Synthesizing**: the configured [`SynthesisStrategy`] merges the
//!    surviving drafts. A single survivor is returned as is.
//!
//! With one candidate, sampling and synthesis are skipped: the framework
//! call is followed by a single generation over every passage, and that
//! generation's text is the answer.

pub mod prompt;
pub mod sampling;
pub mod synthesis;

use crate::api::backend::{DeltaSink, TextCompletion};
use crate::context::entropy::EntropyEvaluator;
use crate::error::{BackendError, ConfigError, Error, Result, Stage};
use crate::session::events::{EventHandler, SessionEvent};
use crate::store::Passage;
use futures::future::join_all;
use prompt::{candidate_prompt, framework_prompt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use sampling::{ContextBundle, ContextSampler, SamplingStrategy};
pub use synthesis::{SynthesisInput, SynthesisStrategy, Synthesizer};

/// One candidate answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub id: usize,
    /// Id of the [`ContextBundle`] the draft was generated from.
    pub sample_id: String,
    pub text: String,
}

/// Stages of a draft cycle, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DraftStage {
    Sampling,
    Generating,
    Synthesizing,
    Done,
}

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// Number of candidate drafts per answer.
    pub candidates: usize,
    pub sampling: SamplingStrategy,
    pub synthesis: SynthesisStrategy,
    /// Passages per candidate bundle.
    pub bundle_size: usize,
    /// Seed for the randomized samplers.
    pub seed: u64,
    /// Completion limit for every draft-cycle call.
    pub max_tokens: Option<u32>,
    /// Lexical similarity at which drafts or sentences count as agreeing.
    pub agreement: f64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            candidates: 1,
            sampling: SamplingStrategy::default(),
            synthesis: SynthesisStrategy::default(),
            bundle_size: 2,
            seed: 0x5eed,
            max_tokens: None,
            agreement: 0.5,
        }
    }
}

impl DraftConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.candidates == 0 {
            return Err(ConfigError::invalid("draft.candidates", "must be at least 1"));
        }
        if self.bundle_size == 0 {
            return Err(ConfigError::invalid("draft.bundle_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.agreement) {
            return Err(ConfigError::invalid(
                "draft.agreement",
                format!("{} is outside [0, 1]", self.agreement),
            ));
        }
        Ok(())
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Inputs to one draft cycle.
#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub query: &'a str,
    /// Retained segments and recent history, already fitted to the budget.
    pub context: &'a str,
    pub passages: &'a [Passage],
}

pub struct DraftEngine {
    backend: Arc<dyn TextCompletion>,
    sampler: Box<dyn ContextSampler>,
    synthesizer: Box<dyn Synthesizer>,
    config: DraftConfig,
}

/// Tracks the current stage and announces transitions.
struct Cycle<'e> {
    stage: Option<DraftStage>,
    events: &'e dyn EventHandler,
}

impl<'e> Cycle<'e> {
    fn new(events: &'e dyn EventHandler) -> Self {
        Self {
            stage: None,
            events,
        }
    }

    fn enter(&mut self, next: DraftStage) {
        debug_assert!(
            self.stage.is_none_or(|current| current < next),
            "draft stage moved backwards: {:?} -> {next:?}",
            self.stage
        );
        self.stage = Some(next);
        debug!("Draft cycle: {next:?}");
        self.events.on_event(&SessionEvent::DraftStage(next));
    }
}

impl DraftEngine {
    pub fn new(
        backend: Arc<dyn TextCompletion>,
        evaluator: EntropyEvaluator,
        config: DraftConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            backend,
            sampler: config.sampling.build(evaluator, config.seed),
            synthesizer: config.synthesis.build(config.agreement),
            config,
        })
    }

    pub fn config(&self) -> &DraftConfig {
        &self.config
    }

    /// Run a full cycle and return the answer.
    pub async fn run(&self, request: DraftRequest<'_>, events: &dyn EventHandler) -> Result<String> {
        self.run_cycle(request, events, None).await
    }

    /// Like [`run`](Self::run), forwarding the answer's text to `on_delta`
    /// as it is produced: the single generation when there is one
    /// candidate, otherwise the synthesis step.
    pub async fn run_streaming(
        &self,
        request: DraftRequest<'_>,
        events: &dyn EventHandler,
        on_delta: &mut DeltaSink<'_>,
    ) -> Result<String> {
        self.run_cycle(request, events, Some(on_delta)).await
    }

    async fn run_cycle(
        &self,
        request: DraftRequest<'_>,
        events: &dyn EventHandler,
        on_delta: Option<&mut DeltaSink<'_>>,
    ) -> Result<String> {
        let mut cycle = Cycle::new(events);
        let max_tokens = self.config.max_tokens;
        let candidates = self.config.candidates;

        if candidates == 1 {
            cycle.enter(DraftStage::Generating);
            let framework = self.framework(&request).await?;
            let bundle = ContextBundle::all(request.passages);
            let prompt = candidate_prompt(request.query, &framework, request.context, &bundle);
            let text = match on_delta {
                Some(sink) => self.backend.generate_stream(&prompt, max_tokens, sink).await,
                None => self.backend.generate(&prompt, max_tokens).await,
            }
            .map_err(|e| Error::backend(Stage::Generate, e))?;
            events.on_event(&SessionEvent::DraftGenerated {
                id: 0,
                sample: &bundle.id,
            });
            cycle.enter(DraftStage::Done);
            return Ok(text);
        }

        cycle.enter(DraftStage::Sampling);
        let bundles = self
            .sampler
            .sample(request.passages, candidates, self.config.bundle_size);

        cycle.enter(DraftStage::Generating);
        let framework = self.framework(&request).await?;
        let prompts: Vec<String> = bundles
            .iter()
            .map(|bundle| candidate_prompt(request.query, &framework, request.context, bundle))
            .collect();
        let results = join_all(
            prompts
                .iter()
                .map(|prompt| self.backend.generate(prompt, max_tokens)),
        )
        .await;

        let mut drafts = Vec::with_capacity(candidates);
        let mut last_error = None;
        for (id, (bundle, result)) in bundles.iter().zip(results).enumerate() {
            let result = result.and_then(|text| {
                if text.trim().is_empty() {
                    Err(BackendError::EmptyResponse)
                } else {
                    Ok(text)
                }
            });
            match result {
                Ok(text) => {
                    events.on_event(&SessionEvent::DraftGenerated {
                        id,
                        sample: &bundle.id,
                    });
                    drafts.push(Draft {
                        id,
                        sample_id: bundle.id.clone(),
                        text,
                    });
                }
                Err(e) => {
                    warn!("Draft {id} ({}) failed: {e}", bundle.id);
                    events.on_event(&SessionEvent::DraftFailed {
                        id,
                        error: &e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        if drafts.is_empty() {
            return Err(Error::backend(
                Stage::Generate,
                BackendError::AllDraftsFailed {
                    attempted: candidates,
                    last: last_error.map(|e| e.to_string()).unwrap_or_default(),
                },
            ));
        }
        info!("{} of {candidates} draft(s) succeeded", drafts.len());

        cycle.enter(DraftStage::Synthesizing);
        let answer = if drafts.len() == 1 {
            let text = drafts.remove(0).text;
            if let Some(sink) = on_delta {
                sink(&text);
            }
            text
        } else {
            let input = SynthesisInput {
                query: request.query,
                framework: &framework,
                drafts: &drafts,
                max_tokens,
            };
            self.synthesizer
                .synthesize(self.backend.as_ref(), input, on_delta)
                .await
                .map_err(|e| Error::backend(Stage::Synthesize, e))?
        };
        cycle.enter(DraftStage::Done);
        Ok(answer)
    }

    async fn framework(&self, request: &DraftRequest<'_>) -> Result<String> {
        let prompt = framework_prompt(request.query, request.context, request.passages);
        self.backend
            .generate(&prompt, self.config.max_tokens)
            .await
            .map_err(|e| Error::backend(Stage::Framework, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::backend::FnCompletion;
    use crate::session::events::{FnEventHandler, NoopHandler};
    use crate::testing::{scripted_backend, scripted_reply};
    use prompt::CANDIDATE_INSTRUCTION;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn passages() -> Vec<Passage> {
        ["Paris is the capital of France.", "Lyon is known for food.", "The Seine flows through Paris."]
            .iter()
            .enumerate()
            .map(|(i, t)| Passage {
                id: format!("it-{i}"),
                original: t.to_string(),
                summary: t.to_string(),
                similarity: 0.8,
            })
            .collect()
    }

    fn engine(backend: Arc<dyn TextCompletion>, config: DraftConfig) -> DraftEngine {
        DraftEngine::new(backend, EntropyEvaluator::default(), config).unwrap()
    }

    fn request<'a>(passages: &'a [Passage]) -> DraftRequest<'a> {
        DraftRequest {
            query: "What is the capital of France?",
            context: "Earlier: the user asked about Europe.",
            passages,
        }
    }

    fn stage_recorder(stages: Arc<Mutex<Vec<DraftStage>>>) -> impl EventHandler {
        FnEventHandler::new(move |event| {
            if let SessionEvent::DraftStage(stage) = event {
                stages.lock().unwrap().push(*stage);
            }
        })
    }

    #[tokio::test]
    async fn single_candidate_returns_generation_unmodified() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let backend = FnCompletion::new(10_000, move |prompt| {
            counted.fetch_add(1, Ordering::SeqCst);
            if prompt.starts_with(CANDIDATE_INSTRUCTION) {
                Ok("  The capital is Paris.  ".to_string())
            } else {
                Ok(scripted_reply(prompt))
            }
        });
        let passages = passages();
        let stages = Arc::new(Mutex::new(Vec::new()));
        let answer = engine(Arc::new(backend), DraftConfig::default())
            .run(request(&passages), &stage_recorder(stages.clone()))
            .await
            .unwrap();
        assert_eq!(answer, "  The capital is Paris.  ");
        assert_eq!(
            *stages.lock().unwrap(),
            vec![DraftStage::Generating, DraftStage::Done]
        );
        // Framework plus one generation.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn multi_candidate_cycle_visits_every_stage() {
        let config = DraftConfig {
            candidates: 3,
            ..Default::default()
        };
        let engine = engine(Arc::new(scripted_backend()), config);
        let passages = passages();
        let stages = Arc::new(Mutex::new(Vec::new()));
        let answer = engine
            .run(request(&passages), &stage_recorder(stages.clone()))
            .await
            .unwrap();
        assert_eq!(answer, "Synthesized final answer.");
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                DraftStage::Sampling,
                DraftStage::Generating,
                DraftStage::Synthesizing,
                DraftStage::Done
            ]
        );
    }

    #[tokio::test]
    async fn failed_candidates_are_excluded() {
        let candidate_calls = AtomicUsize::new(0);
        let backend = FnCompletion::new(10_000, move |prompt| {
            if prompt.starts_with(CANDIDATE_INSTRUCTION) {
                let n = candidate_calls.fetch_add(1, Ordering::SeqCst);
                if n == 1 {
                    return Err(BackendError::Http {
                        status: 500,
                        body: "overloaded".into(),
                    });
                }
                return Ok(format!("draft number {n}"));
            }
            Ok(scripted_reply(prompt))
        });
        let config = DraftConfig {
            candidates: 4,
            ..Default::default()
        };
        let engine = engine(Arc::new(backend), config);
        let passages = passages();
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = failures.clone();
        let handler = FnEventHandler::new(move |event| {
            if let SessionEvent::DraftFailed { .. } = event {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        let answer = engine.run(request(&passages), &handler).await.unwrap();
        assert_eq!(answer, "Synthesized final answer.");
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_failed_candidates_is_a_generate_error() {
        let backend = FnCompletion::new(10_000, |prompt| {
            if prompt.starts_with(CANDIDATE_INSTRUCTION) {
                Err(BackendError::Timeout(std::time::Duration::from_secs(1)))
            } else {
                Ok(scripted_reply(prompt))
            }
        });
        let config = DraftConfig {
            candidates: 3,
            ..Default::default()
        };
        let passages = passages();
        let err = engine(Arc::new(backend), config)
            .run(request(&passages), &NoopHandler)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Generate));
        assert!(matches!(
            err,
            Error::Backend {
                source: BackendError::AllDraftsFailed { attempted: 3, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn single_survivor_skips_synthesis() {
        let candidate_calls = AtomicUsize::new(0);
        let backend = FnCompletion::new(10_000, move |prompt| {
            if prompt.starts_with(CANDIDATE_INSTRUCTION) {
                let n = candidate_calls.fetch_add(1, Ordering::SeqCst);
                return if n == 0 {
                    Ok("the only survivor".to_string())
                } else {
                    Err(BackendError::EmptyResponse)
                };
            }
            if prompt.contains("=== DRAFTS ===") {
                panic!("synthesis must be skipped");
            }
            Ok(scripted_reply(prompt))
        });
        let config = DraftConfig {
            candidates: 3,
            ..Default::default()
        };
        let passages = passages();
        let answer = engine(Arc::new(backend), config)
            .run(request(&passages), &NoopHandler)
            .await
            .unwrap();
        assert_eq!(answer, "the only survivor");
    }

    #[tokio::test]
    async fn framework_failure_is_reported_as_framework_stage() {
        let backend = FnCompletion::new(10_000, |_| Err(BackendError::EmptyResponse));
        let passages = passages();
        let err = engine(Arc::new(backend), DraftConfig::default())
            .run(request(&passages), &NoopHandler)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Framework));
    }

    #[tokio::test]
    async fn streaming_forwards_the_answer() {
        let passages = passages();
        for candidates in [1, 3] {
            let config = DraftConfig {
                candidates,
                ..Default::default()
            };
            let engine = engine(Arc::new(scripted_backend()), config);
            let mut streamed = String::new();
            let mut sink = |delta: &str| streamed.push_str(delta);
            let answer = engine
                .run_streaming(request(&passages), &NoopHandler, &mut sink)
                .await
                .unwrap();
            assert_eq!(streamed, answer);
        }
    }

    #[test]
    fn config_validation() {
        assert!(DraftConfig::default().validate().is_ok());
        for bad in [
            DraftConfig {
                candidates: 0,
                ..Default::default()
            },
            DraftConfig {
                bundle_size: 0,
                ..Default::default()
            },
            DraftConfig {
                agreement: 1.5,
                ..Default::default()
            },
        ] {
            assert!(bad.validate().is_err());
        }
    }
}
