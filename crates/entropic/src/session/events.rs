//! Events and handlers for a [`Session`](super::Session).
//!
//! The session reports what it decided at every step (how text was split,
//! what was committed, how many passages came back, which drafts survived)
//! through [`SessionEvent`] variants. Callers implement [`EventHandler`] to
//! observe them.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget sessions |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::draft::DraftStage;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by a session while ingesting and answering.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// Text was split and classified.
    Ingested {
        segments: usize,
        retained: usize,
        compressed: usize,
    },
    /// A segment was summarized, embedded and indexed.
    Committed { id: &'a str },
    /// Passages retrieved for a query.
    Retrieved { passages: usize },
    /// The assembled prompt was recursively compressed to fit the window.
    PromptCompressed { before: usize, after: usize },
    /// The draft cycle moved to a new stage.
    DraftStage(DraftStage),
    /// A candidate draft was produced from a context sample.
    DraftGenerated { id: usize, sample: &'a str },
    /// A candidate draft failed; the cycle continues with the others.
    DraftFailed { id: usize, error: &'a str },
    /// A turn completed and was recorded in history.
    Answered { query: &'a str, answer: &'a str },
    /// History, retained buffer and store were cleared.
    Reset,
}

/// Handler for session events.
///
/// ```ignore
/// struct Counter(AtomicUsize);
///
/// impl EventHandler for Counter {
///     fn on_event(&self, event: &SessionEvent<'_>) {
///         if let SessionEvent::Committed { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SessionEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&SessionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, my_debug_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add `handler` only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        match event {
            SessionEvent::Ingested {
                segments,
                retained,
                compressed,
            } => {
                info!("Ingested {segments} segment(s): {retained} retained, {compressed} compressed");
            }
            SessionEvent::Committed { id } => debug!("Committed {id}"),
            SessionEvent::Retrieved { passages } => debug!("Retrieved {passages} passage(s)"),
            SessionEvent::PromptCompressed { before, after } => {
                info!("Prompt compressed: {before} -> {after} tokens");
            }
            SessionEvent::DraftStage(stage) => debug!("Draft stage: {stage:?}"),
            SessionEvent::DraftGenerated { id, sample } => {
                debug!("Draft {id} generated from {sample}");
            }
            SessionEvent::DraftFailed { id, error } => warn!("Draft {id} failed: {error}"),
            SessionEvent::Answered { answer, .. } => {
                info!("Answered ({} chars)", answer.len());
            }
            SessionEvent::Reset => info!("Session reset"),
        }
    }
}
