//! Rolling windows over session state: the conversation history and the
//! buffer of retained high-entropy segments.
//!
//! Both are read newest-first into a token allowance. The newest entry is
//! always represented; if it alone exceeds the allowance it is cut to a
//! word prefix that fits.

use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: Utc::now(),
        }
    }

    fn render(&self) -> String {
        format!("[{}]: {}", self.role, self.content)
    }
}

/// Newest-first selection of `entries` within `budget` tokens, returned in
/// chronological order.
fn tail_within<F>(entries: &[String], budget: usize, count: F) -> Vec<String>
where
    F: Fn(&str) -> usize,
{
    let mut picked = Vec::new();
    let mut used = 0;
    for (i, entry) in entries.iter().enumerate().rev() {
        let tokens = count(entry);
        if used + tokens <= budget {
            used += tokens;
            picked.push(entry.clone());
            continue;
        }
        if i == entries.len() - 1 {
            let cut = truncate_to(entry, budget, &count);
            if !cut.is_empty() {
                picked.push(cut);
            }
        }
        break;
    }
    picked.reverse();
    picked
}

/// Longest word prefix of `text` whose token count fits `budget`.
fn truncate_to<F>(text: &str, budget: usize, count: &F) -> String
where
    F: Fn(&str) -> usize,
{
    let words: Vec<&str> = text.split_whitespace().collect();
    let (mut lo, mut hi) = (0, words.len());
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if count(&words[..mid].join(" ")) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    words[..lo].join(" ")
}

/// Conversation turns in chronological order.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed exchange.
    pub fn record_exchange(&mut self, query: &str, answer: &str) {
        self.turns.push(Turn::user(query));
        self.turns.push(Turn::assistant(answer));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The most recent turns fitting `budget` tokens, rendered one per line.
    pub fn tail_within<F>(&self, budget: usize, count: F) -> String
    where
        F: Fn(&str) -> usize,
    {
        let rendered: Vec<String> = self.turns.iter().map(Turn::render).collect();
        tail_within(&rendered, budget, count).join("\n")
    }
}

/// Retained high-entropy segment texts in ingestion order.
#[derive(Debug, Clone, Default)]
pub struct RetainedBuffer {
    segments: Vec<String>,
}

impl RetainedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<I, S>(&mut self, segments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segments.extend(
            segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.trim().is_empty()),
        );
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// The most recent segments fitting `budget` tokens, blank-line separated.
    pub fn tail_within<F>(&self, budget: usize, count: F) -> String
    where
        F: Fn(&str) -> usize,
    {
        tail_within(&self.segments, budget, count).join("\n\n")
    }
}
