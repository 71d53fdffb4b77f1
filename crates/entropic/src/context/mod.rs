//! Working-context management: scoring, segmentation, budgets and windows.
//!
//! 1. **[`entropy`]** scores text by information density.
//!
//! 2. **[`segmenter`]** splits text into overlapping segments and partitions
//!    them into retained (high entropy) and compressed (low entropy) sets.
//!
//! 3. **[`budget`]** computes how many tokens a prompt may use and how that
//!    allowance is shared.
//!
//! 4. **[`window`]** holds the conversation history and retained segments and
//!    reads their newest entries into a token allowance.
//!
//! 5. **[`summarizer`]** builds the prompts used to summarize committed
//!    segments.

pub mod budget;
pub mod entropy;
pub mod segmenter;
pub mod summarizer;
pub mod window;

pub use budget::{BudgetConfig, DEFAULT_CHARS_PER_TOKEN, PromptBudget, estimate_tokens};
pub use entropy::{EntropyConfig, EntropyEvaluator, EntropyMethod, EntropyScore, EntropyWeights};
pub use segmenter::{Segment, Segmenter, SegmenterConfig, reassemble};
pub use window::{History, RetainedBuffer};
