//! Context Window Compaction
//!
//! Keeps a conversation inside a model's token budget by replacing older
//! turns with a shorter summary before a request would be rejected upstream.
//!
//! ## Features
//!
//! - **Threshold decision**: trigger when estimated usage crosses a
//!   configurable ratio of the budget, with headroom reserved for the next
//!   response
//! - **Retention policy**: always keep the most recent messages; never
//!   separate a tool_use from its tool_result; never drop a pending tool call
//! - **Importance scoring**: first message, tool activity, and keyword hits
//!   mark messages the smart strategy preserves verbatim
//! - **Summaries**: deterministic exchange-grouped text by default, with a
//!   [`Summarizer`] seam for swapping in a model-backed implementation
//!
//! All heuristic constants ship as configurable defaults on
//! [`CompactionConfig`].

mod compactor;
mod config;
mod summary;

pub use compactor::ContextWindowCompactor;
pub use config::CompactionConfig;
pub use summary::{HeuristicSummarizer, Summarizer};

pub(crate) use summary::truncate_preview;

/// Default model context budget in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 200_000;

/// Default fraction of the budget at which compaction triggers.
pub const DEFAULT_THRESHOLD_RATIO: f32 = 0.8;

/// Tokens held back for the next model response.
pub const DEFAULT_RESERVED_TOKENS: usize = 4_096;

/// Minimum number of recent messages kept in full, regardless of importance.
pub const DEFAULT_MIN_MESSAGES_TO_PRESERVE: usize = 10;

/// Maximum characters of each exchange's text quoted in a summary.
pub const DEFAULT_PREVIEW_LEN: usize = 240;

/// Keywords that mark a message as important to the smart strategy.
pub const DEFAULT_IMPORTANT_KEYWORDS: [&str; 10] = [
    "important",
    "critical",
    "error",
    "bug",
    "fix",
    "summary",
    "conclusion",
    "remember",
    "decision",
    "todo",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        assert!(DEFAULT_THRESHOLD_RATIO > 0.0 && DEFAULT_THRESHOLD_RATIO < 1.0);
        assert!(DEFAULT_RESERVED_TOKENS < DEFAULT_MAX_TOKENS);
        assert!(DEFAULT_MIN_MESSAGES_TO_PRESERVE > 0);
        assert!(!DEFAULT_IMPORTANT_KEYWORDS.is_empty());
    }
}
