//! Compaction policy configuration.

use super::{
    DEFAULT_IMPORTANT_KEYWORDS, DEFAULT_MAX_TOKENS, DEFAULT_MIN_MESSAGES_TO_PRESERVE,
    DEFAULT_PREVIEW_LEN, DEFAULT_RESERVED_TOKENS, DEFAULT_THRESHOLD_RATIO,
};

/// Tunable compaction policy. Every field ships with a sensible default;
/// the keyword list and preview length are heuristic constants carried over
/// as-is, not semantics to infer from.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Model context budget in tokens.
    pub max_tokens: usize,
    /// Fraction of the usable budget at which compaction triggers.
    pub threshold_ratio: f32,
    /// Tokens held back for the next response.
    pub reserved_tokens: usize,
    /// Most recent messages always kept in full.
    pub min_messages_to_preserve: usize,
    /// Lowercased substrings that mark a message as important.
    pub important_keywords: Vec<String>,
    /// Maximum characters quoted per exchange in a summary.
    pub preview_len: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            threshold_ratio: DEFAULT_THRESHOLD_RATIO,
            reserved_tokens: DEFAULT_RESERVED_TOKENS,
            min_messages_to_preserve: DEFAULT_MIN_MESSAGES_TO_PRESERVE,
            important_keywords: DEFAULT_IMPORTANT_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }
}

impl CompactionConfig {
    /// Token usage at which [`should_compact`] fires.
    ///
    /// [`should_compact`]: super::ContextWindowCompactor::should_compact
    pub fn threshold_tokens(&self) -> usize {
        (self.max_tokens as f32 * self.threshold_ratio) as usize
    }

    /// Tokens available for a request payload once the response reserve is
    /// held back.
    pub fn request_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_is_below_budget() {
        let config = CompactionConfig::default();
        assert!(config.threshold_tokens() < config.max_tokens);
        assert!(config.threshold_tokens() > 0);
    }

    #[test]
    fn test_threshold_is_ratio_of_budget() {
        let config = CompactionConfig {
            max_tokens: 1_000,
            threshold_ratio: 0.5,
            ..Default::default()
        };
        assert_eq!(config.threshold_tokens(), 500);
    }

    #[test]
    fn test_request_budget_holds_back_reserve() {
        let config = CompactionConfig {
            max_tokens: 1_000,
            reserved_tokens: 200,
            ..Default::default()
        };
        assert_eq!(config.request_budget(), 800);
    }

    #[test]
    fn test_reserve_larger_than_budget_saturates() {
        let config = CompactionConfig {
            max_tokens: 100,
            reserved_tokens: 500,
            ..Default::default()
        };
        assert_eq!(config.request_budget(), 0);
    }
}
