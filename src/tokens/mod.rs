//! Token Estimation
//!
//! Approximate token accounting used to drive compaction thresholds. A fixed
//! characters-per-token ratio stands in for real tokenization: the contract
//! is monotonicity (longer text never costs fewer tokens) and determinism,
//! not billing accuracy.

mod estimator;

pub use estimator::{EstimatorConfig, TokenEstimator};

/// Approximate characters per token for typical English/code text.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message framing overhead (role, delimiters).
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 4;

/// Framing overhead of a tool_use block, on top of its serialized input.
pub const DEFAULT_TOOL_USE_OVERHEAD: usize = 10;

/// Framing overhead of a tool_result block, on top of its content.
pub const DEFAULT_TOOL_RESULT_OVERHEAD: usize = 10;

/// Flat cost of an image block, matching typical provider overhead.
pub const DEFAULT_IMAGE_TOKENS: usize = 1_500;

/// Flat cost of a document block.
pub const DEFAULT_DOCUMENT_TOKENS: usize = 2_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        assert!(DEFAULT_CHARS_PER_TOKEN > 0);
        assert!(DEFAULT_MESSAGE_OVERHEAD > 0);
        assert!(DEFAULT_IMAGE_TOKENS < DEFAULT_DOCUMENT_TOKENS);
    }
}
