//! Character-ratio token estimator.

use super::{
    DEFAULT_CHARS_PER_TOKEN, DEFAULT_DOCUMENT_TOKENS, DEFAULT_IMAGE_TOKENS,
    DEFAULT_MESSAGE_OVERHEAD, DEFAULT_TOOL_RESULT_OVERHEAD, DEFAULT_TOOL_USE_OVERHEAD,
};
use crate::session::{ContentBlock, ConversationMessage, MessageContent};

/// Tunable constants for the estimator. Ships with defaults matching typical
/// provider overhead; all of them are overridable.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub chars_per_token: usize,
    pub message_overhead: usize,
    pub tool_use_overhead: usize,
    pub tool_result_overhead: usize,
    pub image_tokens: usize,
    pub document_tokens: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
            tool_use_overhead: DEFAULT_TOOL_USE_OVERHEAD,
            tool_result_overhead: DEFAULT_TOOL_RESULT_OVERHEAD,
            image_tokens: DEFAULT_IMAGE_TOKENS,
            document_tokens: DEFAULT_DOCUMENT_TOKENS,
        }
    }
}

/// Deterministic, monotone token approximation for message content.
#[derive(Debug, Clone, Default)]
pub struct TokenEstimator {
    config: EstimatorConfig,
}

impl TokenEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Estimate tokens for a plain text span.
    pub fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(self.config.chars_per_token)
    }

    /// Estimate tokens for a full message: per-message overhead plus every
    /// content block, thinking text, and tool-call record.
    pub fn estimate_message(&self, message: &ConversationMessage) -> usize {
        let mut tokens = self.config.message_overhead;

        match &message.content {
            MessageContent::Text(text) => tokens += self.estimate(text),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    tokens += self.estimate_block(block);
                }
            }
        }

        if let Some(thinking) = &message.thinking {
            tokens += self.estimate(thinking);
        }

        for call in &message.tool_calls {
            tokens += self.config.tool_use_overhead + self.estimate_value(&call.input);
            if let Some(result) = &call.result {
                tokens += self.config.tool_result_overhead + self.estimate_value(result);
            }
        }

        tokens
    }

    fn estimate_block(&self, block: &ContentBlock) -> usize {
        match block {
            ContentBlock::Text { text } => self.estimate(text),
            ContentBlock::Thinking { thinking } => self.estimate(thinking),
            ContentBlock::ToolUse { input, .. } => {
                self.config.tool_use_overhead + self.estimate_value(input)
            }
            ContentBlock::ToolResult { content, .. } => {
                self.config.tool_result_overhead + self.estimate_value(content)
            }
            ContentBlock::Image { .. } => self.config.image_tokens,
            ContentBlock::Document { .. } => self.config.document_tokens,
        }
    }

    fn estimate_value(&self, value: &serde_json::Value) -> usize {
        match value {
            serde_json::Value::String(s) => self.estimate(s),
            other => self.estimate(&other.to_string()),
        }
    }
}
