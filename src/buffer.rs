//! Conversation Buffer
//!
//! The live, append-oriented message sequence for the currently active
//! session. The buffer maintains a running token total and enforces soft
//! in-memory caps; these bound process memory only and are deliberately
//! smaller than the compactor's context budget; they are not a substitute
//! for proper compaction.

use crate::session::{ConversationMessage, ToolCallRecord};
use crate::tokens::TokenEstimator;
use tracing::debug;

/// Soft caps for the in-memory buffer.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Message-count cap that triggers the cleanup pass.
    pub max_messages: usize,
    /// Token-total cap that triggers the cleanup pass.
    pub max_tokens: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages: 500,
            max_tokens: 150_000,
        }
    }
}

/// Live message sequence with running token accounting.
#[derive(Debug)]
pub struct ConversationBuffer {
    messages: Vec<ConversationMessage>,
    total_tokens: usize,
    estimator: TokenEstimator,
    config: BufferConfig,
}

impl ConversationBuffer {
    pub fn new(config: BufferConfig, estimator: TokenEstimator) -> Self {
        Self {
            messages: Vec::new(),
            total_tokens: 0,
            estimator,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Append to the tail, caching the token estimate on the message, then
    /// run the soft cleanup pass if either cap is exceeded.
    ///
    /// The message just appended is exempt from its own append's trim, even
    /// when it alone exceeds the token cap (a single oversized tool result
    /// is valid input); the caps catch up on later appends.
    pub fn append(&mut self, mut message: ConversationMessage) -> &ConversationMessage {
        let tokens = message
            .tokens
            .unwrap_or_else(|| self.estimator.estimate_message(&message));
        message.tokens = Some(tokens);
        self.total_tokens += tokens;
        self.messages.push(message);

        if self.messages.len() > self.config.max_messages {
            let excess = self.messages.len() - self.config.max_messages;
            self.trim_range(excess, 1);
        }
        while self.total_tokens > self.config.max_tokens {
            if self.trim_range(1, 1) == 0 {
                break;
            }
        }

        self.messages.last().expect("the newest message is never trimmed")
    }

    /// Drop up to `excess` of the oldest non-system messages. System
    /// messages are never dropped by trimming. Returns how many were
    /// removed.
    pub fn trim_oldest(&mut self, excess: usize) -> usize {
        self.trim_range(excess, 0)
    }

    /// Trim pass over everything but the `protected_tail` newest messages.
    fn trim_range(&mut self, excess: usize, protected_tail: usize) -> usize {
        let mut removed = 0;
        while removed < excess {
            let limit = self.messages.len().saturating_sub(protected_tail);
            let Some(at) = self.messages[..limit]
                .iter()
                .position(|m| m.role != crate::session::Role::System)
            else {
                break;
            };
            let dropped = self.messages.remove(at);
            self.total_tokens = self
                .total_tokens
                .saturating_sub(dropped.tokens.unwrap_or(0));
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, remaining = self.messages.len(), "trimmed buffer");
        }
        removed
    }

    /// Greedily include messages newest-to-oldest while the running total
    /// stays within `token_budget`; returned in chronological order. This
    /// builds the exact payload for the next model call without re-deriving
    /// compaction state.
    pub fn messages_within_budget(&self, token_budget: usize) -> Vec<ConversationMessage> {
        let mut selected = Vec::new();
        let mut used = 0usize;
        for message in self.messages.iter().rev() {
            let tokens = message
                .tokens
                .unwrap_or_else(|| self.estimator.estimate_message(message));
            if used + tokens > token_budget {
                break;
            }
            used += tokens;
            selected.push(message.clone());
        }
        selected.reverse();
        selected
    }

    /// Bulk replace, recomputing the token total. Used on resume, fork, and
    /// after compaction.
    pub fn restore_from(&mut self, messages: Vec<ConversationMessage>) {
        self.messages = messages;
        self.total_tokens = 0;
        for message in &mut self.messages {
            let tokens = message
                .tokens
                .unwrap_or_else(|| self.estimator.estimate_message(message));
            message.tokens = Some(tokens);
            self.total_tokens += tokens;
        }
    }

    /// Snapshot the current contents. Always a copy; callers must never
    /// observe a live structure that a concurrent append could mutate.
    pub fn export_state(&self) -> Vec<ConversationMessage> {
        self.messages.clone()
    }

    /// Fold a completed tool call into the message that issued the matching
    /// tool_use, re-estimating its token count. Returns the owning message
    /// id, or `None` when no message carries that tool_use.
    pub fn fold_tool_result(
        &mut self,
        tool_use_id: &str,
        record: ToolCallRecord,
    ) -> Option<String> {
        let at = self
            .messages
            .iter()
            .position(|m| m.tool_use_ids().contains(&tool_use_id))?;
        let message = &mut self.messages[at];
        let old_tokens = message.tokens.unwrap_or(0);
        message.tool_calls.push(record);
        let new_tokens = self.estimator.estimate_message(message);
        message.tokens = Some(new_tokens);
        self.total_tokens = self.total_tokens - old_tokens + new_tokens;
        Some(message.id.clone())
    }
}
