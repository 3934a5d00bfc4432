//! The compaction engine: threshold decisions, retention partitioning, and
//! tool-call pairing safety.

use super::config::CompactionConfig;
use super::summary::{HeuristicSummarizer, Summarizer};
use crate::session::{CompactionResult, ConversationMessage};
use crate::tokens::TokenEstimator;
use anyhow::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Decides when compaction is needed and produces a reduced message set plus
/// a textual summary of what was removed.
///
/// Two strategies share one invariant: a tool_use message and its paired
/// tool_result are never separated (both survive or both are summarized)
/// and a message with a still-pending tool call is never summarized away.
pub struct ContextWindowCompactor {
    config: CompactionConfig,
    estimator: TokenEstimator,
    summarizer: Box<dyn Summarizer>,
}

impl ContextWindowCompactor {
    /// Create a compactor with the deterministic heuristic summarizer.
    pub fn new(config: CompactionConfig, estimator: TokenEstimator) -> Self {
        let summarizer = Box::new(HeuristicSummarizer::new(config.preview_len));
        Self {
            config,
            estimator,
            summarizer,
        }
    }

    /// Swap in a different summarizer (e.g. a model-backed one).
    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.set_summarizer(summarizer);
        self
    }

    /// In-place form of [`with_summarizer`](Self::with_summarizer), for
    /// owners that cannot move the compactor.
    pub fn set_summarizer(&mut self, summarizer: Box<dyn Summarizer>) {
        self.summarizer = summarizer;
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    fn message_tokens(&self, message: &ConversationMessage) -> usize {
        message
            .tokens
            .unwrap_or_else(|| self.estimator.estimate_message(message))
    }

    /// Sum of per-message token counts, estimating where not precomputed.
    pub fn current_usage(&self, messages: &[ConversationMessage]) -> usize {
        messages.iter().map(|m| self.message_tokens(m)).sum()
    }

    /// True when usage has crossed the configured threshold.
    pub fn should_compact(&self, messages: &[ConversationMessage]) -> bool {
        self.current_usage(messages) >= self.config.threshold_tokens()
    }

    /// Compact by preserving a recent tail and summarizing the head.
    ///
    /// The tail is the larger of `min_messages_to_preserve` or 25% of the
    /// total count, always the most recent messages. Pairing fix-ups then
    /// pull into the preserved set any head message whose tool_use is
    /// answered in the tail or still pending.
    pub async fn compact(&self, messages: &[ConversationMessage]) -> Result<CompactionResult> {
        if messages.len() <= self.config.min_messages_to_preserve {
            return Ok(CompactionResult::noop(messages));
        }

        let tail = self
            .config
            .min_messages_to_preserve
            .max(messages.len().div_ceil(4));
        let boundary = messages.len() - tail;
        let preserved: BTreeSet<usize> = (boundary..messages.len()).collect();

        self.finish(messages, preserved).await
    }

    /// Compact preserving important messages verbatim, summarizing only the
    /// remainder. The most recent `min_messages_to_preserve` messages are
    /// force-preserved regardless of importance.
    pub async fn compact_smart(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<CompactionResult> {
        if messages.is_empty() {
            return Ok(CompactionResult::noop(messages));
        }

        let mut preserved = self.important_indices(messages);
        let boundary = messages
            .len()
            .saturating_sub(self.config.min_messages_to_preserve);
        preserved.extend(boundary..messages.len());

        self.finish(messages, preserved).await
    }

    async fn finish(
        &self,
        messages: &[ConversationMessage],
        mut preserved: BTreeSet<usize>,
    ) -> Result<CompactionResult> {
        self.pairing_closure(messages, &mut preserved);

        let summarized: Vec<ConversationMessage> = messages
            .iter()
            .enumerate()
            .filter(|(i, _)| !preserved.contains(i))
            .map(|(_, m)| m.clone())
            .collect();
        if summarized.is_empty() {
            return Ok(CompactionResult::noop(messages));
        }

        let tokens_removed: usize = summarized.iter().map(|m| self.message_tokens(m)).sum();
        let summary = self.summarizer.summarize(&summarized).await?;
        let summary_tokens = self.estimator.estimate(&summary);

        debug!(
            summarized = summarized.len(),
            preserved = preserved.len(),
            tokens_removed,
            summary_tokens,
            "compacted conversation"
        );

        Ok(CompactionResult {
            summary,
            preserved: preserved.iter().map(|&i| messages[i].clone()).collect(),
            tokens_removed,
            tokens_saved: tokens_removed.saturating_sub(summary_tokens),
        })
    }

    /// Ids of messages the smart strategy preserves verbatim: the first
    /// message, anything carrying a tool_use (with its paired tool_result),
    /// and keyword hits.
    pub fn identify_important_messages(
        &self,
        messages: &[ConversationMessage],
    ) -> HashSet<String> {
        self.important_indices(messages)
            .into_iter()
            .map(|i| messages[i].id.clone())
            .collect()
    }

    fn important_indices(&self, messages: &[ConversationMessage]) -> BTreeSet<usize> {
        let result_index = index_tool_results(messages);
        let mut important = BTreeSet::new();

        for (index, message) in messages.iter().enumerate() {
            let mut hit = index == 0;

            if !hit && (message.has_tool_use() || message.has_tool_result()) {
                hit = true;
            }

            if !hit {
                let text = message.text().to_lowercase();
                hit = self
                    .config
                    .important_keywords
                    .iter()
                    .any(|k| text.contains(k.as_str()));
            }

            if hit {
                important.insert(index);
                // Keep the paired result with its tool use.
                for use_id in message.tool_use_ids() {
                    if let Some(&result_at) = result_index.get(use_id) {
                        important.insert(result_at);
                    }
                }
            }
        }

        important
    }

    /// Expand a preserved set until no tool_use/tool_result pair straddles
    /// the preserve/summarize boundary, and no pending tool call is
    /// summarized away.
    fn pairing_closure(&self, messages: &[ConversationMessage], preserved: &mut BTreeSet<usize>) {
        let use_index = index_tool_uses(messages);
        let result_index = index_tool_results(messages);

        // A tool_use with no answer anywhere is pending; its message must
        // survive.
        for (use_id, &at) in &use_index {
            if !result_index.contains_key(use_id) {
                preserved.insert(at);
            }
        }

        // Fixpoint: pulling one side of a pair in can expose new pairs on
        // messages that carry several blocks.
        loop {
            let mut changed = false;
            for index in preserved.clone() {
                let message = &messages[index];
                for use_id in message.tool_use_ids() {
                    if let Some(&result_at) = result_index.get(use_id) {
                        changed |= preserved.insert(result_at);
                    }
                }
                for result_id in message.tool_result_ids() {
                    if let Some(&use_at) = use_index.get(result_id) {
                        changed |= preserved.insert(use_at);
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }
}

fn index_tool_uses(messages: &[ConversationMessage]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (at, message) in messages.iter().enumerate() {
        for id in message.tool_use_ids() {
            index.insert(id.to_string(), at);
        }
    }
    index
}

fn index_tool_results(messages: &[ConversationMessage]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (at, message) in messages.iter().enumerate() {
        for id in message.tool_result_ids() {
            index.insert(id.to_string(), at);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ContentBlock, MessageContent, Role};
    use serde_json::json;

    fn compactor(min_preserve: usize) -> ContextWindowCompactor {
        ContextWindowCompactor::new(
            CompactionConfig {
                min_messages_to_preserve: min_preserve,
                ..Default::default()
            },
            TokenEstimator::default(),
        )
    }

    fn filler(n: usize) -> Vec<ConversationMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationMessage::user(format!("question number {i} with some padding text"))
                } else {
                    ConversationMessage::assistant(format!("answer number {i} with some padding"))
                }
            })
            .collect()
    }

    fn tool_use(id: &str, name: &str) -> ConversationMessage {
        ConversationMessage::new(
            Role::Assistant,
            MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input: json!({"arg": 1}),
            }]),
        )
    }

    fn tool_result(use_id: &str) -> ConversationMessage {
        ConversationMessage::new(
            Role::User,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: use_id.into(),
                content: json!("output"),
                is_error: false,
            }]),
        )
    }

    fn assert_suborder(original: &[ConversationMessage], preserved: &[ConversationMessage]) {
        let positions: Vec<usize> = preserved
            .iter()
            .map(|p| original.iter().position(|m| m.id == p.id).unwrap())
            .collect();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "preserved messages out of order: {positions:?}"
        );
    }

    #[tokio::test]
    async fn test_small_conversation_is_noop() {
        let compactor = compactor(10);
        let messages = filler(6);
        let result = compactor.compact(&messages).await.unwrap();
        assert!(result.is_noop());
        assert_eq!(result.preserved.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_noop() {
        let compactor = compactor(2);
        let result = compactor.compact(&[]).await.unwrap();
        assert!(result.is_noop());
        assert!(result.preserved.is_empty());
    }

    #[tokio::test]
    async fn test_compact_preserves_recent_tail_in_order() {
        let compactor = compactor(2);
        let messages = filler(20);
        let result = compactor.compact(&messages).await.unwrap();

        // Tail is max(2, 20/4) = 5 recent messages.
        assert_eq!(result.preserved.len(), 5);
        let last = &messages[19];
        assert!(result.preserved.iter().any(|m| m.id == last.id));
        assert_suborder(&messages, &result.preserved);
        assert!(!result.summary.is_empty());
        assert!(result.tokens_removed > 0);
        assert!(result.tokens_saved <= result.tokens_removed);
    }

    #[tokio::test]
    async fn test_should_compact_threshold() {
        let compactor = ContextWindowCompactor::new(
            CompactionConfig {
                max_tokens: 1_000,
                threshold_ratio: 0.5,
                min_messages_to_preserve: 2,
                ..Default::default()
            },
            TokenEstimator::default(),
        );

        let mut messages = Vec::new();
        assert!(!compactor.should_compact(&messages));
        while compactor.current_usage(&messages) < 500 {
            messages.push(ConversationMessage::user("some filler text ".repeat(4)));
        }
        assert!(compactor.should_compact(&messages));

        let result = compactor.compact(&messages).await.unwrap();
        assert!(result.preserved.len() >= 2);
        // The two most recent messages always survive.
        let recent: Vec<&str> = messages[messages.len() - 2..]
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        for id in recent {
            assert!(result.preserved.iter().any(|m| m.id == id));
        }
    }

    #[tokio::test]
    async fn test_pair_straddling_boundary_is_pulled_into_preserved() {
        let compactor = compactor(2);
        // tool_use early (index 2, deep in the head), its result as the
        // final message (inside the preserved tail of 5).
        let mut messages = filler(2);
        messages.push(tool_use("tu1", "bash"));
        messages.extend(filler(16));
        messages.push(tool_result("tu1"));

        let result = compactor.compact(&messages).await.unwrap();
        let preserved_ids: Vec<&str> = result.preserved.iter().map(|m| m.id.as_str()).collect();
        let use_id = &messages[2].id;
        let result_id = &messages[19].id;
        assert!(preserved_ids.contains(&use_id.as_str()));
        assert!(preserved_ids.contains(&result_id.as_str()));
        assert_suborder(&messages, &result.preserved);
    }

    #[tokio::test]
    async fn test_pair_deep_in_head_is_summarized_together() {
        let compactor = compactor(2);
        // use+result first, then enough filler that both land in the head.
        let mut messages = vec![tool_use("tu1", "bash"), tool_result("tu1")];
        messages.extend(filler(20));

        let result = compactor.compact(&messages).await.unwrap();
        let preserved_ids: Vec<&str> = result.preserved.iter().map(|m| m.id.as_str()).collect();
        assert!(!preserved_ids.contains(&messages[0].id.as_str()));
        assert!(!preserved_ids.contains(&messages[1].id.as_str()));
    }

    #[tokio::test]
    async fn test_pending_tool_use_is_never_summarized() {
        let compactor = compactor(2);
        let mut messages = vec![tool_use("dangling", "bash")];
        messages.extend(filler(20));

        let result = compactor.compact(&messages).await.unwrap();
        assert!(
            result.preserved.iter().any(|m| m.id == messages[0].id),
            "pending tool call must survive compaction"
        );
    }

    #[tokio::test]
    async fn test_smart_compaction_keeps_keyword_messages() {
        let compactor = compactor(2);
        let mut messages = filler(8);
        messages.insert(
            4,
            ConversationMessage::user("critical: the build breaks on musl targets"),
        );
        messages.extend(filler(8));

        let result = compactor.compact_smart(&messages).await.unwrap();
        let keyword_msg = messages.iter().find(|m| m.text().contains("critical")).unwrap();
        assert!(result.preserved.iter().any(|m| m.id == keyword_msg.id));
        assert_suborder(&messages, &result.preserved);
    }

    #[tokio::test]
    async fn test_smart_compaction_all_important_is_noop() {
        let compactor = compactor(2);
        // Every message hits a keyword, so nothing can be summarized.
        let messages: Vec<ConversationMessage> = (0..6)
            .map(|i| ConversationMessage::user(format!("important detail {i}")))
            .collect();

        let result = compactor.compact_smart(&messages).await.unwrap();
        assert!(result.summary.is_empty());
        assert_eq!(result.preserved.len(), messages.len());
        assert_eq!(result.tokens_removed, 0);
    }

    #[test]
    fn test_identify_important_messages() {
        let compactor = compactor(2);
        let messages = vec![
            ConversationMessage::user("set up the project"), // first: important
            ConversationMessage::assistant("plain reply"),
            tool_use("tu1", "bash"),
            tool_result("tu1"),
            ConversationMessage::user("there is a bug in the parser"),
            ConversationMessage::assistant("nothing notable"),
        ];

        let important = compactor.identify_important_messages(&messages);
        assert!(important.contains(&messages[0].id));
        assert!(!important.contains(&messages[1].id));
        assert!(important.contains(&messages[2].id));
        assert!(important.contains(&messages[3].id));
        assert!(important.contains(&messages[4].id));
        assert!(!important.contains(&messages[5].id));
    }

    #[test]
    fn test_current_usage_prefers_precomputed_tokens() {
        let compactor = compactor(2);
        let mut msg = ConversationMessage::user("irrelevant");
        msg.tokens = Some(1_000);
        assert_eq!(compactor.current_usage(&[msg]), 1_000);
    }
}
