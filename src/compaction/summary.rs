//! Summary generation for compacted messages.

use crate::session::{ConversationMessage, Role};
use anyhow::Result;
use async_trait::async_trait;

/// Produces the textual summary that replaces compacted messages.
///
/// The default implementation is a deterministic text-extraction heuristic;
/// a model-backed summarizer can be swapped in behind the same interface,
/// which is why the method is async even though the heuristic never
/// suspends.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[ConversationMessage]) -> Result<String>;
}

/// Deterministic summarizer: groups messages into user/assistant exchanges,
/// quotes a bounded preview of each side, and records which tools were used.
#[derive(Debug, Clone)]
pub struct HeuristicSummarizer {
    preview_len: usize,
}

impl HeuristicSummarizer {
    pub fn new(preview_len: usize) -> Self {
        Self { preview_len }
    }
}

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize(&self, messages: &[ConversationMessage]) -> Result<String> {
        Ok(build_summary_text(messages, self.preview_len))
    }
}

/// One user turn and the assistant turns that follow it.
#[derive(Debug, Default)]
struct Exchange {
    user_text: String,
    assistant_text: String,
    notes: Vec<String>,
    tools_used: Vec<String>,
}

impl Exchange {
    fn is_empty(&self) -> bool {
        self.user_text.is_empty()
            && self.assistant_text.is_empty()
            && self.notes.is_empty()
            && self.tools_used.is_empty()
    }
}

/// Build the exchange-grouped summary text.
pub(crate) fn build_summary_text(messages: &[ConversationMessage], preview_len: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let mut exchanges: Vec<Exchange> = Vec::new();
    let mut current = Exchange::default();

    for message in messages {
        match message.role {
            Role::User => {
                let text = message.text();
                // A user message carrying only tool results transports
                // output for the current exchange; it does not open a new
                // one.
                if message.has_tool_result() && text.trim().is_empty() {
                    continue;
                }
                if !current.is_empty() {
                    exchanges.push(std::mem::take(&mut current));
                }
                current.user_text = text;
            }
            Role::Assistant => {
                let text = message.text();
                if !text.trim().is_empty() {
                    if !current.assistant_text.is_empty() {
                        current.assistant_text.push(' ');
                    }
                    current.assistant_text.push_str(text.trim());
                }
                for name in message.tool_names() {
                    if !current.tools_used.iter().any(|t| t == name) {
                        current.tools_used.push(name.to_string());
                    }
                }
                for call in &message.tool_calls {
                    if !current.tools_used.iter().any(|t| t == &call.name) {
                        current.tools_used.push(call.name.clone());
                    }
                }
            }
            Role::System => {
                let text = message.text();
                if !text.trim().is_empty() {
                    current.notes.push(text);
                }
            }
        }
    }
    if !current.is_empty() {
        exchanges.push(current);
    }

    let mut text = String::new();
    text.push_str("## Conversation summary\n\n");
    text.push_str(&format!(
        "{} earlier message(s) were condensed into this summary.\n\n",
        messages.len()
    ));

    for (index, exchange) in exchanges.iter().enumerate() {
        text.push_str(&format!("### Exchange {}\n", index + 1));
        if !exchange.user_text.is_empty() {
            text.push_str(&format!(
                "**User:** {}\n",
                truncate_preview(&exchange.user_text, preview_len)
            ));
        }
        if !exchange.assistant_text.is_empty() {
            text.push_str(&format!(
                "**Assistant:** {}\n",
                truncate_preview(&exchange.assistant_text, preview_len)
            ));
        }
        for note in &exchange.notes {
            text.push_str(&format!(
                "**Note:** {}\n",
                truncate_preview(note, preview_len)
            ));
        }
        if !exchange.tools_used.is_empty() {
            text.push_str(&format!("Tools used: {}\n", exchange.tools_used.join(", ")));
        }
        text.push('\n');
    }

    text
}

/// Newline-collapsed, char-boundary-safe truncation with an ellipsis.
pub(crate) fn truncate_preview(text: &str, max_len: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(max_len).collect();
    format!("{}...", truncated.trim_end())
}
