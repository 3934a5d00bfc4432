//! Core data model types and their invariant-preserving helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Version of the on-disk session record format.
pub const STORED_FORMAT_VERSION: u32 = 1;

/// Lifecycle status of a session.
///
/// `Completed` and `Archived` are terminal; forking never changes the
/// parent's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Archived,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Archived)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Metadata for one conversation bound to one project directory.
///
/// `message_count` and `total_tokens` reflect the message sequence as of the
/// last successful save; the store recomputes both on load so an
/// append-heavy session can never drift permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Absolute path of the project directory this session belongs to.
    pub project_path: PathBuf,
    /// Display name derived from the last path component.
    pub project_name: String,
    /// Detected git branch at creation time, if the project is a repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Set when this session was created by forking another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub message_count: usize,
    pub total_tokens: usize,
    /// Model identifier this session talks to.
    pub model: String,
}

impl Session {
    /// Create a fresh active session for a project directory.
    pub fn new(project_path: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        let project_path = project_path.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            project_name: derive_project_name(&project_path),
            project_path,
            git_branch: None,
            status: SessionStatus::Active,
            title: None,
            tags: BTreeSet::new(),
            parent_session_id: None,
            message_count: 0,
            total_tokens: 0,
            model: model.into(),
        }
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Derive a display name from the last component of a project path.
pub fn derive_project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One typed block inside a structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        #[serde(default)]
        source: Value,
    },
    Document {
        #[serde(default)]
        source: Value,
    },
}

/// Message body: plain text or an ordered sequence of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten the visible text of this body (text and thinking blocks;
    /// tool blocks and media contribute nothing).
    pub fn flattened_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => {
                let mut out = String::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            if !out.is_empty() {
                                out.push('\n');
                            }
                            out.push_str(text);
                        }
                        ContentBlock::Thinking { thinking } => {
                            if !out.is_empty() {
                                out.push('\n');
                            }
                            out.push_str(thinking);
                        }
                        ContentBlock::ToolUse { .. }
                        | ContentBlock::ToolResult { .. }
                        | ContentBlock::Image { .. }
                        | ContentBlock::Document { .. } => {}
                    }
                }
                out
            }
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    /// Precomputed token estimate; filled in lazily by the buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    /// Responding model, assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extended-reasoning text, when the provider surfaces it separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// True once loaded from storage; never serialized.
    #[serde(skip)]
    pub from_history: bool,
}

impl ConversationMessage {
    /// Build a message with a fresh id and timestamp.
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            tokens: None,
            model: None,
            thinking: None,
            tool_calls: Vec::new(),
            from_history: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    /// Visible text of the message (content plus the separate thinking
    /// field, when set).
    pub fn text(&self) -> String {
        let mut text = self.content.flattened_text();
        if let Some(thinking) = &self.thinking {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(thinking);
        }
        text
    }

    /// Ids of tool_use blocks carried by this message.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// `tool_use_id`s answered by tool_result blocks in this message.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Names of tools invoked by this message's tool_use blocks.
    pub fn tool_names(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn has_tool_use(&self) -> bool {
        !self.tool_use_ids().is_empty()
    }

    pub fn has_tool_result(&self) -> bool {
        !self.tool_result_ids().is_empty()
    }
}

/// Caller-supplied fields for a new message; the lifecycle manager assigns
/// the id and timestamp.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub role: Role,
    pub content: MessageContent,
    pub model: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl MessageDraft {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            model: None,
            thinking: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub(crate) fn into_message(self) -> ConversationMessage {
        let mut msg = ConversationMessage::new(self.role, self.content);
        msg.model = self.model;
        msg.thinking = self.thinking;
        msg.tool_calls = self.tool_calls;
        msg
    }
}

/// One tool invocation tracked independently of the message history while
/// its result is outstanding. Once completed, the record is folded into the
/// owning assistant message and dropped from the pending set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolCallRecord {
    pub fn started(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            result: None,
            success: None,
            duration_ms: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }
}

/// First line of a persisted session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub version: u32,
    pub metadata: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl SessionHeader {
    pub fn new(metadata: Session) -> Self {
        Self {
            version: STORED_FORMAT_VERSION,
            metadata,
            context: None,
            settings: None,
        }
    }
}

/// Output of one compaction pass.
///
/// `preserved` is an order-preserving subsequence of the input; the
/// summarized messages are exactly the input minus `preserved`.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Textual summary of the removed messages; empty when nothing was
    /// summarized.
    pub summary: String,
    pub preserved: Vec<ConversationMessage>,
    /// Token sum of the summarized messages.
    pub tokens_removed: usize,
    /// `tokens_removed` minus the summary's own token cost.
    pub tokens_saved: usize,
}

impl CompactionResult {
    /// A pass that removed nothing.
    pub fn noop(messages: &[ConversationMessage]) -> Self {
        Self {
            summary: String::new(),
            preserved: messages.to_vec(),
            tokens_removed: 0,
            tokens_saved: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.tokens_removed == 0 && self.summary.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new("/repo/widget", "claude-sonnet");
        assert_eq!(session.project_name, "widget");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.message_count, 0);
        assert_eq!(session.total_tokens, 0);
        assert!(session.parent_session_id.is_none());
        assert!(session.updated_at >= session.created_at);
        assert_eq!(session.id.len(), 36);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Archived.is_terminal());
    }

    #[test]
    fn test_message_round_trips_through_json() {
        let msg = ConversationMessage::new(
            Role::Assistant,
            MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "Running the build".into(),
                },
                ContentBlock::ToolUse {
                    id: "tu1".into(),
                    name: "bash".into(),
                    input: json!({"command": "cargo build"}),
                },
            ]),
        );

        let line = serde_json::to_string(&msg).unwrap();
        let back: ConversationMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.tool_use_ids(), vec!["tu1"]);
        assert_eq!(back.tool_names(), vec!["bash"]);
        assert!(!back.from_history);
    }

    #[test]
    fn test_plain_text_content_serializes_as_string() {
        let msg = ConversationMessage::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["content"], json!("hello"));
    }

    #[test]
    fn test_tool_result_pairing_helpers() {
        let result = ConversationMessage::new(
            Role::User,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "tu1".into(),
                content: json!("ok"),
                is_error: false,
            }]),
        );
        assert_eq!(result.tool_result_ids(), vec!["tu1"]);
        assert!(!result.has_tool_use());
        assert!(result.has_tool_result());
    }

    #[test]
    fn test_flattened_text_skips_tool_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Thinking {
                thinking: "considering".into(),
            },
            ContentBlock::ToolUse {
                id: "t".into(),
                name: "read".into(),
                input: json!({}),
            },
            ContentBlock::Text {
                text: "done".into(),
            },
        ]);
        assert_eq!(content.flattened_text(), "considering\ndone");
    }

    #[test]
    fn test_header_round_trip() {
        let header = SessionHeader::new(Session::new("/repo", "claude-sonnet"));
        let line = serde_json::to_string(&header).unwrap();
        let back: SessionHeader = serde_json::from_str(&line).unwrap();
        assert_eq!(back.version, STORED_FORMAT_VERSION);
        assert_eq!(back.metadata.project_name, "repo");
    }

    #[test]
    fn test_draft_into_message_assigns_identity() {
        let draft = MessageDraft::assistant("reply").with_model("claude-sonnet");
        let msg = draft.into_message();
        assert!(!msg.id.is_empty());
        assert_eq!(msg.model.as_deref(), Some("claude-sonnet"));
        assert_eq!(msg.text(), "reply");
    }

    #[test]
    fn test_tool_call_record_resolution() {
        let mut record = ToolCallRecord::started("tc1", "bash", json!({"command": "ls"}));
        assert!(!record.is_resolved());
        record.result = Some(json!("file.txt"));
        record.success = Some(true);
        assert!(record.is_resolved());
    }
}
