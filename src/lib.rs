//! Scrollback: the session persistence and context compaction core of an
//! interactive AI coding-assistant CLI.
//!
//! The crate owns the lifecycle of a session (a conversation tied to one
//! project directory), persists it as an append-friendly JSONL log, tracks
//! token usage against a model context budget, and compacts older turns into
//! a summary before the budget is exceeded.
//!
//! Components, leaf-first:
//! - [`tokens::TokenEstimator`]: approximate token counting
//! - [`store::ConversationStore`]: durable on-disk session logs
//! - [`compaction::ContextWindowCompactor`]: threshold decisions and summaries
//! - [`buffer::ConversationBuffer`]: the live in-memory message sequence
//! - [`lifecycle::SessionLifecycleManager`]: orchestration of all of the above
//!
//! There are no globals: the embedding application constructs a
//! `SessionLifecycleManager` at its composition root and passes it down.

pub mod buffer;
pub mod compaction;
pub mod errors;
pub mod lifecycle;
pub mod session;
pub mod store;
pub mod tokens;

pub use errors::{SessionError, StoreError};
pub use lifecycle::{SessionEvent, SessionLifecycleManager, SessionManagerConfig};
pub use session::{
    CompactionResult, ContentBlock, ConversationMessage, MessageContent, Role, Session,
    SessionStatus, ToolCallRecord,
};
