//! Session Data Model
//!
//! Shared types for the session core:
//!
//! - **Session metadata**: one conversation bound to one project directory,
//!   with status, tags, fork parentage, and token accounting
//! - **Conversation messages**: plain text or an ordered sequence of typed
//!   content blocks, exhaustively matched wherever content is inspected
//! - **Stored form**: a JSONL header record followed by one message per line
//!
//! The persisted layout is append-friendly: line 1 is a [`SessionHeader`],
//! every following line is a [`ConversationMessage`] in append order.

mod types;

pub use types::{
    CompactionResult, ContentBlock, ConversationMessage, MessageContent, MessageDraft, Role,
    Session, SessionHeader, SessionStatus, ToolCallRecord, STORED_FORMAT_VERSION,
};
