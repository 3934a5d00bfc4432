//! Conversation Store
//!
//! Durable, crash-tolerant persistence of sessions, keyed by project path.
//!
//! ## Layout
//!
//! One JSONL file per session under a directory derived from the project
//! path:
//!
//! ```text
//! <root>/<project_key>/<session_id>.jsonl
//! <root>/<project_key>/summaries/<session_id>.txt
//! ```
//!
//! Line 1 of each log is the [`SessionHeader`](crate::session::SessionHeader);
//! every following line is one message in append order. Full saves go through
//! a temp-file-then-rename so a crash mid-write never leaves a file that
//! parses as silently truncated. The common-case write for an active session
//! is [`ConversationStore::append`], which is O(1) in message count.
//!
//! A malformed message line is skipped and reported, never fatal; an
//! unparsable header is fatal for that one session only. Listing across
//! projects reads headers exclusively and skips unreadable files.

mod list;
mod paths;
mod store;

pub use list::{SessionFilter, SessionPage, SessionSort, SortField};
pub use paths::project_key;
pub use store::{ConversationStore, LoadedSession};
