//! Session Lifecycle
//!
//! Orchestrates session creation, resumption, forking, completion and
//! archival, tag/title mutation, periodic auto-save, and event
//! notification. Composes the conversation buffer, the store, and the
//! compactor.
//!
//! ## State machine
//!
//! ```text
//! created ──► active ◄──► paused
//!                │
//!                ├──► completed   (terminal, complete_session)
//!                └──► archived    (terminal, archive_session)
//! ```
//!
//! Forking never transitions the source session; it creates a new session
//! whose `parent_session_id` references it.
//!
//! The manager is an explicit, constructed service object; the
//! application's composition root builds one and passes it down; there is
//! no global instance.

mod events;
mod git;
mod manager;

pub use events::SessionEvent;
pub use git::current_branch;
pub use manager::{
    CreateOptions, ForkOptions, SessionLifecycleManager, SessionManagerConfig,
};
