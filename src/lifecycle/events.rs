//! Lifecycle event stream.
//!
//! Events flow over a `tokio::sync::broadcast` channel: a lagging or
//! dropped receiver can never abort or panic the operation that emitted
//! the event, which is exactly the isolation listeners need. UI code
//! subscribes for spinners and "session saved" indicators.

/// Typed notification emitted by lifecycle operations.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created {
        session_id: String,
    },
    Resumed {
        session_id: String,
        message_count: usize,
    },
    Forked {
        source_id: String,
        session_id: String,
    },
    Saved {
        session_id: String,
        message_count: usize,
    },
    Completed {
        session_id: String,
    },
    Archived {
        session_id: String,
    },
    MessageAdded {
        session_id: String,
        message_id: String,
    },
    MessageUpdated {
        session_id: String,
        message_id: String,
    },
    SaveError {
        session_id: String,
        error: String,
    },
    LoadError {
        session_id: String,
        error: String,
    },
}

impl SessionEvent {
    /// The session this event concerns.
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { session_id }
            | SessionEvent::Resumed { session_id, .. }
            | SessionEvent::Forked { session_id, .. }
            | SessionEvent::Saved { session_id, .. }
            | SessionEvent::Completed { session_id }
            | SessionEvent::Archived { session_id }
            | SessionEvent::MessageAdded { session_id, .. }
            | SessionEvent::MessageUpdated { session_id, .. }
            | SessionEvent::SaveError { session_id, .. }
            | SessionEvent::LoadError { session_id, .. } => session_id,
        }
    }
}
