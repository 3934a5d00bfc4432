//! The session lifecycle manager.

use super::events::SessionEvent;
use super::git;
use crate::buffer::{BufferConfig, ConversationBuffer};
use crate::compaction::{CompactionConfig, ContextWindowCompactor, Summarizer};
use crate::errors::{SessionError, StoreError};
use crate::session::{
    CompactionResult, ConversationMessage, MessageDraft, Role, Session, SessionStatus,
    ToolCallRecord,
};
use crate::store::ConversationStore;
use crate::tokens::{EstimatorConfig, TokenEstimator};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest auto-generated title, in characters.
const TITLE_MAX_LEN: usize = 48;

/// Title used when no user message exists yet.
const TITLE_PLACEHOLDER: &str = "New session";

/// Configuration for the lifecycle manager and the components it builds.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Interval between auto-save flushes.
    pub autosave_interval: Duration,
    /// Model recorded on sessions created without an explicit one.
    pub default_model: String,
    pub buffer: BufferConfig,
    pub compaction: CompactionConfig,
    pub estimator: EstimatorConfig,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(3),
            default_model: "claude-sonnet-4-5".to_string(),
            buffer: BufferConfig::default(),
            compaction: CompactionConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

/// Options for [`SessionLifecycleManager::create_session`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub model: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
}

/// Options for [`SessionLifecycleManager::fork_session`].
#[derive(Debug, Clone, Default)]
pub struct ForkOptions {
    /// Copy only the first `up_to` messages; default is all of them.
    pub up_to: Option<usize>,
    pub title: Option<String>,
}

/// The session currently owned by the manager, with its live buffer and
/// bookkeeping for the auto-save flush.
struct ActiveSession {
    session: Session,
    buffer: ConversationBuffer,
    /// Unresolved tool invocations, keyed by tool_use id.
    pending_tool_calls: HashMap<String, ToolCallRecord>,
    /// Messages appended since the last flush, in append order.
    unsaved: Vec<ConversationMessage>,
    /// Set when metadata or prior messages changed; upgrades the next
    /// flush to a full snapshot save.
    metadata_dirty: bool,
}

impl ActiveSession {
    fn new(session: Session, buffer: ConversationBuffer) -> Self {
        Self {
            session,
            buffer,
            pending_tool_calls: HashMap::new(),
            unsaved: Vec::new(),
            metadata_dirty: false,
        }
    }
}

/// Owns the current session end to end: creation, resumption, forking,
/// message ingestion, compaction, periodic auto-save, terminal transitions,
/// and the lifecycle event stream.
///
/// All on-disk writes for the current session go through the session lock,
/// so a timer-triggered save can never interleave with a foreground append
/// at the byte level.
pub struct SessionLifecycleManager {
    store: Arc<ConversationStore>,
    compactor: ContextWindowCompactor,
    estimator: TokenEstimator,
    config: SessionManagerConfig,
    current: Arc<Mutex<Option<ActiveSession>>>,
    events: broadcast::Sender<SessionEvent>,
    autosave: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionLifecycleManager {
    pub fn new(store: ConversationStore, config: SessionManagerConfig) -> Self {
        let estimator = TokenEstimator::new(config.estimator.clone());
        let compactor = ContextWindowCompactor::new(config.compaction.clone(), estimator.clone());
        let (events, _) = broadcast::channel(64);
        Self {
            store: Arc::new(store),
            compactor,
            estimator,
            config,
            current: Arc::new(Mutex::new(None)),
            events,
            autosave: std::sync::Mutex::new(None),
        }
    }

    /// Swap the compactor's summarizer (e.g. for a model-backed one).
    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.compactor.set_summarizer(summarizer);
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; a slow receiver lags without blocking us.
        let _ = self.events.send(event);
    }

    fn new_buffer(&self) -> ConversationBuffer {
        ConversationBuffer::new(self.config.buffer.clone(), self.estimator.clone())
    }

    /// Create a new session for a project directory and make it current.
    pub async fn create_session(
        &self,
        project_path: impl Into<PathBuf>,
        opts: CreateOptions,
    ) -> Result<Session, SessionError> {
        let project_path = project_path.into();
        let model = opts
            .model
            .unwrap_or_else(|| self.config.default_model.clone());

        let mut session = Session::new(project_path, model);
        session.title = opts.title;
        session.tags = opts.tags.into_iter().collect();
        session.git_branch = git::current_branch(&session.project_path);

        self.store.save(&session, &[])?;
        info!(session_id = %session.id, project = %session.project_name, "created session");

        self.install_current(ActiveSession::new(session.clone(), self.new_buffer()))
            .await;
        self.emit(SessionEvent::Created {
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Resume a stored session, making it current. Returns `Ok(None)` when
    /// no such session exists; callers decide whether to fall back to
    /// creating a new one.
    pub async fn resume_session(
        &self,
        project_path: &Path,
        session_id: &str,
    ) -> Result<Option<Session>, SessionError> {
        let loaded = match self.store.load(project_path, session_id) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.emit(SessionEvent::LoadError {
                    session_id: session_id.to_string(),
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };
        if loaded.skipped_lines > 0 {
            warn!(
                session_id,
                skipped = loaded.skipped_lines,
                "resumed session with unreadable message lines"
            );
        }

        let mut buffer = self.new_buffer();
        buffer.restore_from(loaded.messages);
        let mut session = loaded.session;
        session.total_tokens = buffer.total_tokens();
        let message_count = buffer.len();

        // Resumption reactivates the session regardless of its stored
        // status; the change reaches disk on the next flush.
        let reactivated = session.status != SessionStatus::Active;
        if reactivated {
            session.status = SessionStatus::Active;
            session.touch();
        }

        let mut active = ActiveSession::new(session.clone(), buffer);
        active.metadata_dirty = reactivated;
        self.install_current(active).await;
        info!(session_id = %session.id, message_count, "resumed session");
        self.emit(SessionEvent::Resumed {
            session_id: session.id.clone(),
            message_count,
        });
        Ok(Some(session))
    }

    /// Fork a stored session: copy its messages (optionally only a prefix)
    /// into a new session that becomes current. The source file is never
    /// mutated.
    pub async fn fork_session(
        &self,
        project_path: &Path,
        source_session_id: &str,
        opts: ForkOptions,
    ) -> Result<Session, SessionError> {
        let source = self
            .store
            .load(project_path, source_session_id)?
            .ok_or_else(|| SessionError::ForkSourceNotFound {
                session_id: source_session_id.to_string(),
            })?;

        let cut = opts
            .up_to
            .unwrap_or(source.messages.len())
            .min(source.messages.len());
        let copied: Vec<ConversationMessage> = source.messages[..cut].to_vec();

        let mut session = Session::new(project_path, source.session.model.clone());
        session.parent_session_id = Some(source.session.id.clone());
        session.title = opts.title;
        session.git_branch = source.session.git_branch.clone();

        let mut buffer = self.new_buffer();
        buffer.restore_from(copied);
        session.message_count = buffer.len();
        session.total_tokens = buffer.total_tokens();

        self.store.save(&session, buffer.messages())?;
        info!(
            session_id = %session.id,
            source = source_session_id,
            copied = session.message_count,
            "forked session"
        );

        self.install_current(ActiveSession::new(session.clone(), buffer))
            .await;
        self.emit(SessionEvent::Forked {
            source_id: source_session_id.to_string(),
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Append a message to the current session. Assigns id and timestamp,
    /// updates the session's counters, and queues the message for the next
    /// auto-save flush.
    pub async fn add_message(
        &self,
        draft: MessageDraft,
    ) -> Result<ConversationMessage, SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;

        let message = draft.into_message();
        let stored = active.buffer.append(message).clone();
        active.session.message_count = active.buffer.len();
        active.session.total_tokens = active.buffer.total_tokens();
        active.session.touch();
        active.unsaved.push(stored.clone());

        let event = SessionEvent::MessageAdded {
            session_id: active.session.id.clone(),
            message_id: stored.id.clone(),
        };
        drop(guard);
        self.emit(event);
        Ok(stored)
    }

    /// Track a tool invocation until its result arrives.
    pub async fn begin_tool_call(&self, record: ToolCallRecord) -> Result<(), SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
        active.pending_tool_calls.insert(record.id.clone(), record);
        Ok(())
    }

    /// Resolve a pending tool call: remove it from the pending set and fold
    /// the outcome into the message that issued the tool_use. Returns the
    /// resolved record, or `None` when the id was never begun.
    pub async fn complete_tool_call(
        &self,
        tool_use_id: &str,
        result: Value,
        success: bool,
        duration_ms: Option<u64>,
    ) -> Result<Option<ToolCallRecord>, SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;

        let Some(mut record) = active.pending_tool_calls.remove(tool_use_id) else {
            return Ok(None);
        };
        record.result = Some(result);
        record.success = Some(success);
        record.duration_ms = duration_ms;

        let folded_into = active
            .buffer
            .fold_tool_result(tool_use_id, record.clone());
        let event = folded_into.map(|message_id| {
            // An already-persisted message changed; the next flush must
            // rewrite the file.
            active.metadata_dirty = true;
            active.session.total_tokens = active.buffer.total_tokens();
            active.session.touch();
            SessionEvent::MessageUpdated {
                session_id: active.session.id.clone(),
                message_id,
            }
        });
        drop(guard);
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(Some(record))
    }

    /// Pending (unresolved) tool calls for the current session.
    pub async fn pending_tool_calls(&self) -> Result<Vec<ToolCallRecord>, SessionError> {
        let guard = self.current.lock().await;
        let active = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
        Ok(active.pending_tool_calls.values().cloned().collect())
    }

    /// True when the current conversation has crossed the compaction
    /// threshold.
    pub async fn should_compact(&self) -> Result<bool, SessionError> {
        let guard = self.current.lock().await;
        let active = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
        Ok(self.compactor.should_compact(active.buffer.messages()))
    }

    /// Compact the current conversation if it has crossed the threshold.
    ///
    /// On compaction the buffer is replaced by the summary (as a system
    /// message) followed by the preserved tail, and the summary is cached
    /// in the session's sidecar. Callers must re-fetch the buffer after
    /// this returns `Some`.
    pub async fn compact_if_needed(&self) -> Result<Option<CompactionResult>, SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;

        if !self.compactor.should_compact(active.buffer.messages()) {
            return Ok(None);
        }
        let result = self
            .compactor
            .compact(active.buffer.messages())
            .await
            .map_err(SessionError::Compaction)?;
        if result.is_noop() {
            return Ok(None);
        }

        let mut replacement = Vec::with_capacity(result.preserved.len() + 1);
        if !result.summary.is_empty() {
            replacement.push(ConversationMessage::system(result.summary.clone()));
        }
        replacement.extend(result.preserved.iter().cloned());
        active.buffer.restore_from(replacement);
        active.session.message_count = active.buffer.len();
        active.session.total_tokens = active.buffer.total_tokens();
        active.session.touch();
        active.unsaved.clear();
        active.metadata_dirty = true;

        if let Err(error) = self.store.save_summary(
            &active.session.project_path,
            &active.session.id,
            &result.summary,
        ) {
            warn!(%error, "failed to cache compaction summary");
        }
        debug!(
            tokens_removed = result.tokens_removed,
            tokens_saved = result.tokens_saved,
            "compacted current session"
        );
        Ok(Some(result))
    }

    /// The payload for the next model call: newest messages that fit the
    /// request budget (the context budget minus the response reserve).
    pub async fn messages_for_request(&self) -> Result<Vec<ConversationMessage>, SessionError> {
        let budget = self.compactor.config().request_budget();
        let guard = self.current.lock().await;
        let active = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
        Ok(active.buffer.messages_within_budget(budget))
    }

    /// Metadata of the current session, if any.
    pub async fn current_session(&self) -> Option<Session> {
        self.current.lock().await.as_ref().map(|a| a.session.clone())
    }

    pub async fn add_tag(&self, tag: impl Into<String>) -> Result<(), SessionError> {
        self.mutate_metadata(|session| {
            session.tags.insert(tag.into());
        })
        .await
    }

    pub async fn remove_tag(&self, tag: &str) -> Result<(), SessionError> {
        self.mutate_metadata(|session| {
            session.tags.remove(tag);
        })
        .await
    }

    /// Toggle a tag; returns whether the tag is present afterwards.
    pub async fn toggle_tag(&self, tag: impl Into<String>) -> Result<bool, SessionError> {
        let tag = tag.into();
        let mut present = false;
        self.mutate_metadata(|session| {
            if !session.tags.remove(&tag) {
                session.tags.insert(tag.clone());
                present = true;
            }
        })
        .await?;
        Ok(present)
    }

    pub async fn set_title(&self, title: impl Into<String>) -> Result<(), SessionError> {
        let title = title.into();
        self.mutate_metadata(|session| {
            session.title = Some(title);
        })
        .await
    }

    /// Derive a short title from the first user message (newline-collapsed,
    /// truncated), falling back to a placeholder when none exists yet.
    pub async fn generate_title(&self) -> Result<String, SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;

        let title = active
            .buffer
            .messages()
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| crate::compaction::truncate_preview(&m.text(), TITLE_MAX_LEN))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string());

        active.session.title = Some(title.clone());
        active.session.touch();
        active.metadata_dirty = true;
        Ok(title)
    }

    async fn mutate_metadata(
        &self,
        mutate: impl FnOnce(&mut Session),
    ) -> Result<(), SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
        mutate(&mut active.session);
        active.session.touch();
        active.metadata_dirty = true;
        Ok(())
    }

    /// Complete the current session: terminal status, final save, stop the
    /// auto-save loop, clear the current-session slot. If the save fails the
    /// session stays current so the caller can retry.
    pub async fn complete_session(&self) -> Result<Session, SessionError> {
        let mut guard = self.current.lock().await;
        let active = guard.as_mut().ok_or(SessionError::NoActiveSession)?;

        active.session.status = SessionStatus::Completed;
        active.session.touch();
        active.metadata_dirty = true;
        self.final_save(active)?;

        let session = active.session.clone();
        *guard = None;
        drop(guard);
        self.stop_autosave();

        info!(session_id = %session.id, "completed session");
        self.emit(SessionEvent::Completed {
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Archive a session. Applies to the current session when the id
    /// matches, otherwise directly in storage. Returns `Ok(None)` when no
    /// such session exists.
    pub async fn archive_session(
        &self,
        project_path: &Path,
        session_id: &str,
    ) -> Result<Option<Session>, SessionError> {
        let mut guard = self.current.lock().await;
        if let Some(active) = guard.as_mut().filter(|a| a.session.id == session_id) {
            active.session.status = SessionStatus::Archived;
            active.session.touch();
            active.metadata_dirty = true;
            self.final_save(active)?;

            let session = active.session.clone();
            *guard = None;
            drop(guard);
            self.stop_autosave();

            info!(session_id, "archived current session");
            self.emit(SessionEvent::Archived {
                session_id: session_id.to_string(),
            });
            return Ok(Some(session));
        }
        drop(guard);

        let Some(mut loaded) = self.store.load(project_path, session_id)? else {
            return Ok(None);
        };
        loaded.session.status = SessionStatus::Archived;
        loaded.session.touch();
        self.store.save(&loaded.session, &loaded.messages)?;

        info!(session_id, "archived stored session");
        self.emit(SessionEvent::Archived {
            session_id: session_id.to_string(),
        });
        Ok(Some(loaded.session))
    }

    /// Flush the current session and release it. The graceful exit path:
    /// cancels the auto-save task and performs one final save. A failed save
    /// leaves the session current so a second call can retry it.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.stop_autosave();
        let mut guard = self.current.lock().await;
        if let Some(active) = guard.as_mut() {
            self.final_save(active)?;
            info!(session_id = %active.session.id, "shut down with final save");
            *guard = None;
        }
        Ok(())
    }

    /// Make a session current, flushing and releasing any previous one
    /// first, and make sure the auto-save loop is running.
    async fn install_current(&self, next: ActiveSession) {
        let mut guard = self.current.lock().await;
        if let Some(mut previous) = guard.replace(next) {
            // Release path for the displaced session: best-effort final
            // save; failure must not abort installing the new one.
            if let Err(error) = self.final_save(&mut previous) {
                warn!(
                    session_id = %previous.session.id,
                    %error,
                    "final save of displaced session failed"
                );
                self.emit(SessionEvent::SaveError {
                    session_id: previous.session.id.clone(),
                    error: error.to_string(),
                });
            }
        }
        drop(guard);
        self.ensure_autosave();
    }

    fn final_save(&self, active: &mut ActiveSession) -> Result<(), StoreError> {
        active.session.message_count = active.buffer.len();
        active.session.total_tokens = active.buffer.total_tokens();
        let snapshot = active.buffer.export_state();
        self.store.save(&active.session, &snapshot)?;
        active.unsaved.clear();
        active.metadata_dirty = false;
        self.emit(SessionEvent::Saved {
            session_id: active.session.id.clone(),
            message_count: snapshot.len(),
        });
        Ok(())
    }

    /// Spawn the auto-save loop if it is not already running.
    fn ensure_autosave(&self) {
        let mut handle = self.autosave.lock().expect("autosave lock poisoned");
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let store = Arc::clone(&self.store);
        let current = Arc::clone(&self.current);
        let events = self.events.clone();
        let interval = self.config.autosave_interval;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let mut guard = current.lock().await;
                let Some(active) = guard.as_mut() else {
                    continue;
                };
                match flush_active(&store, active) {
                    Ok(None) => {}
                    Ok(Some(count)) => {
                        debug!(
                            session_id = %active.session.id,
                            persisted = count,
                            "auto-save flush"
                        );
                        let _ = events.send(SessionEvent::Saved {
                            session_id: active.session.id.clone(),
                            message_count: active.buffer.len(),
                        });
                    }
                    Err(error) => {
                        // Reported and retried on the next tick; never
                        // crashes the process.
                        warn!(
                            session_id = %active.session.id,
                            %error,
                            "auto-save failed"
                        );
                        let _ = events.send(SessionEvent::SaveError {
                            session_id: active.session.id.clone(),
                            error: error.to_string(),
                        });
                    }
                }
            }
        }));
    }

    fn stop_autosave(&self) {
        if let Some(handle) = self
            .autosave
            .lock()
            .expect("autosave lock poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for SessionLifecycleManager {
    fn drop(&mut self) {
        // Cannot await in drop; callers use `shutdown` for the final save.
        self.stop_autosave();
    }
}

/// One auto-save flush, under the session lock.
///
/// Queued messages go down the O(1) append path; a dirty session is
/// upgraded to a full snapshot save (copy-then-write: the message list is
/// cloned before any byte hits disk). Returns how many records were
/// persisted, or `None` when there was nothing to do.
fn flush_active(
    store: &ConversationStore,
    active: &mut ActiveSession,
) -> Result<Option<usize>, StoreError> {
    if active.metadata_dirty {
        active.session.message_count = active.buffer.len();
        active.session.total_tokens = active.buffer.total_tokens();
        let snapshot = active.buffer.export_state();
        store.save(&active.session, &snapshot)?;
        active.unsaved.clear();
        active.metadata_dirty = false;
        return Ok(Some(snapshot.len()));
    }

    if active.unsaved.is_empty() {
        return Ok(None);
    }

    let mut persisted = 0;
    while let Some(message) = active.unsaved.first() {
        store.append(&active.session.project_path, &active.session.id, message)?;
        active.unsaved.remove(0);
        persisted += 1;
    }
    Ok(Some(persisted))
}
