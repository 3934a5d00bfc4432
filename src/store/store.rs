//! The on-disk session store.

use super::paths::{project_key, session_file_name, summary_file_name};
use crate::errors::StoreError;
use crate::session::{ConversationMessage, Session, SessionHeader, STORED_FORMAT_VERSION};
use crate::tokens::TokenEstimator;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// A fully loaded session: header metadata plus every message that parsed.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub session: Session,
    pub messages: Vec<ConversationMessage>,
    /// Message lines skipped because they failed to parse.
    pub skipped_lines: usize,
}

/// Durable persistence of sessions, keyed by project path.
///
/// The store is the only component that reads or writes session files.
/// Errors on one session never corrupt or abort operations on another.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    root: PathBuf,
}

impl ConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default storage root under the user data directory, with a home-dir
    /// fallback for minimal environments.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scrollback")
            .join("sessions")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_path: &Path) -> PathBuf {
        self.root.join(project_key(project_path))
    }

    /// On-disk location of a session's JSONL file.
    pub fn session_file(&self, project_path: &Path, session_id: &str) -> PathBuf {
        self.project_dir(project_path).join(session_file_name(session_id))
    }

    fn summary_file(&self, project_path: &Path, session_id: &str) -> PathBuf {
        self.project_dir(project_path)
            .join("summaries")
            .join(summary_file_name(session_id))
    }

    /// Write the full record (header + all messages) atomically.
    ///
    /// Serializes into a temp file in the same directory, then renames into
    /// place, so a crash mid-write leaves either the old file or the new
    /// one, never a truncated hybrid.
    pub fn save(
        &self,
        session: &Session,
        messages: &[ConversationMessage],
    ) -> Result<(), StoreError> {
        let path = self.session_file(&session.project_path, &session.id);
        let dir = path
            .parent()
            .expect("session file always has a parent directory");
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::io("creating project directory", dir, e))?;

        let tmp = dir.join(format!(".{}.tmp-{}", session.id, Uuid::new_v4()));
        let result = self.write_record(&tmp, session, messages);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
            return result;
        }

        fs::rename(&tmp, &path)
            .map_err(|e| StoreError::io("renaming session file into place", &path, e))
    }

    fn write_record(
        &self,
        tmp: &Path,
        session: &Session,
        messages: &[ConversationMessage],
    ) -> Result<(), StoreError> {
        let file =
            File::create(tmp).map_err(|e| StoreError::io("creating session temp file", tmp, e))?;
        let mut writer = BufWriter::new(file);

        let header = SessionHeader::new(session.clone());
        let header_line = serde_json::to_string(&header).map_err(StoreError::Serialize)?;
        writeln!(writer, "{}", header_line)
            .map_err(|e| StoreError::io("writing session header", tmp, e))?;

        for message in messages {
            let line = serde_json::to_string(message).map_err(StoreError::Serialize)?;
            writeln!(writer, "{}", line)
                .map_err(|e| StoreError::io("writing session message", tmp, e))?;
        }

        writer
            .flush()
            .map_err(|e| StoreError::io("flushing session file", tmp, e))
    }

    /// Append one message record without rewriting prior content. O(1) in
    /// message count; the common-case write path for an active session.
    ///
    /// Fails with [`StoreError::NotFound`] if no prior `save` created the
    /// file.
    pub fn append(
        &self,
        project_path: &Path,
        session_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), StoreError> {
        let path = self.session_file(project_path, session_id);
        if !path.exists() {
            return Err(StoreError::NotFound {
                session_id: session_id.to_string(),
                path,
            });
        }

        let line = serde_json::to_string(message).map_err(StoreError::Serialize)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io("opening session file for append", &path, e))?;
        writeln!(file, "{}", line)
            .map_err(|e| StoreError::io("appending session message", &path, e))
    }

    /// Load the full session.
    ///
    /// Returns `Ok(None)` when no file exists. An unparsable header is
    /// [`StoreError::CorruptHeader`], fatal for this one session only. A
    /// malformed message line is skipped with a warning and counted in
    /// [`LoadedSession::skipped_lines`]. Loaded messages are marked
    /// `from_history`; `message_count` and `total_tokens` are recomputed
    /// from the parsed messages so an append-only flush can never leave the
    /// header permanently stale.
    pub fn load(
        &self,
        project_path: &Path,
        session_id: &str,
    ) -> Result<Option<LoadedSession>, StoreError> {
        let path = self.session_file(project_path, session_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("opening session file", &path, e)),
        };
        let mut reader = BufReader::new(file);

        let mut session = read_header(&mut reader, &path)?.metadata;

        let mut messages = Vec::new();
        let mut skipped = 0usize;
        for (index, line_result) in reader.lines().enumerate() {
            let line_number = index + 2;
            let line = line_result
                .map_err(|e| StoreError::io("reading session message line", &path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationMessage>(&line) {
                Ok(mut message) => {
                    message.from_history = true;
                    messages.push(message);
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        line = line_number,
                        %error,
                        "skipping malformed message line"
                    );
                    skipped += 1;
                }
            }
        }

        session.message_count = messages.len();
        // Records persisted without a cached count are estimated rather than
        // counted as zero.
        let estimator = TokenEstimator::default();
        session.total_tokens = messages
            .iter()
            .map(|m| m.tokens.unwrap_or_else(|| estimator.estimate_message(m)))
            .sum();

        Ok(Some(LoadedSession {
            session,
            messages,
            skipped_lines: skipped,
        }))
    }

    /// Read only the header line for fast listing. Never scans message
    /// lines.
    pub fn load_metadata_only(
        &self,
        project_path: &Path,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let path = self.session_file(project_path, session_id);
        match self.read_header_at(&path) {
            Ok(session) => Ok(Some(session)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Header-only read from an arbitrary session file path. Used by the
    /// listing scan.
    pub(crate) fn read_header_at(&self, path: &Path) -> Result<Session, StoreError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    session_id: path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(StoreError::io("opening session file", path, e)),
        };
        let mut reader = BufReader::new(file);
        Ok(read_header(&mut reader, path)?.metadata)
    }

    /// Remove the session log and its summary sidecar. Returns `false`
    /// (not an error) when nothing existed.
    pub fn delete(&self, project_path: &Path, session_id: &str) -> Result<bool, StoreError> {
        let path = self.session_file(project_path, session_id);
        let existed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StoreError::io("deleting session file", &path, e)),
        };

        let summary = self.summary_file(project_path, session_id);
        match fs::remove_file(&summary) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io("deleting summary sidecar", &summary, e)),
        }

        Ok(existed)
    }

    /// Cache the latest compaction summary in a sidecar, independent of the
    /// message log.
    pub fn save_summary(
        &self,
        project_path: &Path,
        session_id: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let path = self.summary_file(project_path, session_id);
        let dir = path
            .parent()
            .expect("summary file always has a parent directory");
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::io("creating summaries directory", dir, e))?;
        fs::write(&path, summary).map_err(|e| StoreError::io("writing summary sidecar", &path, e))
    }

    pub fn load_summary(
        &self,
        project_path: &Path,
        session_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let path = self.summary_file(project_path, session_id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io("reading summary sidecar", &path, e)),
        }
    }
}

fn read_header(
    reader: &mut impl BufRead,
    path: &Path,
) -> Result<SessionHeader, StoreError> {
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .map_err(|e| StoreError::io("reading session header", path, e))?;
    let header: SessionHeader = serde_json::from_str(first_line.trim_end())
        .map_err(|source| StoreError::CorruptHeader {
            path: path.to_path_buf(),
            source,
        })?;
    if header.version != STORED_FORMAT_VERSION {
        warn!(
            path = %path.display(),
            version = header.version,
            "session file has a newer format version; reading best-effort"
        );
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup_store() -> (ConversationStore, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        (ConversationStore::new(dir.path()), dir)
    }

    fn sample_session() -> Session {
        Session::new("/repo/widget", "claude-sonnet")
    }

    fn sample_messages(n: usize) -> Vec<ConversationMessage> {
        (0..n)
            .map(|i| {
                let mut msg = if i % 2 == 0 {
                    ConversationMessage::user(format!("question {i}"))
                } else {
                    ConversationMessage::assistant(format!("answer {i}"))
                };
                msg.tokens = Some(5);
                msg
            })
            .collect()
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        let messages = sample_messages(4);

        store.save(&session, &messages).unwrap();
        let loaded = store
            .load(&session.project_path, &session.id)
            .unwrap()
            .expect("session must exist");

        assert_eq!(loaded.messages.len(), 4);
        assert_eq!(loaded.skipped_lines, 0);
        for (original, loaded) in messages.iter().zip(&loaded.messages) {
            assert_eq!(original.id, loaded.id);
            assert!(loaded.from_history);
        }
        assert_eq!(loaded.session.message_count, 4);
        assert_eq!(loaded.session.total_tokens, 20);
    }

    #[test]
    fn test_load_estimates_uncounted_tokens() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        let messages = vec![
            ConversationMessage::user("how do I parse this config file?"),
            ConversationMessage::assistant("use the toml crate and derive Deserialize"),
        ];
        assert!(messages.iter().all(|m| m.tokens.is_none()));

        store.save(&session, &messages).unwrap();
        let loaded = store
            .load(&session.project_path, &session.id)
            .unwrap()
            .expect("session must exist");

        assert!(loaded.session.total_tokens > 0);
        assert_eq!(loaded.session.message_count, 2);
    }

    #[test]
    fn test_load_missing_session_is_none() {
        let (store, _dir) = setup_store();
        let result = store.load(&PathBuf::from("/repo"), "nope").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_append_requires_prior_save() {
        let (store, _dir) = setup_store();
        let msg = ConversationMessage::user("orphan");
        let err = store
            .append(&PathBuf::from("/repo"), "never-saved", &msg)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_append_equivalence_with_bulk_save() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        let messages = sample_messages(3);

        // Built incrementally: empty save, then one append per message.
        store.save(&session, &[]).unwrap();
        for msg in &messages {
            store.append(&session.project_path, &session.id, msg).unwrap();
        }
        let incremental = store
            .load(&session.project_path, &session.id)
            .unwrap()
            .unwrap();

        // Built in memory and saved once.
        let mut bulk_session = sample_session();
        bulk_session.project_path = PathBuf::from("/repo/other");
        store.save(&bulk_session, &messages).unwrap();
        let bulk = store
            .load(&bulk_session.project_path, &bulk_session.id)
            .unwrap()
            .unwrap();

        let ids = |s: &LoadedSession| s.messages.iter().map(|m| m.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&incremental), ids(&bulk));
    }

    #[test]
    fn test_corrupt_message_line_is_skipped_not_fatal() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        store.save(&session, &sample_messages(2)).unwrap();

        let path = store.session_file(&session.project_path, &session.id);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{this is not json\n");
        fs::write(&path, content).unwrap();

        let loaded = store
            .load(&session.project_path, &session.id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.skipped_lines, 1);
    }

    #[test]
    fn test_corrupt_header_is_fatal_for_that_session() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        store.save(&session, &[]).unwrap();

        let path = store.session_file(&session.project_path, &session.id);
        fs::write(&path, "garbage header\n").unwrap();

        let err = store.load(&session.project_path, &session.id).unwrap_err();
        assert!(matches!(err, StoreError::CorruptHeader { .. }));
    }

    #[test]
    fn test_metadata_only_ignores_corrupt_message_lines() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        store.save(&session, &sample_messages(3)).unwrap();

        // Corrupt every message line, leave the header intact.
        let path = store.session_file(&session.project_path, &session.id);
        let content = fs::read_to_string(&path).unwrap();
        let header = content.lines().next().unwrap().to_string();
        fs::write(&path, format!("{header}\nnot json\nnot json\nnot json\n")).unwrap();

        let meta = store
            .load_metadata_only(&session.project_path, &session.id)
            .unwrap()
            .expect("metadata must load");
        assert_eq!(meta.id, session.id);
    }

    #[test]
    fn test_delete_returns_false_when_absent() {
        let (store, _dir) = setup_store();
        assert!(!store.delete(&PathBuf::from("/repo"), "ghost").unwrap());
    }

    #[test]
    fn test_delete_removes_log_and_sidecar() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        store.save(&session, &[]).unwrap();
        store
            .save_summary(&session.project_path, &session.id, "prior summary")
            .unwrap();

        assert!(store.delete(&session.project_path, &session.id).unwrap());
        assert!(store
            .load(&session.project_path, &session.id)
            .unwrap()
            .is_none());
        assert!(store
            .load_summary(&session.project_path, &session.id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_summary_sidecar_round_trip() {
        let (store, _dir) = setup_store();
        let session = sample_session();
        store
            .save_summary(&session.project_path, &session.id, "compacted 8 messages")
            .unwrap();
        let loaded = store
            .load_summary(&session.project_path, &session.id)
            .unwrap();
        assert_eq!(loaded.as_deref(), Some("compacted 8 messages"));
    }

    #[test]
    fn test_save_is_atomic_no_temp_left_behind() {
        let (store, dir) = setup_store();
        let session = sample_session();
        store.save(&session, &sample_messages(2)).unwrap();

        let project_dir = store.session_file(&session.project_path, &session.id);
        let entries: Vec<_> = fs::read_dir(project_dir.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(
            entries.iter().all(|name| !name.contains(".tmp-")),
            "temp file left behind: {entries:?}"
        );
        drop(dir);
    }
}
