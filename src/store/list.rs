//! Cross-project session listing: filter, sort, paginate over metadata only.

use super::store::ConversationStore;
use crate::errors::StoreError;
use crate::session::{Session, SessionStatus};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

/// Filter over session metadata. All criteria are optional and conjunctive.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions for this project directory.
    pub project_path: Option<PathBuf>,
    pub status: Option<SessionStatus>,
    /// Sessions carrying every listed tag.
    pub tags: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive free-text search over title and tags.
    pub search: Option<String>,
}

impl SessionFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(path) = &self.project_path {
            if &session.project_path != path {
                return false;
            }
        }
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        if !self.tags.iter().all(|t| session.tags.contains(t)) {
            return false;
        }
        if let Some(after) = self.created_after {
            if session.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if session.created_at > before {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let title_hit = session
                .title
                .as_ref()
                .is_some_and(|t| t.to_lowercase().contains(&needle));
            let tag_hit = session.tags.iter().any(|t| t.to_lowercase().contains(&needle));
            if !title_hit && !tag_hit {
                return false;
            }
        }
        true
    }
}

/// Sortable metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    CreatedAt,
    #[default]
    UpdatedAt,
    MessageCount,
    Title,
}

/// Sort order for a listing. Defaults to most recently updated first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSort {
    pub field: SortField,
    pub ascending: bool,
}

impl SessionSort {
    pub fn by(field: SortField, ascending: bool) -> Self {
        Self { field, ascending }
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    /// Total matches across all pages.
    pub total: usize,
    pub has_more: bool,
}

impl ConversationStore {
    /// Scan all project directories, load metadata only, then filter, sort,
    /// and paginate.
    ///
    /// Unreadable or corrupt session files are skipped with a warning; a bad
    /// file for one project never aborts the listing for another.
    pub fn list(
        &self,
        filter: &SessionFilter,
        sort: SessionSort,
        page: usize,
        page_size: usize,
    ) -> Result<SessionPage, StoreError> {
        let mut sessions: Vec<Session> = Vec::new();

        if self.root().exists() {
            for entry in WalkDir::new(self.root())
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if !path.extension().is_some_and(|ext| ext == "jsonl") {
                    continue;
                }
                match self.read_header_at(path) {
                    Ok(session) => {
                        if filter.matches(&session) {
                            sessions.push(session);
                        }
                    }
                    Err(error) => {
                        warn!(path = %path.display(), %error, "skipping unreadable session file");
                    }
                }
            }
        }

        sort_sessions(&mut sessions, sort);

        let total = sessions.len();
        let start = page.saturating_mul(page_size);
        let paged: Vec<Session> = sessions.into_iter().skip(start).take(page_size).collect();
        let has_more = start + paged.len() < total;

        Ok(SessionPage {
            sessions: paged,
            total,
            has_more,
        })
    }
}

fn sort_sessions(sessions: &mut [Session], sort: SessionSort) {
    match sort.field {
        SortField::CreatedAt => sessions.sort_by_key(|s| s.created_at),
        SortField::UpdatedAt => sessions.sort_by_key(|s| s.updated_at),
        SortField::MessageCount => sessions.sort_by_key(|s| s.message_count),
        SortField::Title => {
            sessions.sort_by(|a, b| a.title.as_deref().unwrap_or("").cmp(b.title.as_deref().unwrap_or("")))
        }
    }
    if !sort.ascending {
        sessions.reverse();
    }
}
