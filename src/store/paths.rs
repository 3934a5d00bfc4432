//! Project-path keying and file layout.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Longest sanitized prefix kept in a project key. Bounds directory-name
/// length on filesystems with a 255-byte component limit.
const MAX_KEY_PREFIX: usize = 96;

/// Hex characters of the path hash appended to every key.
const KEY_HASH_LEN: usize = 8;

/// Deterministic, collision-resistant, directory-safe key for a project
/// path.
///
/// Separator substitution alone is not collision-resistant (`/a/b` and
/// `/a-b` would both sanitize to `a-b`), so the key carries a truncated
/// SHA-256 of the original path bytes as a suffix. Two distinct paths never
/// map to the same key for the lifetime of stored data.
pub fn project_key(path: &Path) -> String {
    let raw = path.to_string_lossy();

    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    let hash: String = format!("{:x}", digest).chars().take(KEY_HASH_LEN).collect();

    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    let prefix: String = trimmed.chars().take(MAX_KEY_PREFIX).collect();

    if prefix.is_empty() {
        hash
    } else {
        format!("{}-{}", prefix, hash)
    }
}

/// File name of a session log.
pub(crate) fn session_file_name(session_id: &str) -> String {
    format!("{}.jsonl", session_id)
}

/// File name of a cached summary sidecar.
pub(crate) fn summary_file_name(session_id: &str) -> String {
    format!("{}.txt", session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_key_is_deterministic() {
        let path = PathBuf::from("/home/dev/projects/widget");
        assert_eq!(project_key(&path), project_key(&path));
    }

    #[test]
    fn test_distinct_paths_get_distinct_keys() {
        // Sanitizes to the same prefix; the hash suffix must disambiguate.
        let a = PathBuf::from("/a/b");
        let b = PathBuf::from("/a-b");
        assert_ne!(project_key(&a), project_key(&b));
    }

    #[test]
    fn test_key_is_directory_safe() {
        let key = project_key(&PathBuf::from("/home/dev/my project (v2)"));
        assert!(
            key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "unexpected character in key: {key}"
        );
    }

    #[test]
    fn test_root_path_key_is_just_the_hash() {
        let key = project_key(&PathBuf::from("/"));
        assert_eq!(key.len(), KEY_HASH_LEN);
    }

    #[test]
    fn test_long_paths_are_bounded() {
        let long = PathBuf::from(format!("/projects/{}", "x".repeat(400)));
        let key = project_key(&long);
        assert!(key.len() <= MAX_KEY_PREFIX + 1 + KEY_HASH_LEN);
    }
}
