//! Best-effort git branch detection.

use git2::Repository;
use std::path::Path;

/// Current branch name for a project directory, if it is inside a git
/// repository with a named HEAD.
///
/// Strictly best-effort: no repository, a detached HEAD, or any git error
/// degrades to `None`; session creation never fails over git state. An
/// unborn branch (fresh `git init`, no commits) still resolves to its
/// symbolic target name.
pub fn current_branch(project_dir: &Path) -> Option<String> {
    let repo = Repository::discover(project_dir).ok()?;
    match repo.head() {
        Ok(head) => {
            if head.is_branch() {
                head.shorthand().map(String::from)
            } else {
                None
            }
        }
        // Unborn branch: HEAD exists only as a symbolic reference.
        Err(_) => {
            let head_ref = repo.find_reference("HEAD").ok()?;
            head_ref
                .symbolic_target()
                .and_then(|t| t.strip_prefix("refs/heads/"))
                .map(String::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_non_repository_returns_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(current_branch(dir.path()), None);
    }

    #[test]
    fn test_fresh_repository_reports_unborn_branch() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let branch = current_branch(dir.path());
        // Default branch name depends on git config; it must exist either way.
        assert!(branch.is_some());
    }
}
