//! Staging, committing and pushing.
//!
//! Index and commit work goes through libgit2. Pushing goes through the
//! [`GitBackend`] so it shares the CLI hardening and per-call SSH key of
//! clone and pull.

use std::path::Path;

use git2::{Oid, Repository, Signature};

use super::changes::ChangeSet;
use crate::cache::{GitBackend, GitError, SshAccess};

const FALLBACK_NAME: &str = "gitpilot";
const FALLBACK_EMAIL: &str = "gitpilot@localhost";

/// Stage every path of `changes` in the repository's index.
///
/// Renames are staged as removal of the old path plus addition of the new.
pub fn stage(repo: &Repository, changes: &ChangeSet) -> Result<(), GitError> {
    let mut index = repo.index()?;

    for path in changes.modified.iter().chain(&changes.added) {
        index.add_path(Path::new(path))?;
    }
    for path in &changes.deleted {
        index.remove_path(Path::new(path))?;
    }
    for (old, new) in &changes.renamed {
        index.remove_path(Path::new(old))?;
        index.add_path(Path::new(new))?;
    }

    index.write()?;
    Ok(())
}

fn signature(repo: &Repository) -> Result<Signature<'static>, GitError> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(e) => {
            log::debug!("No git identity configured ({}), using fallback", e.message());
            Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?)
        }
    }
}

/// Commit the current index on HEAD, returning the new commit id.
pub fn commit(repo: &Repository, message: &str) -> Result<Oid, GitError> {
    let sig = signature(repo)?;
    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch || e.code() == git2::ErrorCode::NotFound => {
            None
        }
        Err(e) => return Err(e.into()),
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    Ok(repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?)
}

/// Name of the checked-out branch.
pub fn current_branch(repo: &Repository) -> Result<String, GitError> {
    if repo.head_detached()? {
        return Err(GitError::InvalidInput(
            "HEAD is detached - not on any branch".to_string(),
        ));
    }
    let head = repo.head()?;
    head.shorthand()
        .map(str::to_string)
        .ok_or_else(|| GitError::ParseError("branch name is not valid UTF-8".to_string()))
}

/// Outcome of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub remote: String,
    pub branch: String,
}

/// Reasons a push did not happen.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("No remote repository configured")]
    NoRemote,
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Push the current branch to the first configured remote.
pub fn push_current_branch<B: GitBackend>(
    backend: &B,
    repo: &Repository,
    ssh: Option<&SshAccess>,
) -> Result<PushOutcome, PushError> {
    let branch = current_branch(repo)?;
    let remotes = repo.remotes().map_err(GitError::from)?;
    let remote = remotes
        .iter()
        .flatten()
        .next()
        .map(str::to_string)
        .ok_or(PushError::NoRemote)?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::InvalidInput("cannot push from a bare repository".to_string()))?;

    backend.push(workdir, &remote, &branch, ssh)?;
    Ok(PushOutcome { remote, branch })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GitCli;
    use crate::testutil::{commit_file, init_repo, require_git};
    use crate::workflow::changes::ChangeTracker;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn stage_and_commit_all_kinds_of_change() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        let contents = "line of content that is long enough to be similar\n".repeat(20);
        commit_file(&repo, "keep.txt", "one\n", "initial");
        commit_file(&repo, "gone.txt", "bye\n", "second");
        commit_file(&repo, "old.txt", &contents, "third");

        fs::write(dir.path().join("keep.txt"), "two\n").unwrap();
        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        fs::write(dir.path().join("new.txt"), "hi\n").unwrap();

        let mut changes = ChangeTracker.changes(&repo).unwrap();
        // Stage a rename by hand since the tracker only pairs staged renames.
        fs::rename(dir.path().join("old.txt"), dir.path().join("moved.txt")).unwrap();
        changes
            .renamed
            .push(("old.txt".to_string(), "moved.txt".to_string()));

        stage(&repo, &changes).unwrap();
        let oid = commit(&repo, "chore: mixed").unwrap();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.id(), oid);
        assert_eq!(head.message(), Some("chore: mixed"));
        assert_eq!(head.parent_count(), 1);
        assert!(ChangeTracker.changes(&repo).unwrap().is_empty());

        let tree = head.tree().unwrap();
        assert!(tree.get_name("new.txt").is_some());
        assert!(tree.get_name("moved.txt").is_some());
        assert!(tree.get_name("gone.txt").is_none());
        assert!(tree.get_name("old.txt").is_none());
    }

    #[test]
    fn first_commit_has_no_parent() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();

        let changes = ChangeTracker.changes(&repo).unwrap();
        stage(&repo, &changes).unwrap();
        commit(&repo, "feat: start").unwrap();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 0);
    }

    #[test]
    fn commit_uses_configured_identity() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        stage(&repo, &ChangeTracker.changes(&repo).unwrap()).unwrap();
        commit(&repo, "feat: start").unwrap();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.author().name(), Some("Test User"));
    }

    #[test]
    fn current_branch_errors_on_detached_head() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        let oid = commit_file(&repo, "a.txt", "a\n", "initial");

        assert!(current_branch(&repo).is_ok());
        repo.set_head_detached(oid).unwrap();
        assert!(matches!(
            current_branch(&repo),
            Err(GitError::InvalidInput(_))
        ));
    }

    #[test]
    fn push_without_remote_is_reported() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        commit_file(&repo, "a.txt", "a\n", "initial");

        let result = push_current_branch(&GitCli::new(), &repo, None);
        assert!(matches!(result, Err(PushError::NoRemote)));
    }

    #[test]
    fn push_sends_branch_to_first_remote() {
        if !require_git() {
            return;
        }
        let dir = tempdir().unwrap();
        let remote_path = dir.path().join("remote.git");
        git2::Repository::init_bare(&remote_path).unwrap();

        let repo = init_repo(&dir.path().join("work"));
        let oid = commit_file(&repo, "a.txt", "a\n", "initial");
        repo.remote("origin", remote_path.to_str().unwrap()).unwrap();

        let outcome = push_current_branch(&GitCli::new(), &repo, None).unwrap();
        assert_eq!(outcome.remote, "origin");

        let remote = git2::Repository::open_bare(&remote_path).unwrap();
        let pushed = remote
            .find_reference(&format!("refs/heads/{}", outcome.branch))
            .unwrap()
            .target()
            .unwrap();
        assert_eq!(pushed, oid);
    }
}
