//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for network operations:**
//! - `clone_repo`, `pull`, `push` - the CLI honours a per-invocation
//!   `GIT_SSH_COMMAND`, so every call can carry its own SSH key
//!
//! **libgit2 for local operations:**
//! - `open` / `open_repository` - clean API for opening existing repos
//! - `set_remote_url` - plain config write
//!
//! The [`GitBackend`] trait is the seam the repository manager consumes, so
//! the clone/pull state machine can be exercised without a network.

use git2::Repository;
use std::fmt;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use thiserror::Error;

use super::credentials::SshAccess;

/// Network operation performed through the git CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    Clone,
    Pull,
    Push,
}

impl fmt::Display for GitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GitOp::Clone => "clone",
            GitOp::Pull => "pull",
            GitOp::Push => "push",
        })
    }
}

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// The git CLI exited unsuccessfully.
    #[error("{op} failed: {stderr}")]
    Command {
        op: GitOp,
        /// Exit status, `None` when the process was killed by a signal.
        code: Option<i32>,
        stderr: String,
    },
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GitError {
    /// Human-readable text reported by git, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            GitError::Command { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Best-effort guess at why the operation failed.
    ///
    /// This matches substrings of git's stderr, which vary across git
    /// versions and locales. Treat the answer as a hint for the user, never
    /// as a classification to branch on.
    pub fn hint(&self) -> Option<GitFailureHint> {
        let text = match self {
            GitError::Command { stderr, .. } => stderr.to_lowercase(),
            GitError::Git(e) => e.message().to_lowercase(),
            _ => return None,
        };

        if text.contains("authentication failed")
            || text.contains("could not read username")
            || text.contains("could not read password")
            || text.contains("permission denied (publickey")
        {
            Some(GitFailureHint::Authentication)
        } else if text.contains("could not resolve host") {
            Some(GitFailureHint::HostResolution)
        } else {
            None
        }
    }
}

/// Heuristic reason for a failed network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFailureHint {
    Authentication,
    HostResolution,
}

/// Validate that a git ref (branch name or commit SHA) does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    reject_flag_like(value, name)
}

/// Reject values git would parse as options, plus control characters.
fn reject_flag_like(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b == 0 || b < 0x20) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

fn path_str<'a>(path: &'a Path, what: &str) -> Result<&'a str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::ParseError(format!("{} is not valid UTF-8", what)))
}

fn check_status(op: GitOp, output: Output) -> Result<Output, GitError> {
    if output.status.success() {
        return Ok(output);
    }
    Err(GitError::Command {
        op,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Version-control operations consumed by the repository manager.
pub trait GitBackend: Send + Sync {
    /// Open the repository at `path` and list its remote names.
    fn open(&self, path: &Path) -> Result<Vec<String>, GitError>;

    /// Clone `url` into `dest`.
    fn clone_repo(&self, url: &str, dest: &Path, ssh: Option<&SshAccess>)
    -> Result<(), GitError>;

    /// Point `remote` of the repository at `path` to `url`.
    fn set_remote_url(&self, path: &Path, remote: &str, url: &str) -> Result<(), GitError>;

    /// Pull `remote` into the current branch.
    fn pull(&self, path: &Path, remote: &str, ssh: Option<&SshAccess>) -> Result<(), GitError>;

    /// Push `branch` to the same-named branch on `remote`.
    fn push(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        ssh: Option<&SshAccess>,
    ) -> Result<(), GitError>;
}

/// Git CLI wrapper with security hardening.
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    /// - `GIT_SSH_COMMAND` - only when an SSH key was supplied for this call
    fn command(&self, ssh: Option<&SshAccess>) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(ssh) = ssh {
            cmd.env("GIT_SSH_COMMAND", ssh.ssh_command());
        }
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl GitBackend for GitCli {
    fn open(&self, path: &Path) -> Result<Vec<String>, GitError> {
        let repo = open_repository(path)?;
        let remotes = repo.remotes()?;
        Ok(remotes.iter().flatten().map(str::to_string).collect())
    }

    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        ssh: Option<&SshAccess>,
    ) -> Result<(), GitError> {
        reject_flag_like(url, "url")?;

        let dest_existed = dest.exists();

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let dest_str = path_str(dest, "destination path")?;

        let output = self
            .command(ssh)
            .args(["clone", "--"])
            .arg(url)
            .arg(dest_str)
            .output()?;

        if let Err(err) = check_status(GitOp::Clone, output) {
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
            return Err(err);
        }

        Ok(())
    }

    fn set_remote_url(&self, path: &Path, remote: &str, url: &str) -> Result<(), GitError> {
        let repo = open_repository(path)?;
        repo.remote_set_url(remote, url)?;
        Ok(())
    }

    fn pull(&self, path: &Path, remote: &str, ssh: Option<&SshAccess>) -> Result<(), GitError> {
        reject_flag_like(remote, "remote")?;

        let repo_str = path_str(path, "repository path")?;

        let output = self
            .command(ssh)
            .arg("-C")
            .arg(repo_str)
            .args(["pull", "--no-rebase", "--no-edit"])
            .arg(remote)
            .output()?;

        check_status(GitOp::Pull, output)?;
        Ok(())
    }

    fn push(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        ssh: Option<&SshAccess>,
    ) -> Result<(), GitError> {
        reject_flag_like(remote, "remote")?;
        // Validate branch name to prevent injection
        validate_git_ref(branch, "branch")?;

        let repo_str = path_str(path, "repository path")?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);

        let output = self
            .command(ssh)
            .arg("-C")
            .arg(repo_str)
            .arg("push")
            .arg(remote)
            .arg(&refspec)
            .output()?;

        check_status(GitOp::Push, output)?;
        Ok(())
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Check whether the git CLI can be executed.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{commit_file, init_repo, require_git};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn open_repository_not_found() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let nonexistent = temp_dir.path().join("nonexistent");

        let result = open_repository(&nonexistent);
        assert!(result.is_err(), "Should fail for nonexistent path");

        match result.err().unwrap() {
            GitError::NotFound(path) => {
                assert!(path.contains("nonexistent"));
            }
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn open_lists_remote_names() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        repo.remote("origin", "https://example.com/repo.git").unwrap();
        repo.remote("upstream", "https://example.com/upstream.git")
            .unwrap();

        let mut remotes = GitCli::new().open(temp_dir.path()).unwrap();
        remotes.sort();
        assert_eq!(remotes, vec!["origin", "upstream"]);
    }

    #[test]
    fn set_remote_url_rewrites_origin() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        repo.remote("origin", "https://example.com/repo.git").unwrap();

        GitCli::new()
            .set_remote_url(temp_dir.path(), "origin", "https://tok@example.com/repo.git")
            .unwrap();

        let repo = open_repository(temp_dir.path()).unwrap();
        let remote = repo.find_remote("origin").unwrap();
        assert_eq!(remote.url(), Some("https://tok@example.com/repo.git"));
    }

    #[test]
    fn hint_detects_authentication_failures() {
        let err = GitError::Command {
            op: GitOp::Clone,
            code: Some(128),
            stderr: "fatal: Authentication failed for 'https://github.com/x/y.git/'".into(),
        };
        assert_eq!(err.hint(), Some(GitFailureHint::Authentication));
    }

    #[test]
    fn hint_detects_host_resolution_failures() {
        let err = GitError::Command {
            op: GitOp::Clone,
            code: Some(128),
            stderr: "fatal: unable to access 'https://nope.invalid/': Could not resolve host: nope.invalid".into(),
        };
        assert_eq!(err.hint(), Some(GitFailureHint::HostResolution));
    }

    #[test]
    fn hint_is_none_for_unrecognised_text() {
        let err = GitError::Command {
            op: GitOp::Pull,
            code: Some(1),
            stderr: "error: Your local changes would be overwritten by merge".into(),
        };
        assert_eq!(err.hint(), None);
        assert_eq!(GitError::InvalidInput("x".into()).hint(), None);
    }

    #[test]
    fn validate_git_ref_rejects_bad_values() {
        for value in ["", "foo/../bar", "-malicious", "foo\0bar", "foo\nbar"] {
            assert!(
                matches!(validate_git_ref(value, "branch"), Err(GitError::InvalidInput(_))),
                "{:?} should be rejected",
                value
            );
        }
    }

    #[test]
    fn validate_git_ref_accepts_valid_refs() {
        assert!(validate_git_ref("main", "branch").is_ok());
        assert!(validate_git_ref("feature/my-branch", "branch").is_ok());
        assert!(validate_git_ref("v1.0.0", "tag").is_ok());
    }

    #[test]
    fn clone_rejects_flag_like_url() {
        let temp_dir = tempdir().unwrap();
        let dest = temp_dir.path().join("dest");

        let result = GitCli::new().clone_repo("--upload-pack=evil", &dest, None);
        assert!(matches!(result, Err(GitError::InvalidInput(_))));
    }

    #[test]
    fn push_rejects_invalid_branch() {
        let temp_dir = tempdir().unwrap();

        let result = GitCli::new().push(temp_dir.path(), "origin", "-malicious", None);
        assert!(matches!(result, Err(GitError::InvalidInput(_))));
    }

    #[test]
    fn clone_and_pull_local_repository() {
        if !require_git() {
            return;
        }
        let temp_dir = tempdir().unwrap();
        let source_path = temp_dir.path().join("source");
        let source = init_repo(&source_path);
        commit_file(&source, "README.md", "hello\n", "initial");

        let cli = GitCli::new();
        let dest = temp_dir.path().join("clone");
        cli.clone_repo(source_path.to_str().unwrap(), &dest, None)
            .expect("clone failed");
        assert_eq!(fs::read_to_string(dest.join("README.md")).unwrap(), "hello\n");
        assert_eq!(cli.open(&dest).unwrap(), vec!["origin"]);

        commit_file(&source, "NEW.md", "new\n", "second");
        cli.pull(&dest, "origin", None).expect("pull failed");
        assert!(dest.join("NEW.md").exists());
    }

    #[test]
    fn failed_clone_removes_destination_and_keeps_stderr() {
        if !require_git() {
            return;
        }
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("does-not-exist");
        let dest = temp_dir.path().join("clone");

        let err = GitCli::new()
            .clone_repo(missing.to_str().unwrap(), &dest, None)
            .unwrap_err();
        match &err {
            GitError::Command { op, code, stderr } => {
                assert_eq!(*op, GitOp::Clone);
                assert_ne!(*code, Some(0));
                assert!(!stderr.is_empty());
            }
            other => panic!("Expected Command error, got: {:?}", other),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn push_updates_remote_branch() {
        if !require_git() {
            return;
        }
        let temp_dir = tempdir().unwrap();
        let source_path = temp_dir.path().join("source");
        let source = init_repo(&source_path);
        let first = commit_file(&source, "README.md", "hello\n", "initial");
        // Detach so the checked-out branch of the source can receive pushes.
        source.set_head_detached(first).unwrap();

        let cli = GitCli::new();
        let dest = temp_dir.path().join("clone");
        cli.clone_repo(source_path.to_str().unwrap(), &dest, None)
            .unwrap();

        let clone = open_repository(&dest).unwrap();
        let pushed = commit_file(&clone, "CHANGE.md", "change\n", "change");
        let branch = clone.head().unwrap().shorthand().unwrap().to_string();

        cli.push(&dest, "origin", &branch, None).expect("push failed");

        let source = open_repository(&source_path).unwrap();
        let tip = source
            .find_branch(&branch, git2::BranchType::Local)
            .unwrap()
            .get()
            .target()
            .unwrap();
        assert_eq!(tip, pushed);
    }
}
