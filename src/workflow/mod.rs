//! The commit workflow: detect changes, describe them, commit, optionally
//! push, and record the result in the changelog.

pub mod ai;
pub mod changelog;
pub mod changes;
pub mod message;
pub mod ops;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{
    Credentials, GitBackend, GitError, RepoError, RepoHandle, RepositoryManager,
    configure_ssh_access,
};
use crate::config::Config;
use crate::protocol::error_chain;
use ai::AiClient;
use changelog::Changelog;
use changes::{ChangeSet, ChangeTracker};
use message::MessageGenerator;
use ops::PushError;

/// Outcome of one [`Workflow::commit_and_push`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub success: bool,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub files_changed: usize,
    pub pushed: bool,
    pub changelog_updated: bool,
    pub message: String,
    pub error: Option<String>,
}

impl CommitResult {
    fn failed(error: String) -> Self {
        Self {
            message: error.clone(),
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Which repository to commit in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A working tree on the local filesystem.
    Local(PathBuf),
    /// A remote repository, cloned into the workspace.
    Remote(String),
}

/// Fatal workflow failures. Push and changelog problems are not errors.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("Failed to open repository: {0}")]
    Open(#[source] GitError),
    #[error("Failed to track changes: {0}")]
    Track(#[source] GitError),
    #[error("Failed to stage changes: {0}")]
    Stage(#[source] GitError),
    #[error("Failed to create commit: {0}")]
    Commit(#[source] GitError),
}

/// Runs the commit workflow with the configured message sources.
pub struct Workflow {
    generator: MessageGenerator,
    changelog: Changelog,
    ai: Option<AiClient>,
}

impl Workflow {
    pub fn new(config: &Config) -> Self {
        let ai = if config.ai.enabled {
            match AiClient::new(&config.ai) {
                Ok(client) => Some(client),
                Err(e) => {
                    log::warn!("AI commit messages disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            generator: MessageGenerator::new(config.max_bullet_points, config.max_summary_lines),
            changelog: Changelog::new(config.changelog_file.clone()),
            ai,
        }
    }

    /// Commit every change in `target`, pushing when `confirm_push` is set.
    ///
    /// Never fails outright: errors are reported in the returned result.
    pub fn commit_and_push<B: GitBackend>(
        &self,
        manager: &RepositoryManager<B>,
        target: &Target,
        credentials: Option<&Credentials>,
        confirm_push: bool,
    ) -> CommitResult {
        match self.run(manager, target, credentials, confirm_push) {
            Ok(result) => result,
            Err(e) => {
                let message = error_chain(&e);
                log::error!("Commit workflow failed: {}", message);
                CommitResult::failed(message)
            }
        }
    }

    fn resolve<B: GitBackend>(
        manager: &RepositoryManager<B>,
        target: &Target,
        credentials: Option<&Credentials>,
    ) -> Result<std::sync::Arc<RepoHandle>, RepoError> {
        match target {
            Target::Local(path) => manager.get_local(path),
            Target::Remote(url) => manager.get_or_clone(url, credentials),
        }
    }

    fn message_for(&self, changes: &ChangeSet, repo: &git2::Repository) -> String {
        let draft = self.generator.generate(changes, repo);
        let Some(ai) = &self.ai else {
            return draft;
        };
        match ai.generate(changes, &draft) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("AI commit message failed, using generated one: {}", e);
                draft
            }
        }
    }

    fn run<B: GitBackend>(
        &self,
        manager: &RepositoryManager<B>,
        target: &Target,
        credentials: Option<&Credentials>,
        confirm_push: bool,
    ) -> Result<CommitResult, WorkflowError> {
        let handle = Self::resolve(manager, target, credentials)?;

        // Serialize with clone/pull/cleanup of the same workspace.
        let lock = matches!(target, Target::Remote(_)).then(|| manager.locks().lock_for(handle.id()));
        let _guard = lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()));

        let repo = handle.open().map_err(WorkflowError::Open)?;
        let changes = ChangeTracker
            .changes(&repo)
            .map_err(WorkflowError::Track)?
            .exclude_file(self.changelog.file_name());

        if changes.is_empty() {
            log::info!("No changes in {}", handle.working_dir().display());
            return Ok(CommitResult {
                success: true,
                message: "No changes to commit".to_string(),
                ..Default::default()
            });
        }

        let mut result = CommitResult {
            files_changed: changes.total_files(),
            ..Default::default()
        };

        let commit_message = self.message_for(&changes, &repo);
        ops::stage(&repo, &changes).map_err(WorkflowError::Stage)?;
        let oid = ops::commit(&repo, &commit_message).map_err(WorkflowError::Commit)?;
        let commit_hash = oid.to_string();
        log::info!(
            "Committed {} file(s) in {} as {}",
            result.files_changed,
            handle.working_dir().display(),
            &commit_hash[..7]
        );

        result.message = if confirm_push {
            self.push(manager, &repo, credentials, &mut result)
        } else {
            "Commit created successfully (not pushed)".to_string()
        };

        match self.changelog.record(
            handle.working_dir(),
            &commit_hash,
            &commit_message,
            result.pushed,
        ) {
            Ok(()) => result.changelog_updated = true,
            Err(e) => {
                log::warn!("Failed to update changelog: {}", e);
                result
                    .message
                    .push_str(&format!(" (Warning: Failed to update changelog: {})", e));
            }
        }

        result.success = true;
        result.commit_hash = Some(commit_hash);
        result.commit_message = Some(commit_message);
        Ok(result)
    }

    /// Push and describe what happened. Failures only change the message.
    fn push<B: GitBackend>(
        &self,
        manager: &RepositoryManager<B>,
        repo: &git2::Repository,
        credentials: Option<&Credentials>,
        result: &mut CommitResult,
    ) -> String {
        let ssh = match credentials {
            Some(Credentials::Ssh { ssh_key }) => match configure_ssh_access(ssh_key) {
                Ok(ssh) => Some(ssh),
                Err(e) => return format!("Commit created successfully but push failed: {}", e),
            },
            _ => None,
        };

        match ops::push_current_branch(manager.backend(), repo, ssh.as_ref()) {
            Ok(outcome) => {
                result.pushed = true;
                log::info!("Pushed to {}/{}", outcome.remote, outcome.branch);
                format!("Successfully pushed to {}/{}", outcome.remote, outcome.branch)
            }
            Err(PushError::NoRemote) => {
                "Commit created successfully but not pushed: No remote repository configured"
                    .to_string()
            }
            Err(PushError::Git(e)) => {
                let detail = crate::cache::redact(&e.to_string(), credentials);
                log::warn!("Push failed: {}", detail);
                format!("Commit created successfully but push failed: {}", detail)
            }
        }
    }
}
