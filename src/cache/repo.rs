//! Repository manager
//!
//! This module provides the `RepositoryManager`, which hands out ready-to-use
//! repository handles. A handle for a remote URL is served from the handle
//! cache when possible; otherwise the repository's lock is taken and the
//! existing clone is refreshed, or a fresh clone is made. A clone that can no
//! longer be opened or pulled is deleted and cloned again once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::credentials::{
    CredentialError, Credentials, SshAccess, build_authenticated_url, configure_ssh_access,
    redact,
};
use super::git::{GitBackend, GitCli, GitError, GitFailureHint, open_repository};
use super::handles::{CacheStats, RepositoryCache};
use super::lock::LockTable;
use super::paths::WorkspacePaths;
use crate::types::RepoId;

/// Errors returned by repository operations.
#[derive(Error, Debug)]
pub enum RepoError {
    /// The supplied credentials are incomplete.
    #[error("invalid credentials: {0}")]
    Validation(#[source] CredentialError),
    /// A path that must exist does not.
    #[error("{0}")]
    NotFound(String),
    /// An argument was rejected before anything touched the disk.
    #[error("{0}")]
    InvalidInput(String),
    /// A git operation failed.
    #[error("{message}")]
    Git {
        message: String,
        /// Heuristic reason; see [`GitError::hint`].
        hint: Option<GitFailureHint>,
        #[source]
        source: GitError,
    },
    /// A filesystem operation on the workspace failed.
    #[error("failed to remove {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<CredentialError> for RepoError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing(_) => RepoError::Validation(err),
            CredentialError::KeyNotFound(_) => RepoError::NotFound(err.to_string()),
            CredentialError::KeyNotAFile(_) => RepoError::InvalidInput(err.to_string()),
        }
    }
}

/// A repository checked out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    id: RepoId,
    path: PathBuf,
    url: String,
}

impl RepoHandle {
    pub fn new(id: RepoId, path: PathBuf, url: &str) -> Self {
        Self {
            id,
            path,
            url: url.to_string(),
        }
    }

    pub fn id(&self) -> &RepoId {
        &self.id
    }

    /// Root of the working tree.
    pub fn working_dir(&self) -> &Path {
        &self.path
    }

    /// URL or path the handle was requested with. Never carries credentials
    /// added by this crate.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a fresh libgit2 handle on the working tree.
    pub fn open(&self) -> Result<git2::Repository, GitError> {
        open_repository(&self.path)
    }
}

/// Remove secrets from the text git reported.
fn redact_git_error(err: GitError, credentials: Option<&Credentials>) -> GitError {
    match err {
        GitError::Command { op, code, stderr } => GitError::Command {
            op,
            code,
            stderr: redact(&stderr, credentials),
        },
        other => other,
    }
}

fn git_failure(
    action: &str,
    url: &str,
    err: GitError,
    credentials: Option<&Credentials>,
) -> RepoError {
    let source = redact_git_error(err, credentials);
    let hint = source.hint();
    let message = match hint {
        Some(GitFailureHint::Authentication) => format!(
            "Authentication failed for {}. Please check your credentials",
            url
        ),
        Some(GitFailureHint::HostResolution) => format!(
            "Could not resolve host for {}. Please check the URL and network connection",
            url
        ),
        None => format!("Failed to {} repository {}", action, url),
    };
    RepoError::Git {
        message,
        hint,
        source,
    }
}

fn remove_dir(path: &Path) -> Result<(), RepoError> {
    std::fs::remove_dir_all(path).map_err(|source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Manager of cloned and local repositories.
pub struct RepositoryManager<B: GitBackend = GitCli> {
    paths: WorkspacePaths,
    backend: B,
    locks: LockTable,
    cache: RepositoryCache,
}

impl RepositoryManager<GitCli> {
    /// Create a manager that clones into `paths` with the system git.
    pub fn new(paths: WorkspacePaths, ttl: Duration, max_entries: usize) -> Self {
        Self::with_backend(paths, GitCli::new(), RepositoryCache::new(ttl, max_entries))
    }
}

impl<B: GitBackend> RepositoryManager<B> {
    pub fn with_backend(paths: WorkspacePaths, backend: B, cache: RepositoryCache) -> Self {
        Self {
            paths,
            backend,
            locks: LockTable::new(),
            cache,
        }
    }

    /// Return the workspace paths used by this manager.
    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Cached handle for `id`, or None if absent, expired or deleted from disk.
    fn cached(&self, id: &RepoId) -> Option<Arc<RepoHandle>> {
        let handle = self.cache.lookup(id)?;
        if handle.working_dir().exists() {
            return Some(handle);
        }
        log::warn!(
            "Cached clone {} vanished from {}, dropping cache entry",
            id,
            handle.working_dir().display()
        );
        self.cache.remove(id);
        None
    }

    fn store(&self, id: RepoId, url: &str, path: PathBuf) -> Arc<RepoHandle> {
        let handle = Arc::new(RepoHandle::new(id.clone(), path, url));
        self.cache.insert(id, url, Arc::clone(&handle));
        handle
    }

    /// Return a ready handle for the remote repository at `url`.
    ///
    /// This will:
    /// 1. Return the cached handle if there is a live one
    /// 2. Otherwise take the repository's lock and check the cache again
    /// 3. Open and pull an existing clone, or clone fresh
    /// 4. Delete and re-clone once if the existing clone cannot be refreshed
    pub fn get_or_clone(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<RepoHandle>, RepoError> {
        if url.trim().is_empty() {
            return Err(RepoError::InvalidInput(
                "repository URL cannot be empty".to_string(),
            ));
        }
        if let Some(credentials) = credentials {
            credentials.validate().map_err(RepoError::Validation)?;
        }

        let id = RepoId::from_url(url);

        if let Some(handle) = self.cached(&id) {
            log::debug!("Cache hit for {} ({})", url, id);
            return Ok(handle);
        }

        let lock = self.locks.lock_for(&id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        // Another caller may have finished the clone while we waited.
        if let Some(handle) = self.cached(&id) {
            log::debug!("Cache hit for {} ({}) after waiting for lock", url, id);
            return Ok(handle);
        }

        let ssh = match credentials {
            Some(Credentials::Ssh { ssh_key }) => Some(configure_ssh_access(ssh_key)?),
            _ => None,
        };
        let auth_url = build_authenticated_url(url, credentials);
        let dest = self.paths.repo_dir(&id);

        if dest.join(".git").exists() {
            match self.refresh(&dest, &auth_url, credentials, ssh.as_ref()) {
                Ok(()) => {
                    log::info!("Updated existing clone of {} ({})", url, id);
                    return Ok(self.store(id, url, dest));
                }
                Err(err) => {
                    let err = redact_git_error(err, credentials);
                    log::warn!(
                        "Existing clone of {} ({}) could not be refreshed, re-cloning: {}",
                        url,
                        id,
                        err
                    );
                    remove_dir(&dest)?;
                }
            }
        } else if dest.exists() {
            log::warn!(
                "{} is not a git repository, removing before clone",
                dest.display()
            );
            remove_dir(&dest)?;
        }

        log::info!("Cloning {} into {}", url, dest.display());
        self.backend
            .clone_repo(&auth_url, &dest, ssh.as_ref())
            .map_err(|err| git_failure("clone", url, err, credentials))?;

        Ok(self.store(id, url, dest))
    }

    fn refresh(
        &self,
        dest: &Path,
        auth_url: &str,
        credentials: Option<&Credentials>,
        ssh: Option<&SshAccess>,
    ) -> Result<(), GitError> {
        let remotes = self.backend.open(dest)?;
        let Some(remote) = remotes.first() else {
            return Ok(());
        };

        if credentials.is_some_and(Credentials::embeds_in_url) {
            self.backend.set_remote_url(dest, remote, auth_url)?;
        }

        self.backend.pull(dest, remote, ssh)
    }

    /// Open a repository already present on the local filesystem.
    ///
    /// Local repositories are never cached or locked.
    pub fn get_local(&self, path: &Path) -> Result<Arc<RepoHandle>, RepoError> {
        if !path.exists() {
            return Err(RepoError::NotFound(format!(
                "Repository path does not exist: {}",
                path.display()
            )));
        }

        let repo = open_repository(path).map_err(|err| match err {
            GitError::NotFound(_) => RepoError::InvalidInput(format!(
                "Not a valid Git repository: {}",
                path.display()
            )),
            other => git_failure("open", &path.display().to_string(), other, None),
        })?;

        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());
        let display = path.display().to_string();
        Ok(Arc::new(RepoHandle::new(
            RepoId::from_url(&display),
            root,
            &display,
        )))
    }

    /// Remove the clone of `id` together with its cache and lock entries.
    pub fn cleanup(&self, id: &RepoId) -> Result<(), RepoError> {
        self.cache.remove(id);

        let dir = self.paths.repo_dir(id);
        let lock = self.locks.lock_for(id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            if dir.exists() { remove_dir(&dir) } else { Ok(()) }
        };
        drop(lock);
        self.locks.remove(id);

        if result.is_ok() {
            log::info!("Removed workspace {}", id);
        }
        result
    }

    /// Remove every clone in the workspace, returning how many were removed.
    ///
    /// Failures are logged and skipped. The handle cache and the lock table
    /// are cleared afterwards, even when the workspace cannot be read.
    pub fn cleanup_all(&self) -> usize {
        let root = self.paths.root();
        let removed = match std::fs::read_dir(root) {
            Ok(entries) => self.remove_workspaces(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                log::warn!("Failed to read workspace {}: {}", root.display(), e);
                0
            }
        };

        let evicted = self.cache.clear();
        self.locks.clear();
        log::info!(
            "Removed {} workspaces, dropped {} cached handles",
            removed,
            evicted
        );
        removed
    }

    fn remove_workspaces(&self, entries: std::fs::ReadDir) -> usize {
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let id = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<RepoId>().ok());
            let lock = id.as_ref().map(|id| self.locks.lock_for(id));
            let _guard = lock
                .as_ref()
                .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()));

            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached handle without touching the disk.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &RepositoryCache {
        &self.cache
    }
}
