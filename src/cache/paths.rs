//! Workspace directory layout
//!
//! ```text
//! ~/.cache/gitpilot/workspaces/
//! ├── .daemon.lock                  # flock held by the running daemon
//! ├── 3f2a9c0d1e4b5a67/             # clone of one remote, named by RepoId
//! └── 9b8e7d6c5a4f3e21/
//! ```

use std::path::{Path, PathBuf};

use crate::types::RepoId;

/// Name of the daemon's lock file inside the workspace.
pub const DAEMON_LOCK_FILE: &str = ".daemon.lock";

/// Manages the filesystem paths of the workspace
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// Creates a new WorkspacePaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the clone directory for a repository: `{root}/{id}`
    pub fn repo_dir(&self, id: &RepoId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Returns the daemon lock file path: `{root}/.daemon.lock`
    pub fn daemon_lock_path(&self) -> PathBuf {
        self.root.join(DAEMON_LOCK_FILE)
    }
}

impl Default for WorkspacePaths {
    /// Creates a WorkspacePaths under the system cache directory
    ///
    /// Uses `dirs::cache_dir()` which resolves to:
    /// - Linux: `~/.cache`
    /// - macOS: `~/Library/Caches`
    /// - Windows: `C:\Users\<user>\AppData\Local`
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        Self::new(cache_dir.join("gitpilot").join("workspaces"))
    }
}
