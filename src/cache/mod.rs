//! Repository access and caching

mod credentials;
mod git;
mod handles;
mod lock;
mod paths;
mod repo;

pub use credentials::{
    CredentialError, Credentials, SshAccess, build_authenticated_url, configure_ssh_access, redact,
};
pub use git::{GitBackend, GitCli, GitError, GitFailureHint, GitOp, git_available, open_repository};
pub use handles::{CacheStats, RepositoryCache};
pub use lock::WorkspaceLock;
pub use paths::WorkspacePaths;
pub use repo::{RepoError, RepoHandle, RepositoryManager};
