//! Credential handling for remote repositories.
//!
//! Credentials arrive per request and are turned into one of two things:
//! an authenticated HTTPS URL, or an [`SshAccess`] value that is handed to
//! each git invocation as its own `GIT_SSH_COMMAND`. Nothing here touches
//! process-wide state, so concurrent SSH and HTTPS operations cannot step on
//! each other.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned while validating or resolving credentials.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// A required field of the declared credential variant is missing.
    #[error("{0}")]
    Missing(&'static str),
    /// The SSH key file does not exist.
    #[error("SSH key file not found: {}", .0.display())]
    KeyNotFound(PathBuf),
    /// The SSH key path exists but is not a regular file.
    #[error("SSH key path is not a file: {}", .0.display())]
    KeyNotAFile(PathBuf),
}

/// Credentials for a remote repository.
///
/// Carried in the `credentials` object of a request, tagged by
/// `auth_type`. Missing fields default to empty so that [`validate`] rejects
/// them with a clear message instead of a parse error.
///
/// [`validate`]: Credentials::validate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "lowercase")]
pub enum Credentials {
    Ssh {
        #[serde(default)]
        ssh_key: PathBuf,
    },
    Https {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Token {
        #[serde(default)]
        token: String,
    },
}

impl Credentials {
    /// Check that every field required by the variant is present.
    pub fn validate(&self) -> Result<(), CredentialError> {
        match self {
            Credentials::Ssh { ssh_key } if ssh_key.as_os_str().is_empty() => Err(
                CredentialError::Missing("SSH authentication requires ssh_key"),
            ),
            Credentials::Https { username, password }
                if username.is_empty() || password.is_empty() =>
            {
                Err(CredentialError::Missing(
                    "HTTPS authentication requires username and password",
                ))
            }
            Credentials::Token { token } if token.is_empty() => Err(CredentialError::Missing(
                "Token authentication requires token",
            )),
            _ => Ok(()),
        }
    }

    /// Short name of the variant, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Ssh { .. } => "ssh",
            Credentials::Https { .. } => "https",
            Credentials::Token { .. } => "token",
        }
    }

    /// Whether these credentials are carried inside the remote URL.
    pub fn embeds_in_url(&self) -> bool {
        matches!(self, Credentials::Https { .. } | Credentials::Token { .. })
    }

    /// Secret values that must never appear in logs or error messages.
    pub fn secrets(&self) -> Vec<&str> {
        match self {
            Credentials::Ssh { .. } => Vec::new(),
            Credentials::Https { password, .. } => vec![password.as_str()],
            Credentials::Token { token } => vec![token.as_str()],
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Ssh { ssh_key } => f
                .debug_struct("Ssh")
                .field("ssh_key", ssh_key)
                .finish(),
            Credentials::Https { username, .. } => f
                .debug_struct("Https")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Token { .. } => f.debug_struct("Token").field("token", &"***").finish(),
        }
    }
}

/// Build the URL used for clone and pull.
///
/// Only `http://` and `https://` URLs are rewritten; SSH remotes authenticate
/// with a key file and are returned unchanged, as is every URL when no
/// credentials are given. The result may contain secrets and must not be
/// logged.
pub fn build_authenticated_url(url: &str, credentials: Option<&Credentials>) -> String {
    let Some(credentials) = credentials else {
        return url.to_string();
    };

    let (scheme, rest) = if let Some(rest) = url.strip_prefix("https://") {
        ("https://", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        ("http://", rest)
    } else {
        return url.to_string();
    };

    match credentials {
        Credentials::Https { username, password } if !username.is_empty() && !password.is_empty() => {
            format!("{scheme}{username}:{password}@{rest}")
        }
        Credentials::Token { token } if !token.is_empty() => format!("{scheme}{token}@{rest}"),
        _ => url.to_string(),
    }
}

/// Replace every secret of `credentials` found in `text` with `***`.
pub fn redact(text: &str, credentials: Option<&Credentials>) -> String {
    let mut text = text.to_string();
    if let Some(credentials) = credentials {
        for secret in credentials.secrets() {
            if !secret.is_empty() {
                text = text.replace(secret, "***");
            }
        }
    }
    text
}

/// A validated SSH key to use for one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAccess {
    key_path: PathBuf,
}

impl SshAccess {
    /// Path of the private key.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Value for `GIT_SSH_COMMAND`.
    ///
    /// Git hands this string to `sh -c`, so the key path is single-quoted.
    /// Host key verification is disabled because the daemon runs unattended
    /// and has no way to answer the first-connection prompt.
    pub fn ssh_command(&self) -> String {
        format!(
            "ssh -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
            shell_quote(&self.key_path.to_string_lossy())
        )
    }
}

/// Quote `value` as one POSIX shell word.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Check that `key_path` names a regular file and wrap it for git.
pub fn configure_ssh_access(key_path: &Path) -> Result<SshAccess, CredentialError> {
    if !key_path.exists() {
        return Err(CredentialError::KeyNotFound(key_path.to_path_buf()));
    }

    if !key_path.is_file() {
        return Err(CredentialError::KeyNotAFile(key_path.to_path_buf()));
    }

    Ok(SshAccess {
        key_path: key_path.to_path_buf(),
    })
}
