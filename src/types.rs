//! Shared types for gitpilot

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of hex characters kept from the URL digest.
pub const REPO_ID_LEN: usize = 16;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid character in value: {0}")]
    InvalidCharacter(char),
}

/// Stable identifier for a repository URL.
///
/// The first 16 hex characters of the SHA-256 digest of the URL string. It is
/// the key of the handle cache, the key of the lock table and the name of the
/// repository's directory inside the workspace, so it must stay
/// filesystem-safe: parsing only accepts lowercase hex of the exact length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(String);

impl RepoId {
    /// Derive the identity of a repository URL (or local path string).
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self(hex::encode(&digest[..REPO_ID_LEN / 2]))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RepoId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        if s.len() != REPO_ID_LEN {
            return Err(ParseError::InvalidLength {
                expected: REPO_ID_LEN,
                actual: s.len(),
            });
        }

        for c in s.chars() {
            if !matches!(c, '0'..='9' | 'a'..='f') {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_url_yields_same_id() {
        let a = RepoId::from_url("https://github.com/octocat/Hello-World.git");
        let b = RepoId::from_url("https://github.com/octocat/Hello-World.git");
        assert_eq!(a, b);
    }

    #[test]
    fn id_is_fixed_width_lowercase_hex() {
        let id = RepoId::from_url("git@github.com:octocat/Hello-World.git");
        assert_eq!(id.as_str().len(), REPO_ID_LEN);
        assert!(id.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn id_matches_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(RepoId::from_url("abc").as_str(), "ba7816bf8f01cfea");
    }

    #[test]
    fn distinct_urls_yield_distinct_ids() {
        let urls = [
            "https://github.com/octocat/Hello-World.git",
            "https://github.com/octocat/Hello-World",
            "git@github.com:octocat/Hello-World.git",
            "https://gitlab.com/octocat/Hello-World.git",
            "https://github.com/rust-lang/rust.git",
            "https://github.com/rust-lang/cargo.git",
            "/home/user/projects/local-repo",
        ];
        let mut ids: Vec<RepoId> = urls.iter().map(|u| RepoId::from_url(u)).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), urls.len());
    }

    #[test]
    fn parse_round_trips_display() {
        let id = RepoId::from_url("https://example.com/repo.git");
        let parsed: RepoId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_path_traversal() {
        // Exactly 16 characters, so it is the character check that rejects it.
        assert_eq!(
            "../../etc/passwd".parse::<RepoId>(),
            Err(ParseError::InvalidCharacter('.'))
        );
        assert_eq!(
            "../x".parse::<RepoId>(),
            Err(ParseError::InvalidLength {
                expected: REPO_ID_LEN,
                actual: 4
            })
        );
    }

    #[test]
    fn parse_rejects_empty_and_uppercase() {
        assert_eq!("".parse::<RepoId>(), Err(ParseError::Empty));
        assert_eq!(
            "ABCDEF0123456789".parse::<RepoId>(),
            Err(ParseError::InvalidCharacter('A'))
        );
    }
}
