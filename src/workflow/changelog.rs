//! Changelog maintenance.
//!
//! Entries are written newest first under the `## [Unreleased]` heading:
//!
//! ```text
//! ### 2024-05-01 14:03:22 - 1a2b3c4 [PUSHED]
//!
//! feat(cache): Add lock
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

const UNRELEASED_MARKER: &str = "## [Unreleased]";

const TEMPLATE: &str = "# Changelog\n\
\n\
All notable changes to this project will be documented in this file.\n\
\n\
## [Unreleased]\n";

/// Writes commit entries into a changelog file inside a repository.
#[derive(Debug, Clone)]
pub struct Changelog {
    file_name: String,
}

impl Changelog {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.file_name)
    }

    /// Create the changelog from the template if it does not exist.
    pub fn create_if_missing(&self, repo_root: &Path) -> io::Result<()> {
        let path = self.path(repo_root);
        if !path.exists() {
            fs::write(&path, TEMPLATE)?;
        }
        Ok(())
    }

    /// Record a commit, stamped with the local time.
    pub fn record(
        &self,
        repo_root: &Path,
        commit_hash: &str,
        message: &str,
        pushed: bool,
    ) -> io::Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.record_at(repo_root, &timestamp, commit_hash, message, pushed)
    }

    fn record_at(
        &self,
        repo_root: &Path,
        timestamp: &str,
        commit_hash: &str,
        message: &str,
        pushed: bool,
    ) -> io::Result<()> {
        self.create_if_missing(repo_root)?;
        let path = self.path(repo_root);
        let content = fs::read_to_string(&path)?;
        let entry = format_entry(timestamp, commit_hash, message, pushed);
        fs::write(&path, insert_entry(&content, &entry))
    }
}

fn format_entry(timestamp: &str, commit_hash: &str, message: &str, pushed: bool) -> String {
    let short: String = commit_hash.chars().take(7).collect();
    let status = if pushed { "[PUSHED]" } else { "[LOCAL]" };
    format!("### {} - {} {}\n\n{}", timestamp, short, status, message.trim_end())
}

/// Place `entry` right below the unreleased heading, or at the end.
fn insert_entry(content: &str, entry: &str) -> String {
    match content.split_once(UNRELEASED_MARKER) {
        Some((before, after)) => {
            let rest = after.trim_start_matches(['\r', '\n']);
            if rest.is_empty() {
                format!("{}{}\n\n{}\n", before, UNRELEASED_MARKER, entry)
            } else {
                format!("{}{}\n\n{}\n\n{}", before, UNRELEASED_MARKER, entry, rest)
            }
        }
        None => format!("{}\n\n{}\n", content.trim_end_matches('\n'), entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_template_when_missing() {
        let dir = tempdir().unwrap();
        let changelog = Changelog::new("CHANGELOG.md");

        changelog.create_if_missing(dir.path()).unwrap();
        let content = fs::read_to_string(dir.path().join("CHANGELOG.md")).unwrap();
        assert!(content.starts_with("# Changelog\n"));
        assert!(content.contains("## [Unreleased]"));
    }

    #[test]
    fn create_if_missing_keeps_existing_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("CHANGELOG.md"), "custom\n").unwrap();

        Changelog::new("CHANGELOG.md")
            .create_if_missing(dir.path())
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("CHANGELOG.md")).unwrap(),
            "custom\n"
        );
    }

    #[test]
    fn entries_are_newest_first_and_separated() {
        let dir = tempdir().unwrap();
        let changelog = Changelog::new("CHANGELOG.md");

        changelog
            .record_at(dir.path(), "2024-01-01 10:00:00", "aaaaaaaaaa", "feat: first", false)
            .unwrap();
        changelog
            .record_at(dir.path(), "2024-01-02 10:00:00", "bbbbbbbbbb", "fix: second", true)
            .unwrap();

        let content = fs::read_to_string(dir.path().join("CHANGELOG.md")).unwrap();
        let expected = "# Changelog\n\
\n\
All notable changes to this project will be documented in this file.\n\
\n\
## [Unreleased]\n\
\n\
### 2024-01-02 10:00:00 - bbbbbbb [PUSHED]\n\
\n\
fix: second\n\
\n\
### 2024-01-01 10:00:00 - aaaaaaa [LOCAL]\n\
\n\
feat: first\n";
        assert_eq!(content, expected);
    }

    #[test]
    fn appends_when_marker_is_missing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("HISTORY.md"), "# History\n\n").unwrap();
        let changelog = Changelog::new("HISTORY.md");

        changelog
            .record_at(dir.path(), "2024-01-01 10:00:00", "abcdef123", "chore: x", true)
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("HISTORY.md")).unwrap(),
            "# History\n\n### 2024-01-01 10:00:00 - abcdef1 [PUSHED]\n\nchore: x\n"
        );
    }

    #[test]
    fn record_uses_local_timestamp_format() {
        let dir = tempdir().unwrap();
        Changelog::new("CHANGELOG.md")
            .record(dir.path(), "0123456789", "docs: y", false)
            .unwrap();

        let content = fs::read_to_string(dir.path().join("CHANGELOG.md")).unwrap();
        let heading = content
            .lines()
            .find(|l| l.starts_with("### "))
            .unwrap();
        // "### YYYY-MM-DD HH:MM:SS - 0123456 [LOCAL]"
        assert_eq!(heading.len(), 4 + 19 + 3 + 7 + 8);
        assert!(heading.ends_with(" - 0123456 [LOCAL]"));
    }
}
