//! Working-tree change detection.

use std::collections::HashSet;

use git2::{Repository, Status, StatusOptions};

use crate::cache::GitError;

/// Files changed since the last commit, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    /// `(old, new)` path pairs.
    pub renamed: Vec<(String, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
            && self.added.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    pub fn total_files(&self) -> usize {
        self.modified.len() + self.added.len() + self.deleted.len() + self.renamed.len()
    }

    /// Copy of this set without any entry that mentions `path`.
    pub fn exclude_file(&self, path: &str) -> ChangeSet {
        let keep = |f: &&String| f.as_str() != path;
        ChangeSet {
            modified: self.modified.iter().filter(keep).cloned().collect(),
            added: self.added.iter().filter(keep).cloned().collect(),
            deleted: self.deleted.iter().filter(keep).cloned().collect(),
            renamed: self
                .renamed
                .iter()
                .filter(|(old, new)| old != path && new != path)
                .cloned()
                .collect(),
        }
    }

    /// Paths touched by the change, using the new name of renamed files.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.modified
            .iter()
            .chain(&self.added)
            .chain(&self.deleted)
            .map(String::as_str)
            .chain(self.renamed.iter().map(|(_, new)| new.as_str()))
    }
}

const RENAMED: Status = Status::INDEX_RENAMED.union(Status::WT_RENAMED);
const DELETED: Status = Status::INDEX_DELETED.union(Status::WT_DELETED);
const ADDED: Status = Status::INDEX_NEW.union(Status::WT_NEW);
const MODIFIED: Status = Status::INDEX_MODIFIED
    .union(Status::WT_MODIFIED)
    .union(Status::INDEX_TYPECHANGE)
    .union(Status::WT_TYPECHANGE);

/// Detects staged, unstaged and untracked changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeTracker;

impl ChangeTracker {
    /// Collect every change between HEAD, the index and the working tree.
    ///
    /// Each path is reported once. When a file carries several statuses the
    /// first match in rename, delete, add, modify order wins.
    pub fn changes(&self, repo: &Repository) -> Result<ChangeSet, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .exclude_submodules(true)
            .renames_head_to_index(true)
            .renames_index_to_workdir(true);

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut changes = ChangeSet::default();
        let mut seen: HashSet<String> = HashSet::new();

        for entry in statuses.iter() {
            let status = entry.status();

            if status.intersects(RENAMED) {
                let delta = entry.head_to_index().or_else(|| entry.index_to_workdir());
                let paths = delta.and_then(|d| {
                    let old = d.old_file().path()?.to_str()?.to_string();
                    let new = d.new_file().path()?.to_str()?.to_string();
                    Some((old, new))
                });
                if let Some((old, new)) = paths {
                    if !seen.contains(&old) && !seen.contains(&new) {
                        seen.insert(old.clone());
                        seen.insert(new.clone());
                        changes.renamed.push((old, new));
                    }
                    continue;
                }
            }

            let Some(path) = entry.path().map(str::to_string) else {
                log::debug!("Skipping status entry with a non UTF-8 path");
                continue;
            };
            if seen.contains(&path) {
                continue;
            }

            let bucket = if status.intersects(DELETED) {
                &mut changes.deleted
            } else if status.intersects(ADDED) {
                &mut changes.added
            } else if status.intersects(MODIFIED) {
                &mut changes.modified
            } else {
                continue;
            };
            seen.insert(path.clone());
            bucket.push(path);
        }

        Ok(changes)
    }
}
