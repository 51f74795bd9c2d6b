//! Conventional Commit message generation.
//!
//! The commit type is chosen by scoring every changed path against a table of
//! extension, directory and file-name patterns. The scope is the most common
//! top-level directory, and the description is built from the type plus
//! keywords found in the diff.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path};

use git2::{DiffFormat, DiffOptions, Repository};

use super::changes::ChangeSet;

/// Upper bound on diff text scanned for keywords.
const MAX_DIFF_BYTES: usize = 256 * 1024;

/// Conventional Commit types, highest tie-break priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitType {
    Feat,
    Fix,
    Docs,
    Refactor,
    Test,
    Style,
    Chore,
}

impl CommitType {
    const BY_PRIORITY: [CommitType; 7] = [
        CommitType::Feat,
        CommitType::Fix,
        CommitType::Docs,
        CommitType::Refactor,
        CommitType::Test,
        CommitType::Style,
        CommitType::Chore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Docs => "docs",
            CommitType::Refactor => "refactor",
            CommitType::Test => "test",
            CommitType::Style => "style",
            CommitType::Chore => "chore",
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TypePattern {
    commit_type: CommitType,
    extensions: &'static [&'static str],
    dirs: &'static [&'static str],
    files: &'static [&'static str],
}

const TYPE_PATTERNS: &[TypePattern] = &[
    TypePattern {
        commit_type: CommitType::Docs,
        extensions: &["md", "txt", "rst", "adoc"],
        dirs: &["docs/", "doc/", "documentation/"],
        files: &["README.md", "CHANGELOG.md", "LICENSE", "CONTRIBUTING.md"],
    },
    TypePattern {
        commit_type: CommitType::Test,
        extensions: &[],
        dirs: &["test/", "tests/", "__tests__/", "spec/", "specs/"],
        files: &[],
    },
    TypePattern {
        commit_type: CommitType::Chore,
        extensions: &["json", "yaml", "yml", "toml", "ini", "cfg"],
        dirs: &[".github/", ".gitlab/", "config/", "configs/"],
        files: &[
            "Cargo.toml",
            "Cargo.lock",
            "pyproject.toml",
            "setup.py",
            "package.json",
            "Makefile",
            ".gitignore",
        ],
    },
    TypePattern {
        commit_type: CommitType::Style,
        extensions: &["css", "scss", "sass", "less"],
        dirs: &["styles/", "css/", "assets/"],
        files: &[],
    },
];

/// Diff keyword groups, in reporting order.
const KEYWORD_GROUPS: &[(&str, &[&str])] = &[
    ("caching", &["cache", "cached", "caching", "ttl", "evict"]),
    ("authentication", &["auth", "token", "credential", "login", "password"]),
    ("logging", &["log", "logger", "logging"]),
    ("configuration", &["config", "setting", "option"]),
    ("error handling", &["error", "exception", "try", "catch", "raise"]),
    ("testing", &["test", "assert", "mock", "fixture"]),
    ("documentation", &["doc", "readme", "comment"]),
    ("API", &["endpoint", "route", "api", "request", "response"]),
    ("database", &["db", "database", "query", "sql"]),
    ("performance", &["optimize", "performance", "speed", "fast"]),
    ("security", &["security", "secure", "vulnerability", "sanitize"]),
    ("validation", &["validate", "validation", "check", "verify"]),
    ("refactoring", &["refactor", "restructure", "reorganize"]),
    ("bug fix", &["fix", "bug", "issue", "problem", "resolve"]),
];

const DEFINITION_WORDS: &[&str] = &["fn", "def", "class", "struct", "enum", "trait"];
const SOURCE_DIRS: &[&str] = &["src/", "lib/", "app/", "core/"];
const SCOPE_PARENTS: &[&str] = &["src", "lib", "app", "core", "pkg"];
const NON_SCOPES: &[&str] = &["test", "tests", "docs", "doc", "__pycache__", ".git"];

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

fn humanized_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .replace(['_', '-'], " ")
}

fn plural_files(n: usize) -> String {
    format!("{} file{}", n, if n == 1 { "" } else { "s" })
}

/// Keywords describing a diff: up to two topic groups and new definitions,
/// at most three in total.
pub fn keywords_in(diff: &str) -> Vec<String> {
    let lower = diff.to_lowercase();
    let mut keywords: Vec<String> = KEYWORD_GROUPS
        .iter()
        .filter(|(_, terms)| terms.iter().any(|t| lower.contains(t)))
        .map(|(name, _)| name.to_string())
        .collect();

    let definitions = diff
        .lines()
        .filter_map(|line| line.strip_prefix('+'))
        .filter(|line| !line.starts_with("++"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            tokens.windows(2).find_map(|w| {
                if !DEFINITION_WORDS.contains(&w[0]) {
                    return None;
                }
                let name: String = w[1]
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                (!name.is_empty()).then_some(name)
            })
        })
        .take(2);
    keywords.extend(definitions);

    keywords.truncate(3);
    keywords
}

/// Added and removed lines between HEAD and the working tree, untracked
/// files included.
fn diff_text(repo: &Repository) -> Result<String, git2::Error> {
    let head_tree = match repo.head() {
        Ok(head) => Some(head.peel_to_tree()?),
        Err(_) => None,
    };

    let mut opts = DiffOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show_untracked_content(true)
        .context_lines(0);
    let diff = repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?;

    let mut text = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if text.len() < MAX_DIFF_BYTES && matches!(line.origin(), '+' | '-') {
            text.push(line.origin());
            text.push_str(&String::from_utf8_lossy(line.content()));
        }
        true
    })?;
    Ok(text)
}

/// Builds Conventional Commit messages from a change set.
#[derive(Debug, Clone)]
pub struct MessageGenerator {
    max_bullet_points: usize,
    max_summary_lines: usize,
}

impl MessageGenerator {
    pub fn new(max_bullet_points: usize, max_summary_lines: usize) -> Self {
        Self {
            max_bullet_points,
            max_summary_lines: max_summary_lines.max(1),
        }
    }

    /// Generate a message, reading diff keywords from `repo`.
    pub fn generate(&self, changes: &ChangeSet, repo: &Repository) -> String {
        let keywords = match diff_text(repo) {
            Ok(diff) => keywords_in(&diff),
            Err(e) => {
                log::debug!("Diff analysis failed, continuing without keywords: {}", e);
                Vec::new()
            }
        };
        self.generate_with_keywords(changes, &keywords)
    }

    pub fn generate_with_keywords(&self, changes: &ChangeSet, keywords: &[String]) -> String {
        let commit_type = self.detect_type(changes, keywords);
        let header = match self.scope(changes) {
            Some(scope) => format!("{}({}): ", commit_type, scope),
            None => format!("{}: ", commit_type),
        };

        let description = self.description(changes, commit_type, keywords);
        let summary: Vec<&str> = description.lines().take(self.max_summary_lines).collect();

        let mut message = header + &summary.join("\n");
        let bullets = self.bullets(changes);
        if !bullets.is_empty() {
            message.push_str("\n\n");
            message.push_str(&bullets.join("\n"));
        }
        message
    }

    pub fn detect_type(&self, changes: &ChangeSet, keywords: &[String]) -> CommitType {
        let mut scores: HashMap<CommitType, i64> = HashMap::new();

        for path in changes.all_paths() {
            let lower = path.to_lowercase();
            let ext = Path::new(path).extension().and_then(|e| e.to_str());
            let name = file_name(path);

            for pattern in TYPE_PATTERNS {
                let mut score = 0;
                if ext.is_some_and(|ext| pattern.extensions.contains(&ext)) {
                    score += 1;
                }
                for dir in pattern.dirs {
                    if lower.starts_with(dir) || lower.contains(&format!("/{}", dir)) {
                        score += 2;
                    }
                }
                if pattern.files.contains(&name) {
                    score += 2;
                }
                *scores.entry(pattern.commit_type).or_default() += score;
            }
        }

        for path in &changes.added {
            let lower = path.to_lowercase();
            let in_source = SOURCE_DIRS.iter().any(|dir| lower.contains(dir));
            let auxiliary = ["test", "spec", "doc"].iter().any(|w| lower.contains(w));
            if in_source && !auxiliary {
                *scores.entry(CommitType::Feat).or_default() += 3;
            }
        }

        if !changes.modified.is_empty() && changes.added.is_empty() && changes.deleted.is_empty() {
            *scores.entry(CommitType::Refactor).or_default() += 1;
            if keywords.iter().any(|k| k == "bug fix") {
                *scores.entry(CommitType::Fix).or_default() += 2;
            }
        }

        let touched = changes.modified.iter().chain(&changes.added);
        let (source, tests) = touched.fold((0, 0), |(source, tests), path| {
            let lower = path.to_lowercase();
            let is_test = lower.contains("test");
            let is_source = !is_test && ["src/", "lib/", "app/"].iter().any(|d| lower.contains(d));
            (source + is_source as usize, tests + is_test as usize)
        });
        if source > 0 && source >= tests {
            let test = scores.entry(CommitType::Test).or_default();
            *test = (*test - 2).max(0);
        }

        let best = scores.values().copied().max().unwrap_or(0);
        if best == 0 {
            return CommitType::Chore;
        }
        CommitType::BY_PRIORITY
            .into_iter()
            .find(|t| scores.get(t).copied().unwrap_or(0) == best)
            .unwrap_or(CommitType::Chore)
    }

    /// Most common first-level directory, or the second level below a source
    /// root such as `src/`.
    pub fn scope(&self, changes: &ChangeSet) -> Option<String> {
        let mut counts: Vec<(String, usize)> = Vec::new();

        for path in changes.all_paths() {
            let parts: Vec<&str> = Path::new(path)
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => part.to_str(),
                    _ => None,
                })
                .collect();
            if parts.len() <= 1 {
                continue;
            }

            let scope = if SCOPE_PARENTS.contains(&parts[0]) && parts.len() > 2 {
                parts[1]
            } else {
                parts[0]
            };
            if NON_SCOPES.contains(&scope) {
                continue;
            }

            match counts.iter_mut().find(|(s, _)| s == scope) {
                Some((_, n)) => *n += 1,
                None => counts.push((scope.to_string(), 1)),
            }
        }

        let best = counts.iter().map(|(_, n)| *n).max()?;
        counts
            .into_iter()
            .find(|(_, n)| *n == best)
            .map(|(scope, _)| scope.replace(['_', ' '], "-").to_lowercase())
    }

    fn description(&self, changes: &ChangeSet, commit_type: CommitType, keywords: &[String]) -> String {
        let total = changes.total_files();
        match commit_type {
            CommitType::Feat => {
                if !keywords.is_empty() {
                    format!("Implement {}", keywords[..keywords.len().min(2)].join(", "))
                } else if let Some(first) = changes.added.first() {
                    let name = humanized_stem(first);
                    match changes.added.len() {
                        1 => format!("Add {}", name),
                        n => format!("Add {} and {} more", name, n - 1),
                    }
                } else {
                    "Add new functionality".to_string()
                }
            }
            CommitType::Fix => {
                if !keywords.is_empty() {
                    format!("Fix {}", keywords[..keywords.len().min(2)].join(" "))
                } else {
                    format!("Fix issues in {}", plural_files(total))
                }
            }
            CommitType::Docs => match keywords.first() {
                Some(k) => format!("Update documentation for {}", k),
                None => "Update documentation".to_string(),
            },
            CommitType::Test => match keywords.first() {
                Some(k) if !keywords.iter().any(|k| k == "testing") => {
                    format!("Add tests for {}", k)
                }
                _ => "Update tests".to_string(),
            },
            CommitType::Style => "Update styles".to_string(),
            CommitType::Refactor => {
                if !keywords.is_empty() {
                    format!("Refactor {}", keywords[..keywords.len().min(2)].join(" and "))
                } else {
                    let names: Vec<String> = changes
                        .modified
                        .iter()
                        .take(2)
                        .map(|p| humanized_stem(p))
                        .collect();
                    match names.as_slice() {
                        [one] => format!("Refactor {}", one),
                        [a, b] => format!("Refactor {} and {}", a, b),
                        _ => format!("Refactor {}", plural_files(total)),
                    }
                }
            }
            CommitType::Chore => {
                let dependency_manifest = changes.modified.iter().chain(&changes.added).any(|p| {
                    let name = file_name(p).to_lowercase();
                    name.contains("package") || name.contains("pyproject") || name.starts_with("cargo.")
                });
                if dependency_manifest {
                    "Update dependencies".to_string()
                } else if let Some(k) = keywords.first() {
                    format!("Update {}", k)
                } else {
                    "Update configuration".to_string()
                }
            }
        }
    }

    /// One line per file: additions, then removals, renames and updates.
    pub fn bullets(&self, changes: &ChangeSet) -> Vec<String> {
        let added = changes.added.iter().map(|p| format!("- Add {}", file_name(p)));
        let deleted = changes
            .deleted
            .iter()
            .map(|p| format!("- Remove {}", file_name(p)));
        let renamed = changes
            .renamed
            .iter()
            .map(|(old, new)| format!("- Rename {} to {}", file_name(old), file_name(new)));
        let modified = changes
            .modified
            .iter()
            .map(|p| format!("- Update {}", file_name(p)));

        added
            .chain(deleted)
            .chain(renamed)
            .chain(modified)
            .take(self.max_bullet_points)
            .collect()
    }
}
