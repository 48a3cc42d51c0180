//! Git commit history.
//!
//! [`GitLog`] reads commits by shelling out to `git`. Remote repositories
//! (`https://`, `ssh://`, `git@`) are cloned into a cache directory keyed by a
//! short SHA-256 of the URL and refreshed on later runs.
//!
//! [`GitCommitProcessor`] cleans commit messages; [`GitFetcher`] produces
//! `commit hash → {message, index, ticket_number?}`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{FactoryError, FetchError, ProcessError};
use crate::fetcher::{FetchPipeline, FetcherKind};
use crate::models::ResultMapping;
use crate::processor::{truncate_with_ellipsis, Processor};

pub const DEFAULT_TICKET_PATTERN: &str = r"([A-Z]+-\d+|#\d+)";

/// Field and record separators for `git log --format`.
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// A raw commit as read from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    #[serde(default)]
    pub hash: String,
    pub message: String,
}

impl CommitRecord {
    pub fn new(hash: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedCommit {
    pub hash: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_number: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Log reader
// ═══════════════════════════════════════════════════════════════════════

/// Which commits to read, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommitSelection {
    #[default]
    All,
    /// `[start, end)` positions in the log. `end: None` reads to the oldest commit.
    Range { start: usize, end: Option<usize> },
    /// Commits whose hash starts with this prefix.
    Hash(String),
}

impl CommitSelection {
    /// Log position of the first selected commit. Hash matches count from 0.
    pub fn offset(&self) -> usize {
        match self {
            CommitSelection::Range { start, .. } => *start,
            CommitSelection::All | CommitSelection::Hash(_) => 0,
        }
    }

    pub fn range(start: Option<usize>, end: Option<usize>) -> Result<Self, ProcessError> {
        match (start, end) {
            (None, None) => Ok(CommitSelection::All),
            (start, end) => {
                let start = start.unwrap_or(0);
                if let Some(end) = end {
                    if start >= end {
                        return Err(ProcessError::InvalidRange { start, end });
                    }
                }
                Ok(CommitSelection::Range { start, end })
            }
        }
    }
}

pub struct GitLog {
    cache_dir: PathBuf,
}

impl GitLog {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Local working directory for `source`, cloning or updating remotes.
    pub fn resolve(&self, source: &str) -> Result<PathBuf, FetchError> {
        if is_remote(source) {
            let dest = self.cache_dir.join(short_hash(source));
            if dest.join(".git").exists() {
                git_pull(&dest).map_err(|e| FetchError::unavailable(source, e))?;
            } else {
                git_clone(source, &dest).map_err(|e| FetchError::unavailable(source, e))?;
            }
            return Ok(dest);
        }

        let path = PathBuf::from(source);
        if !path.is_dir() {
            return Err(FetchError::unavailable(source, "repository path does not exist"));
        }
        run_git(&path, &["rev-parse", "--git-dir"])
            .map_err(|e| FetchError::unavailable(source, format!("not a git repository: {e}")))?;
        Ok(path)
    }

    pub fn commits(
        &self,
        repo: &Path,
        selection: &CommitSelection,
    ) -> Result<Vec<CommitRecord>, FetchError> {
        let format = format!("--format=%H{FIELD_SEP}%B{RECORD_SEP}");
        let mut args: Vec<String> = vec!["log".into(), format];
        if let CommitSelection::Range { start, end } = selection {
            args.push(format!("--skip={start}"));
            if let Some(end) = end {
                args.push(format!("--max-count={}", end - start));
            }
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = run_git(repo, &arg_refs)
            .map_err(|e| FetchError::unavailable(repo.display().to_string(), e))?;

        let mut commits: Vec<CommitRecord> = stdout
            .split(RECORD_SEP)
            .filter_map(|record| {
                let record = record.trim_start_matches('\n');
                let (hash, message) = record.split_once(FIELD_SEP)?;
                Some(CommitRecord::new(hash.trim(), message))
            })
            .collect();

        if let CommitSelection::Hash(prefix) = selection {
            commits.retain(|c| c.hash.starts_with(prefix.as_str()));
            if commits.is_empty() {
                return Err(FetchError::unavailable(
                    repo.display().to_string(),
                    format!("no commit matches hash {prefix}"),
                ));
            }
        }
        Ok(commits)
    }

    pub fn count(&self, repo: &Path) -> Result<usize, FetchError> {
        let stdout = run_git(repo, &["rev-list", "--count", "HEAD"])
            .map_err(|e| FetchError::unavailable(repo.display().to_string(), e))?;
        stdout
            .trim()
            .parse()
            .map_err(|e| FetchError::unavailable(repo.display().to_string(), e))
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("https://")
        || source.starts_with("http://")
        || source.starts_with("ssh://")
        || source.starts_with("git@")
}

fn run_git(repo: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| format!("failed to execute git: {e}. Is git installed?"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {} failed: {}", args[0], stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn git_clone(url: &str, dest: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dest)
        .map_err(|e| format!("failed to create cache directory {}: {e}", dest.display()))?;
    tracing::info!(url, dest = %dest.display(), "cloning repository");
    let output = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .output()
        .map_err(|e| format!("failed to execute 'git clone': {e}. Is git installed?"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git clone failed: {}", stderr.trim()));
    }
    Ok(())
}

fn git_pull(repo: &Path) -> Result<(), String> {
    tracing::info!(repo = %repo.display(), "updating cached clone");
    run_git(repo, &["pull", "--ff-only"]).map(|_| ())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Processor
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct GitCommitProcessor {
    extract_ticket_number: bool,
    max_length: usize,
    capitalize_first_word: bool,
    ticket_pattern: Regex,
}

impl GitCommitProcessor {
    pub fn new(
        extract_ticket_number: bool,
        max_length: usize,
        capitalize_first_word: bool,
        ticket_pattern: &str,
    ) -> Result<Self, FactoryError> {
        if max_length == 0 {
            return Err(FactoryError::InvalidOption {
                name: "max_length",
                reason: "must be > 0".into(),
            });
        }
        let ticket_pattern = Regex::new(ticket_pattern).map_err(|e| FactoryError::InvalidOption {
            name: "ticket_pattern",
            reason: e.to_string(),
        })?;
        Ok(Self {
            extract_ticket_number,
            max_length,
            capitalize_first_word,
            ticket_pattern,
        })
    }

    pub fn extracts_tickets(&self) -> bool {
        self.extract_ticket_number
    }
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Processor for GitCommitProcessor {
    type Input = Vec<CommitRecord>;
    type Prepared = Vec<CommitRecord>;
    type Extracted = Vec<(String, String)>;
    type Processed = Vec<ProcessedCommit>;
    type Output = Vec<ProcessedCommit>;
    type Options = ();

    fn preprocess(&self, commits: Vec<CommitRecord>, _: &()) -> Result<Self::Prepared, ProcessError> {
        Ok(commits
            .into_iter()
            .map(|c| CommitRecord::new(c.hash, c.message.trim()))
            .collect())
    }

    fn extract_content(
        &self,
        commits: Vec<CommitRecord>,
        _: &(),
    ) -> Result<Self::Extracted, ProcessError> {
        Ok(commits.into_iter().map(|c| (c.hash, c.message)).collect())
    }

    fn main_process(
        &self,
        commits: Vec<(String, String)>,
        _: &(),
    ) -> Result<Self::Processed, ProcessError> {
        Ok(commits
            .into_iter()
            .map(|(hash, message)| {
                let ticket_number = if self.extract_ticket_number {
                    self.ticket_pattern
                        .captures(&message)
                        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                        .map(|m| m.as_str().to_string())
                } else {
                    None
                };
                let mut message = truncate_with_ellipsis(&message, self.max_length);
                if self.capitalize_first_word {
                    message = capitalize_first(&message);
                }
                ProcessedCommit {
                    hash,
                    message,
                    ticket_number,
                }
            })
            .collect())
    }

    fn postprocess(
        &self,
        commits: Vec<ProcessedCommit>,
        _: &(),
    ) -> Result<Self::Output, ProcessError> {
        Ok(commits)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

pub struct GitFetcher {
    log: GitLog,
    processor: GitCommitProcessor,
    selection: CommitSelection,
}

impl GitFetcher {
    pub fn new(log: GitLog, processor: GitCommitProcessor, selection: CommitSelection) -> Self {
        Self {
            log,
            processor,
            selection,
        }
    }
}

impl FetchPipeline for GitFetcher {
    const KIND: FetcherKind = FetcherKind::Git;

    type Raw = Vec<CommitRecord>;
    type Processed = Vec<ProcessedCommit>;

    fn fetch_content(&self, source: &str) -> Result<Self::Raw, FetchError> {
        let repo = self.log.resolve(source)?;
        let commits = self.log.commits(&repo, &self.selection)?;
        tracing::debug!(repo = source, commits = commits.len(), "git log read");
        Ok(commits)
    }

    fn process_content(&self, raw: Self::Raw) -> Result<Self::Processed, FetchError> {
        Ok(self.processor.process(raw, &())?)
    }

    fn format_output(&self, processed: Self::Processed) -> Result<ResultMapping, FetchError> {
        let mut out = ResultMapping::new();
        let offset = self.selection.offset();
        for (position, commit) in processed.into_iter().enumerate() {
            let index = offset + position;
            let mut record = json!({ "message": commit.message, "index": index });
            if let Some(ticket) = commit.ticket_number.filter(|_| self.processor.extracts_tickets()) {
                record["ticket_number"] = json!(ticket);
            }
            let key = if commit.hash.is_empty() {
                index.to_string()
            } else {
                commit.hash
            };
            out.insert(key, record);
        }
        Ok(out)
    }
}
