//! Source-code trees.
//!
//! [`CodeFetcher`] walks a directory with `walkdir`, prunes excluded
//! directory names, skips excluded file names and globs, keeps allowed
//! extensions, and runs every file through [`CodeProcessor`].
//!
//! Output: file path → processed lines.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{FactoryError, FetchError, ProcessError};
use crate::fetcher::{FetchPipeline, FetcherKind};
use crate::models::ResultMapping;
use crate::processor::{truncate_with_ellipsis, Processor};

// ═══════════════════════════════════════════════════════════════════════
// Processor
// ═══════════════════════════════════════════════════════════════════════

/// Line-level cleanup of one source file.
#[derive(Debug, Clone)]
pub struct CodeProcessor {
    pub remove_comments: bool,
    pub remove_empty_lines: bool,
    pub trim_lines: bool,
    pub min_line_length: usize,
    pub max_line_length: Option<usize>,
    pub comment_markers: Vec<String>,
}

impl Default for CodeProcessor {
    fn default() -> Self {
        Self {
            remove_comments: true,
            remove_empty_lines: true,
            trim_lines: true,
            min_line_length: 0,
            max_line_length: None,
            comment_markers: vec!["#".to_string()],
        }
    }
}

impl CodeProcessor {
    fn strip_comment<'a>(&self, line: &'a str) -> &'a str {
        let cut = self
            .comment_markers
            .iter()
            .filter(|m| !m.is_empty())
            .filter_map(|m| line.find(m.as_str()))
            .min();
        match cut {
            Some(idx) => &line[..idx],
            None => line,
        }
    }
}

impl Processor for CodeProcessor {
    type Input = String;
    type Prepared = Vec<String>;
    type Extracted = Vec<String>;
    type Processed = Vec<String>;
    type Output = Vec<String>;
    type Options = ();

    fn preprocess(&self, input: String, _: &()) -> Result<Vec<String>, ProcessError> {
        Ok(input
            .split('\n')
            .map(|line| {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if self.trim_lines {
                    line.trim().to_string()
                } else {
                    line.to_string()
                }
            })
            .collect())
    }

    fn extract_content(&self, lines: Vec<String>, _: &()) -> Result<Vec<String>, ProcessError> {
        if !self.remove_comments {
            return Ok(lines);
        }
        Ok(lines
            .into_iter()
            .map(|line| {
                let code = self.strip_comment(&line);
                if self.trim_lines {
                    code.trim_end().to_string()
                } else {
                    code.to_string()
                }
            })
            .collect())
    }

    fn main_process(&self, lines: Vec<String>, _: &()) -> Result<Vec<String>, ProcessError> {
        Ok(lines
            .into_iter()
            .filter(|line| !(self.remove_empty_lines && line.trim().is_empty()))
            .filter(|line| line.chars().count() >= self.min_line_length)
            .map(|line| match self.max_line_length {
                Some(max) => truncate_with_ellipsis(&line, max),
                None => line,
            })
            .collect())
    }

    fn postprocess(&self, lines: Vec<String>, _: &()) -> Result<Vec<String>, ProcessError> {
        Ok(lines)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Walker
// ═══════════════════════════════════════════════════════════════════════

/// File selection rules for a code tree.
#[derive(Debug, Clone)]
pub struct FileWalker {
    pub excluded_dirs: Vec<String>,
    pub excluded_files: Vec<String>,
    /// Allowed extensions including the dot. Empty allows every file.
    pub extensions: Vec<String>,
    exclude_set: GlobSet,
}

impl FileWalker {
    pub fn new(
        excluded_dirs: Vec<String>,
        excluded_files: Vec<String>,
        extensions: Vec<String>,
        exclude_globs: &[String],
    ) -> Result<Self, FactoryError> {
        Ok(Self {
            excluded_dirs,
            excluded_files,
            extensions,
            exclude_set: build_globset(exclude_globs)?,
        })
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = match path.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => return false,
        };
        self.extensions.iter().any(|allowed| allowed == &ext)
    }

    /// Matching files under `root`, sorted by path.
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>, FetchError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !self
                    .excluded_dirs
                    .iter()
                    .any(|d| entry.file_name().to_string_lossy() == d.as_str())
        });

        for entry in walker {
            let entry = entry.map_err(|e| FetchError::unavailable(root.display().to_string(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy();
            if self.excluded_files.iter().any(|f| f.as_str() == file_name) {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.exclude_set.is_match(relative) {
                continue;
            }
            if !self.extension_allowed(path) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, FactoryError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| FactoryError::InvalidOption {
            name: "exclude_globs",
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| FactoryError::InvalidOption {
        name: "exclude_globs",
        reason: e.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

pub struct CodeFetcher {
    walker: FileWalker,
    processor: CodeProcessor,
}

impl CodeFetcher {
    pub fn new(walker: FileWalker, processor: CodeProcessor) -> Self {
        Self { walker, processor }
    }
}

impl FetchPipeline for CodeFetcher {
    const KIND: FetcherKind = FetcherKind::Code;

    type Raw = Vec<(String, String)>;
    type Processed = Vec<(String, Vec<String>)>;

    fn fetch_content(&self, source: &str) -> Result<Self::Raw, FetchError> {
        let root = Path::new(source);
        if !root.is_dir() {
            return Err(FetchError::unavailable(source, "not a directory"));
        }
        let mut files = Vec::new();
        for path in self.walker.walk(root)? {
            match std::fs::read_to_string(&path) {
                Ok(content) => files.push((path.display().to_string(), content)),
                Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!(path = %path.display(), "skipping non-UTF-8 file");
                }
                Err(err) => return Err(FetchError::unavailable(path.display().to_string(), err)),
            }
        }
        tracing::debug!(root = source, files = files.len(), "code tree scanned");
        Ok(files)
    }

    fn process_content(&self, raw: Self::Raw) -> Result<Self::Processed, FetchError> {
        raw.into_iter()
            .map(|(path, content)| -> Result<_, FetchError> {
                Ok((path, self.processor.process(content, &())?))
            })
            .collect()
    }

    fn format_output(&self, processed: Self::Processed) -> Result<ResultMapping, FetchError> {
        Ok(processed
            .into_iter()
            .map(|(path, lines)| {
                let lines = lines.into_iter().map(Value::String).collect();
                (path, Value::Array(lines))
            })
            .collect())
    }
}
