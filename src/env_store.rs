//! `.env`-style credential store.
//!
//! Holds API keys and a few user preferences in `KEY=value` lines parsed with
//! `dotenvy`. The store is constructed with an explicit path and never touches
//! the filesystem until [`EnvStore::load`] or [`EnvStore::save`] is called;
//! `save` is the only operation that creates the parent directory.
//!
//! Lookups fall back to the process environment, so `OPENAI_API_KEY=... spindle`
//! works without a stored key.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::default_config_dir;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const CLAUDE_API_KEY: &str = "CLAUDE_API_KEY";
pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const YOUTUBE_API_KEY: &str = "YOUTUBE_API_KEY";
pub const JIRA_TOKEN: &str = "JIRA_TOKEN";
pub const DEFAULT_MODEL: &str = "DEFAULT_MODEL";

#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
    use_process_env: bool,
}

impl EnvStore {
    /// Empty store bound to `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: BTreeMap::new(),
            use_process_env: true,
        }
    }

    /// `~/.config/spindle/.env`.
    pub fn default_path() -> PathBuf {
        default_config_dir().join(".env")
    }

    /// Open the store at `path`, loading it when the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path);
        if store.exists() {
            store.load()?;
        }
        Ok(store)
    }

    /// Disable the process-environment fallback.
    pub fn isolated(mut self) -> Self {
        self.use_process_env = false;
        self
    }

    /// Set a value in memory only.
    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace in-memory values with the file contents.
    pub fn load(&mut self) -> Result<()> {
        let iter = dotenvy::from_path_iter(&self.path)
            .with_context(|| format!("Failed to read env file: {}", self.path.display()))?;
        let mut values = BTreeMap::new();
        for item in iter {
            let (key, value) = item
                .with_context(|| format!("Failed to parse env file: {}", self.path.display()))?;
            values.insert(key, value);
        }
        self.values = values;
        Ok(())
    }

    /// Write every value back to disk, creating the parent directory.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(value));
            out.push('\n');
        }
        std::fs::write(&self.path, out)
            .with_context(|| format!("Failed to write env file: {}", self.path.display()))
    }

    /// Stored value, else the process environment. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| {
                if self.use_process_env {
                    std::env::var(key).ok()
                } else {
                    None
                }
            })
            .filter(|v| !v.is_empty())
    }

    /// Set a value and persist immediately.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let removed = self.values.remove(key).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn get_all(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Drop every stored value and persist the empty file.
    pub fn clear(&mut self) -> Result<()> {
        self.values.clear();
        self.save()
    }
}

fn quote(value: &str) -> String {
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{value}'");
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}
