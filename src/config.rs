//! TOML configuration with per-factory defaults.
//!
//! Every section is optional; a missing file yields [`Config::default`].
//! The loaded value is passed explicitly to factories and providers.
//!
//! ```toml
//! [code]
//! extensions = [".rs", ".py"]
//! remove_comments = true
//!
//! [git]
//! max_length = 72
//!
//! [web]
//! extraction_method = "custom"
//!
//! [save]
//! output_path = "~/notes/fabric"
//!
//! [fabric]
//! default_model = "claude-3-5-sonnet-20240620"
//!
//! [providers]
//! fallback = "ollama"
//! routes = { "mistral" = "ollama", "o1" = "gpt" }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::provider::ProviderKind;
use crate::source_web::ExtractionMethod;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub code: CodeConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub save: SaveConfig,
    #[serde(default)]
    pub fabric: FabricConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub jira: JiraConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeConfig {
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    #[serde(default = "default_excluded_files")]
    pub excluded_files: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_comment_markers")]
    pub comment_markers: Vec<String>,
    #[serde(default = "default_true")]
    pub remove_comments: bool,
    #[serde(default = "default_true")]
    pub remove_empty_lines: bool,
    #[serde(default = "default_true")]
    pub trim_lines: bool,
    #[serde(default)]
    pub min_line_length: usize,
    #[serde(default)]
    pub max_line_length: Option<usize>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            excluded_dirs: default_excluded_dirs(),
            excluded_files: default_excluded_files(),
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            comment_markers: default_comment_markers(),
            remove_comments: true,
            remove_empty_lines: true,
            trim_lines: true,
            min_line_length: 0,
            max_line_length: None,
        }
    }
}

fn default_excluded_dirs() -> Vec<String> {
    vec!["venv".into(), ".git".into(), "__pycache__".into()]
}

fn default_excluded_files() -> Vec<String> {
    vec!["setup.py".into(), "requirements.txt".into()]
}

fn default_extensions() -> Vec<String> {
    vec![".py".into(), ".js".into(), ".html".into(), ".css".into()]
}

fn default_comment_markers() -> Vec<String> {
    vec!["#".into()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default)]
    pub extract_ticket_number: bool,
    #[serde(default = "default_commit_max_length")]
    pub max_length: usize,
    #[serde(default = "default_true")]
    pub capitalize_first_word: bool,
    #[serde(default = "default_ticket_pattern")]
    pub ticket_pattern: String,
    /// Clone cache for remote repositories. Defaults to `<config dir>/git-cache`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            extract_ticket_number: false,
            max_length: default_commit_max_length(),
            capitalize_first_word: true,
            ticket_pattern: default_ticket_pattern(),
            cache_dir: None,
        }
    }
}

fn default_commit_max_length() -> usize {
    72
}

fn default_ticket_pattern() -> String {
    crate::source_git::DEFAULT_TICKET_PATTERN.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_extraction_method")]
    pub extraction_method: String,
    #[serde(default = "default_true")]
    pub remove_excess_whitespace: bool,
    #[serde(default)]
    pub remove_urls: bool,
    #[serde(default)]
    pub min_line_length: usize,
    #[serde(default)]
    pub max_line_length: Option<usize>,
    #[serde(default)]
    pub extract_metadata: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            extraction_method: default_extraction_method(),
            remove_excess_whitespace: true,
            remove_urls: false,
            min_line_length: 0,
            max_line_length: None,
            extract_metadata: false,
            user_agent: default_user_agent(),
        }
    }
}

fn default_extraction_method() -> String {
    "custom".to_string()
}

fn default_user_agent() -> String {
    concat!("spindle/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct YouTubeConfig {
    #[serde(default = "default_youtube_api_base")]
    pub api_base: String,
    #[serde(default = "default_youtube_transcript_base")]
    pub transcript_base: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_base: default_youtube_api_base(),
            transcript_base: default_youtube_transcript_base(),
            lang: default_lang(),
            max_comments: default_max_comments(),
        }
    }
}

fn default_youtube_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_youtube_transcript_base() -> String {
    "https://www.youtube.com/api/timedtext".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_max_comments() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SaveConfig {
    /// Directory the save handler writes markdown files into.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Tags always written into the frontmatter.
    #[serde(default)]
    pub frontmatter_tags: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            frontmatter_tags: String::new(),
            date_format: default_date_format(),
        }
    }
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FabricConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub patterns_dir: Option<PathBuf>,
    #[serde(default = "default_patterns_url")]
    pub patterns_url: String,
    /// Directory inside the downloaded archive that holds the patterns.
    #[serde(default = "default_patterns_subdir")]
    pub patterns_subdir: String,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            patterns_dir: None,
            patterns_url: default_patterns_url(),
            patterns_subdir: default_patterns_subdir(),
        }
    }
}

fn default_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

fn default_patterns_url() -> String {
    "https://github.com/danielmiessler/fabric/archive/refs/heads/main.zip".to_string()
}

fn default_patterns_subdir() -> String {
    "fabric-main/patterns".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    /// Request timeout in seconds. Unset means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_claude_base_url")]
    pub claude_base_url: String,
    #[serde(default = "default_google_base_url")]
    pub google_base_url: String,
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,
    /// Provider used when no route matches. `"none"` disables the fallback.
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// Extra model-name prefix → provider routes.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            openai_base_url: default_openai_base_url(),
            claude_base_url: default_claude_base_url(),
            google_base_url: default_google_base_url(),
            ollama_host: default_ollama_host(),
            fallback: default_fallback(),
            routes: BTreeMap::new(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_claude_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_google_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_fallback() -> String {
    "ollama".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JiraConfig {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
}

fn default_issue_type() -> String {
    "Task".to_string()
}

impl Config {
    /// Patterns directory, defaulting to `<config dir>/patterns`.
    pub fn patterns_dir(&self) -> PathBuf {
        match &self.fabric.patterns_dir {
            Some(dir) => dir.clone(),
            None => default_config_dir().join("patterns"),
        }
    }

    pub fn git_cache_dir(&self) -> PathBuf {
        match &self.git.cache_dir {
            Some(dir) => dir.clone(),
            None => default_config_dir().join("git-cache"),
        }
    }
}

/// `~/.config/spindle` (platform config dir), or `./.spindle` when unknown.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("spindle"))
        .unwrap_or_else(|| PathBuf::from(".spindle"))
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Resolve the configuration for a run.
///
/// An explicit path must exist. Without one, `<config dir>/spindle.toml` is
/// used when present, otherwise defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let implicit = default_config_dir().join("spindle.toml");
            if implicit.exists() {
                load_config(&implicit)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.git.max_length == 0 {
        bail!("git.max_length must be > 0");
    }

    if let Some(max) = config.code.max_line_length {
        if max < config.code.min_line_length {
            bail!("code.max_line_length must be >= code.min_line_length");
        }
    }

    if let Some(max) = config.web.max_line_length {
        if max < config.web.min_line_length {
            bail!("web.max_line_length must be >= web.min_line_length");
        }
    }

    if config.web.extraction_method.parse::<ExtractionMethod>().is_err() {
        bail!(
            "Unknown web.extraction_method: '{}'. Must be custom, raw, html2text, or readability.",
            config.web.extraction_method
        );
    }

    if config.providers.fallback != "none" {
        config
            .providers
            .fallback
            .parse::<ProviderKind>()
            .with_context(|| "Invalid providers.fallback")?;
    }

    for (prefix, provider) in &config.providers.routes {
        if prefix.is_empty() {
            bail!("providers.routes keys must be non-empty prefixes");
        }
        provider
            .parse::<ProviderKind>()
            .with_context(|| format!("Invalid provider for route '{}'", prefix))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_yields_defaults() {
        let file = write_config("");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.code.excluded_dirs, vec!["venv", ".git", "__pycache__"]);
        assert_eq!(cfg.code.extensions, vec![".py", ".js", ".html", ".css"]);
        assert_eq!(cfg.git.max_length, 72);
        assert!(cfg.git.capitalize_first_word);
        assert_eq!(cfg.web.extraction_method, "custom");
        assert_eq!(cfg.save.date_format, "%Y-%m-%d");
        assert_eq!(cfg.fabric.default_model, "gpt-4-turbo-preview");
        assert_eq!(cfg.providers.fallback, "ollama");
    }

    #[test]
    fn sections_override_defaults() {
        let file = write_config(
            r#"
[code]
extensions = [".rs"]
max_line_length = 120

[providers]
routes = { "mistral" = "ollama" }
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.code.extensions, vec![".rs"]);
        assert_eq!(cfg.code.max_line_length, Some(120));
        assert!(cfg.code.remove_comments);
        assert_eq!(cfg.providers.routes["mistral"], "ollama");
    }

    #[test]
    fn rejects_unknown_extraction_method() {
        let file = write_config("[web]\nextraction_method = \"goose\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("extraction_method"));
    }

    #[test]
    fn rejects_unknown_route_provider() {
        let file = write_config("[providers]\nroutes = { \"llama\" = \"bard\" }\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_inverted_line_bounds() {
        let file = write_config("[code]\nmin_line_length = 10\nmax_line_length = 5\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(resolve_config(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
