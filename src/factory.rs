//! Factories that assemble a matched (processor, fetcher, handler) triple.
//!
//! Every domain factory starts from its config section, may be adjusted
//! through setters, and takes per-call overrides when creating:
//!
//! ```text
//! Config section ─▶ Factory ──set_*()──▶ create_fetcher(overrides)
//!                                    └──▶ create_handler(HandlerSpec)
//! ```
//!
//! [`FetcherFactory`] is the template: implementors supply the `build_*`
//! hooks, the provided `create_*` methods drive them.

use std::path::PathBuf;

use crate::config::{CodeConfig, Config, GitConfig, SaveConfig, WebConfig, YouTubeConfig};
use crate::env_store::{EnvStore, YOUTUBE_API_KEY};
use crate::error::FactoryError;
use crate::fetcher::Fetcher;
use crate::handler::{Color, ConsoleHandler, ConsoleStream, FileHandler, Handler};
use crate::serializer::{serializer_for, Format, Serializer};
use crate::source_code::{CodeFetcher, CodeProcessor, FileWalker};
use crate::source_git::{CommitSelection, GitCommitProcessor, GitFetcher, GitLog};
use crate::source_pptx::{
    EditTarget, PptxEditFetcher, PptxEditProcessor, PptxFetcher, PptxOptions, PptxProcessor,
    PptxWriteHandler,
};
use crate::source_save::{SaveFetcher, SaveHandler, SaveOptions, SaveProcessor};
use crate::source_web::{ExtractionMethod, WebFetcher, WebProcessor};
use crate::source_youtube::{VideoService, YouTubeApi, YouTubeFetcher, YouTubeOptions, YouTubeProcessor};

// ═══════════════════════════════════════════════════════════════════════
// Handler specification
// ═══════════════════════════════════════════════════════════════════════

/// Describes the output handler a command wants.
///
/// `handler_type` is `"file"` or `"console"`; `format` is any name
/// [`Format`] parses.
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    pub handler_type: String,
    pub format: String,
    pub output: Option<PathBuf>,
    pub append: bool,
    pub create_dirs: bool,
    pub timestamp: bool,
    pub color: Option<String>,
    pub indent: usize,
    pub prefix: String,
    pub stderr: bool,
    pub type_tag: Option<String>,
}

impl Default for HandlerSpec {
    fn default() -> Self {
        Self {
            handler_type: "console".into(),
            format: "json".into(),
            output: None,
            append: false,
            create_dirs: true,
            timestamp: false,
            color: None,
            indent: 0,
            prefix: String::new(),
            stderr: false,
            type_tag: None,
        }
    }
}

impl HandlerSpec {
    pub fn console(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            handler_type: "file".into(),
            format: format.into(),
            output: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Build a file or console handler around `serializer`.
pub fn build_handler(
    spec: &HandlerSpec,
    serializer: Box<dyn Serializer>,
) -> Result<Box<dyn Handler>, FactoryError> {
    match spec.handler_type.to_ascii_lowercase().as_str() {
        "file" => {
            let path = spec.output.clone().ok_or(FactoryError::MissingOption("output"))?;
            Ok(Box::new(
                FileHandler::new(path, serializer)
                    .append(spec.append)
                    .create_dirs(spec.create_dirs)
                    .timestamp(spec.timestamp),
            ))
        }
        "console" => {
            let color = spec.color.as_deref().map(str::parse::<Color>).transpose()?;
            let stream = if spec.stderr {
                ConsoleStream::Stderr
            } else {
                ConsoleStream::Stdout
            };
            Ok(Box::new(
                ConsoleHandler::new(serializer)
                    .stream(stream)
                    .color(color)
                    .indent(spec.indent)
                    .prefix(spec.prefix.clone())
                    .type_tag(spec.type_tag.clone()),
            ))
        }
        other => Err(FactoryError::UnsupportedHandlerType(other.to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Template
// ═══════════════════════════════════════════════════════════════════════

pub trait FetcherFactory {
    type Processor;
    type Fetcher: Fetcher + 'static;
    /// Per-call settings layered over the factory defaults.
    type Overrides: Default;

    fn build_processor(&self, overrides: &Self::Overrides) -> Result<Self::Processor, FactoryError>;

    fn build_fetcher(
        &self,
        processor: Self::Processor,
        overrides: &Self::Overrides,
    ) -> Result<Self::Fetcher, FactoryError>;

    /// Post-construction hook for the handler's serializer.
    fn configure_serializer(&self, serializer: Box<dyn Serializer>) -> Box<dyn Serializer> {
        serializer
    }

    fn build_handler(&self, spec: &HandlerSpec) -> Result<Box<dyn Handler>, FactoryError> {
        let format: Format = spec.format.parse()?;
        build_handler(spec, self.configure_serializer(serializer_for(format)))
    }

    fn create_processor(&self, overrides: &Self::Overrides) -> Result<Self::Processor, FactoryError> {
        self.build_processor(overrides)
    }

    fn create_fetcher(&self, overrides: &Self::Overrides) -> Result<Box<dyn Fetcher>, FactoryError> {
        let processor = self.create_processor(overrides)?;
        Ok(Box::new(self.build_fetcher(processor, overrides)?))
    }

    fn create_handler(&self, spec: &HandlerSpec) -> Result<Box<dyn Handler>, FactoryError> {
        self.build_handler(spec)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Code
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct CodeOverrides {
    pub extensions: Option<Vec<String>>,
    pub excluded_dirs: Option<Vec<String>>,
    pub excluded_files: Option<Vec<String>>,
    pub max_line_length: Option<usize>,
    pub keep_comments: bool,
}

pub struct CodeFetcherFactory {
    config: CodeConfig,
}

impl CodeFetcherFactory {
    pub fn new(config: CodeConfig) -> Self {
        Self { config }
    }

    pub fn set_excluded_dirs(&mut self, dirs: Vec<String>) {
        self.config.excluded_dirs = dirs;
    }

    pub fn add_excluded_dir(&mut self, dir: impl Into<String>) {
        self.config.excluded_dirs.push(dir.into());
    }

    pub fn set_excluded_files(&mut self, files: Vec<String>) {
        self.config.excluded_files = files;
    }

    pub fn add_excluded_file(&mut self, file: impl Into<String>) {
        self.config.excluded_files.push(file.into());
    }

    pub fn set_extensions(&mut self, extensions: Vec<String>) {
        self.config.extensions = extensions.into_iter().map(normalize_extension).collect();
    }

    pub fn add_extension(&mut self, extension: impl Into<String>) {
        self.config.extensions.push(normalize_extension(extension.into()));
    }
}

fn normalize_extension(ext: String) -> String {
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

impl FetcherFactory for CodeFetcherFactory {
    type Processor = CodeProcessor;
    type Fetcher = CodeFetcher;
    type Overrides = CodeOverrides;

    fn build_processor(&self, o: &CodeOverrides) -> Result<CodeProcessor, FactoryError> {
        let c = &self.config;
        let max_line_length = o.max_line_length.or(c.max_line_length);
        if let Some(max) = max_line_length {
            if max < c.min_line_length {
                return Err(FactoryError::InvalidOption {
                    name: "max_line_length",
                    reason: format!("{max} is below min_line_length {}", c.min_line_length),
                });
            }
        }
        Ok(CodeProcessor {
            remove_comments: c.remove_comments && !o.keep_comments,
            remove_empty_lines: c.remove_empty_lines,
            trim_lines: c.trim_lines,
            min_line_length: c.min_line_length,
            max_line_length,
            comment_markers: c.comment_markers.clone(),
        })
    }

    fn build_fetcher(&self, processor: CodeProcessor, o: &CodeOverrides) -> Result<CodeFetcher, FactoryError> {
        let c = &self.config;
        let walker = FileWalker::new(
            o.excluded_dirs.clone().unwrap_or_else(|| c.excluded_dirs.clone()),
            o.excluded_files.clone().unwrap_or_else(|| c.excluded_files.clone()),
            o.extensions
                .clone()
                .map(|exts| exts.into_iter().map(normalize_extension).collect())
                .unwrap_or_else(|| c.extensions.clone()),
            &c.exclude_globs,
        )?;
        Ok(CodeFetcher::new(walker, processor))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Git
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct GitOverrides {
    pub selection: CommitSelection,
    pub extract_ticket_number: Option<bool>,
    pub max_length: Option<usize>,
    pub capitalize_first_word: Option<bool>,
}

pub struct GitFetcherFactory {
    config: GitConfig,
    cache_dir: PathBuf,
}

impl GitFetcherFactory {
    pub fn new(config: GitConfig, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.git.clone(), config.git_cache_dir())
    }

    pub fn set_extract_ticket_number(&mut self, on: bool) {
        self.config.extract_ticket_number = on;
    }

    pub fn set_max_length(&mut self, max_length: usize) {
        self.config.max_length = max_length;
    }

    pub fn set_capitalize_first_word(&mut self, on: bool) {
        self.config.capitalize_first_word = on;
    }

    /// The log reader, for operations outside the fetch pipeline (`count`).
    pub fn create_log(&self) -> GitLog {
        GitLog::new(self.cache_dir.clone())
    }
}

impl FetcherFactory for GitFetcherFactory {
    type Processor = GitCommitProcessor;
    type Fetcher = GitFetcher;
    type Overrides = GitOverrides;

    fn build_processor(&self, o: &GitOverrides) -> Result<GitCommitProcessor, FactoryError> {
        let c = &self.config;
        GitCommitProcessor::new(
            o.extract_ticket_number.unwrap_or(c.extract_ticket_number),
            o.max_length.unwrap_or(c.max_length),
            o.capitalize_first_word.unwrap_or(c.capitalize_first_word),
            &c.ticket_pattern,
        )
    }

    fn build_fetcher(&self, processor: GitCommitProcessor, o: &GitOverrides) -> Result<GitFetcher, FactoryError> {
        Ok(GitFetcher::new(self.create_log(), processor, o.selection.clone()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Web
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct WebOverrides {
    pub method: Option<String>,
    pub extract_metadata: Option<bool>,
    pub remove_urls: Option<bool>,
}

pub struct WebFetcherFactory {
    config: WebConfig,
}

impl WebFetcherFactory {
    pub fn new(config: WebConfig) -> Self {
        Self { config }
    }

    /// Fails fast on an unknown method name.
    pub fn set_extraction_method(&mut self, method: &str) -> Result<(), FactoryError> {
        let method: ExtractionMethod = method.parse()?;
        self.config.extraction_method = method.as_str().to_string();
        Ok(())
    }

    pub fn set_line_bounds(&mut self, min: usize, max: Option<usize>) {
        self.config.min_line_length = min;
        self.config.max_line_length = max;
    }
}

impl FetcherFactory for WebFetcherFactory {
    type Processor = WebProcessor;
    type Fetcher = WebFetcher;
    type Overrides = WebOverrides;

    fn build_processor(&self, o: &WebOverrides) -> Result<WebProcessor, FactoryError> {
        let c = &self.config;
        let method: ExtractionMethod = o
            .method
            .as_deref()
            .unwrap_or(&c.extraction_method)
            .parse()?;
        WebProcessor::builder(method)
            .remove_excess_whitespace(c.remove_excess_whitespace)
            .remove_urls(o.remove_urls.unwrap_or(c.remove_urls))
            .line_bounds(c.min_line_length, c.max_line_length)
            .extract_metadata(o.extract_metadata.unwrap_or(c.extract_metadata))
            .build()
    }

    fn build_fetcher(&self, processor: WebProcessor, _: &WebOverrides) -> Result<WebFetcher, FactoryError> {
        WebFetcher::new(processor, &self.config.user_agent)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// YouTube
// ═══════════════════════════════════════════════════════════════════════

pub struct YouTubeFetcherFactory {
    config: YouTubeConfig,
    api_key: Option<String>,
}

impl YouTubeFetcherFactory {
    pub fn new(config: YouTubeConfig, api_key: Option<String>) -> Self {
        Self { config, api_key }
    }

    pub fn from_config(config: &Config, env: &EnvStore) -> Self {
        Self::new(config.youtube.clone(), env.get(YOUTUBE_API_KEY))
    }

    /// Options seeded with the configured language.
    pub fn default_options(&self) -> YouTubeOptions {
        YouTubeOptions {
            lang: self.config.lang.clone(),
            ..YouTubeOptions::default()
        }
    }

    fn service(&self) -> Result<Box<dyn VideoService>, FactoryError> {
        Ok(Box::new(YouTubeApi::new(
            self.config.api_base.clone(),
            self.config.transcript_base.clone(),
            self.api_key.clone(),
            self.config.max_comments,
        )?))
    }
}

impl FetcherFactory for YouTubeFetcherFactory {
    type Processor = YouTubeProcessor;
    type Fetcher = YouTubeFetcher;
    type Overrides = YouTubeOptions;

    fn build_processor(&self, _: &YouTubeOptions) -> Result<YouTubeProcessor, FactoryError> {
        YouTubeProcessor::new()
    }

    fn build_fetcher(&self, processor: YouTubeProcessor, o: &YouTubeOptions) -> Result<YouTubeFetcher, FactoryError> {
        let mut options = o.clone();
        if options.lang.trim().is_empty() {
            options.lang = self.config.lang.clone();
        }
        Ok(YouTubeFetcher::new(self.service()?, processor, options))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PPTX
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct PptxFetcherFactory;

impl PptxFetcherFactory {
    pub fn new() -> Self {
        Self
    }
}

impl FetcherFactory for PptxFetcherFactory {
    type Processor = PptxProcessor;
    type Fetcher = PptxFetcher;
    type Overrides = PptxOptions;

    fn build_processor(&self, o: &PptxOptions) -> Result<PptxProcessor, FactoryError> {
        if o.only_content && o.only_notes {
            return Err(FactoryError::InvalidOption {
                name: "only_content",
                reason: "cannot be combined with only_notes".into(),
            });
        }
        if o.only_metadata && o.no_metadata {
            return Err(FactoryError::InvalidOption {
                name: "only_metadata",
                reason: "cannot be combined with no_metadata".into(),
            });
        }
        Ok(PptxProcessor)
    }

    fn build_fetcher(&self, processor: PptxProcessor, o: &PptxOptions) -> Result<PptxFetcher, FactoryError> {
        Ok(PptxFetcher::new(processor, o.clone()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PptxEditOverrides {
    /// 0-based; `None` edits every slide.
    pub slide_index: Option<usize>,
    pub text: String,
    pub target: EditTarget,
}

/// Edits a deck; the handler writes the modified file to `HandlerSpec::output`.
#[derive(Default)]
pub struct PptxEditFetcherFactory;

impl PptxEditFetcherFactory {
    pub fn new() -> Self {
        Self
    }
}

impl FetcherFactory for PptxEditFetcherFactory {
    type Processor = PptxEditProcessor;
    type Fetcher = PptxEditFetcher;
    type Overrides = PptxEditOverrides;

    fn build_processor(&self, o: &PptxEditOverrides) -> Result<PptxEditProcessor, FactoryError> {
        Ok(PptxEditProcessor {
            slide_index: o.slide_index,
            text: o.text.clone(),
            target: o.target,
        })
    }

    fn build_fetcher(&self, processor: PptxEditProcessor, _: &PptxEditOverrides) -> Result<PptxEditFetcher, FactoryError> {
        Ok(PptxEditFetcher::new(processor))
    }

    fn build_handler(&self, spec: &HandlerSpec) -> Result<Box<dyn Handler>, FactoryError> {
        let output = spec.output.clone().ok_or(FactoryError::MissingOption("output"))?;
        Ok(Box::new(PptxWriteHandler::new(output)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Save
// ═══════════════════════════════════════════════════════════════════════

pub struct SaveFetcherFactory {
    config: SaveConfig,
    silent: bool,
    passthrough: bool,
}

impl SaveFetcherFactory {
    pub fn new(config: SaveConfig) -> Self {
        Self {
            config,
            silent: false,
            passthrough: false,
        }
    }

    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        self.config.output_path = Some(path.into());
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn set_passthrough(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
    }
}

impl FetcherFactory for SaveFetcherFactory {
    type Processor = SaveProcessor;
    type Fetcher = SaveFetcher;
    type Overrides = SaveOptions;

    fn build_processor(&self, _: &SaveOptions) -> Result<SaveProcessor, FactoryError> {
        SaveProcessor::new(self.config.frontmatter_tags.clone(), self.config.date_format.clone())
    }

    fn build_fetcher(&self, processor: SaveProcessor, o: &SaveOptions) -> Result<SaveFetcher, FactoryError> {
        Ok(SaveFetcher::stdin(processor, o.clone()))
    }

    /// The save handler has its own sink; `HandlerSpec::format` is ignored.
    fn build_handler(&self, spec: &HandlerSpec) -> Result<Box<dyn Handler>, FactoryError> {
        let output = spec.output.clone().or_else(|| self.config.output_path.clone());
        Ok(Box::new(
            SaveHandler::new(output)
                .silent(self.silent)
                .passthrough(self.passthrough),
        ))
    }
}
