//! `save`: a tee for piped content.
//!
//! [`SaveFetcher`] reads its input stream (stdin in the CLI), [`SaveProcessor`]
//! builds optional markdown frontmatter, and [`SaveHandler`] writes
//! `<output_path>/<date>-<stub>.md` (or `-N.md` when taken) and echoes the
//! content back out.

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{FactoryError, FetchError, HandlerError, ProcessError};
use crate::fetcher::{FetchPipeline, FetcherKind};
use crate::handler::Handler;
use crate::models::{Payload, ResultMapping};
use crate::processor::Processor;
use crate::serializer::Serializer;

fn valid_strftime(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub stub: String,
    pub tags: Vec<String>,
    /// Skip the configured frontmatter tags.
    pub nofabric: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveDocument {
    pub content: String,
    pub stub: String,
    pub tags: Vec<String>,
    pub frontmatter: String,
    pub date_format: String,
}

#[derive(Debug, Clone)]
pub struct SaveProcessor {
    frontmatter_tags: String,
    date_format: String,
}

impl SaveProcessor {
    pub fn new(
        frontmatter_tags: impl Into<String>,
        date_format: impl Into<String>,
    ) -> Result<Self, FactoryError> {
        let date_format = date_format.into();
        if !valid_strftime(&date_format) {
            return Err(FactoryError::InvalidOption {
                name: "date_format",
                reason: format!("invalid strftime pattern: {date_format}"),
            });
        }
        Ok(Self {
            frontmatter_tags: frontmatter_tags.into(),
            date_format,
        })
    }
}

impl Processor for SaveProcessor {
    type Input = String;
    type Prepared = String;
    type Extracted = SaveDocument;
    type Processed = SaveDocument;
    type Output = SaveDocument;
    type Options = SaveOptions;

    fn preprocess(&self, content: String, options: &SaveOptions) -> Result<String, ProcessError> {
        let stub = options.stub.trim();
        if stub.is_empty() || stub.contains(['/', '\\']) {
            return Err(ProcessError::InvalidInput(format!(
                "stub must be a non-empty file name, got {:?}",
                options.stub
            )));
        }
        Ok(content)
    }

    fn extract_content(&self, content: String, options: &SaveOptions) -> Result<SaveDocument, ProcessError> {
        Ok(SaveDocument {
            content,
            stub: options.stub.trim().to_string(),
            tags: options.tags.clone(),
            frontmatter: String::new(),
            date_format: self.date_format.clone(),
        })
    }

    fn main_process(&self, mut doc: SaveDocument, options: &SaveOptions) -> Result<SaveDocument, ProcessError> {
        let configured = if options.nofabric {
            ""
        } else {
            self.frontmatter_tags.trim()
        };
        if !configured.is_empty() || !doc.tags.is_empty() {
            let now = Local::now().format("%Y-%m-%d %H:%M");
            doc.frontmatter = format!(
                "---\ngeneration_date: {now}\ntags: {configured} {} {}\n---\n",
                doc.stub,
                doc.tags.join(" ")
            );
        }
        Ok(doc)
    }

    fn postprocess(&self, doc: SaveDocument, _: &SaveOptions) -> Result<SaveDocument, ProcessError> {
        Ok(doc)
    }
}

/// Reads all of its input stream once.
pub struct SaveFetcher {
    input: Mutex<Box<dyn Read + Send>>,
    processor: SaveProcessor,
    options: SaveOptions,
}

impl SaveFetcher {
    pub fn new(input: Box<dyn Read + Send>, processor: SaveProcessor, options: SaveOptions) -> Self {
        Self {
            input: Mutex::new(input),
            processor,
            options,
        }
    }

    pub fn stdin(processor: SaveProcessor, options: SaveOptions) -> Self {
        Self::new(Box::new(std::io::stdin()), processor, options)
    }
}

impl FetchPipeline for SaveFetcher {
    const KIND: FetcherKind = FetcherKind::Save;

    type Raw = String;
    type Processed = SaveDocument;

    fn fetch_content(&self, source: &str) -> Result<String, FetchError> {
        let mut input = self
            .input
            .lock()
            .map_err(|_| FetchError::unavailable(source, "input stream poisoned"))?;
        let mut content = String::new();
        input
            .read_to_string(&mut content)
            .map_err(|e| FetchError::unavailable(source, e))?;
        Ok(content)
    }

    fn process_content(&self, raw: String) -> Result<SaveDocument, FetchError> {
        Ok(self.processor.process(raw, &self.options)?)
    }

    fn format_output(&self, doc: SaveDocument) -> Result<ResultMapping, FetchError> {
        let mut out = ResultMapping::new();
        out.insert("content".into(), Value::String(doc.content));
        out.insert("stub".into(), Value::String(doc.stub));
        out.insert("tags".into(), json!(doc.tags));
        out.insert("frontmatter".into(), Value::String(doc.frontmatter));
        out.insert("date_format".into(), Value::String(doc.date_format));
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════════════════

pub struct SaveHandler {
    output_path: Option<PathBuf>,
    silent: bool,
    passthrough: bool,
    echo: Mutex<Box<dyn Write + Send>>,
    last_saved: Mutex<Option<PathBuf>>,
}

impl SaveHandler {
    pub fn new(output_path: Option<PathBuf>) -> Self {
        Self {
            output_path,
            silent: false,
            passthrough: false,
            echo: Mutex::new(Box::new(std::io::stdout())),
            last_saved: Mutex::new(None),
        }
    }

    /// Don't echo content or report the target.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Echo content even when silent.
    pub fn passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn echo_to(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.echo = Mutex::new(sink);
        self
    }

    /// Path written by the most recent `handle`.
    pub fn last_saved(&self) -> Option<PathBuf> {
        self.last_saved.lock().ok().and_then(|p| p.clone())
    }

    fn output_dir(&self) -> Result<PathBuf, HandlerError> {
        let configured = self.output_path.as_ref().ok_or_else(|| {
            HandlerError::new("save output_path not set in configuration").in_handler(self.name())
        })?;
        let dir = expand_home(configured);
        if !dir.is_dir() {
            return Err(HandlerError::new(format!(
                "'{}' does not exist. Create it and try again.",
                dir.display()
            ))
            .in_handler(self.name()));
        }
        Ok(dir)
    }

    fn save(&self, data: &ResultMapping) -> Result<(), HandlerError> {
        let field = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or_default();
        let (stub, content, frontmatter, date_format) = (
            field("stub"),
            field("content"),
            field("frontmatter"),
            field("date_format"),
        );
        if stub.is_empty() {
            return Err(HandlerError::new("no stub in save data")
                .in_handler(self.name())
                .with_data(content));
        }
        if !valid_strftime(date_format) {
            return Err(HandlerError::new(format!("invalid date format: {date_format}"))
                .in_handler(self.name()));
        }

        let dir = self.output_dir()?;
        let base = if date_format.is_empty() {
            stub.to_string()
        } else {
            format!("{}-{}", Local::now().format(date_format), stub)
        };
        let target = unused_target(&dir, &base);

        let mut body = String::with_capacity(frontmatter.len() + content.len());
        body.push_str(frontmatter);
        body.push_str(content);
        std::fs::write(&target, body).map_err(|e| {
            HandlerError::new(format!("failed to write {}", target.display()))
                .in_handler(self.name())
                .caused_by(e)
        })?;
        tracing::debug!(path = %target.display(), "content saved");

        if !self.silent {
            eprintln!("Content saved to {}", target.display());
        }
        if let Ok(mut last) = self.last_saved.lock() {
            *last = Some(target);
        }
        if !self.silent || self.passthrough {
            self.write(content)?;
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// `<base>.md`, else the first free `<base>-N.md`.
fn unused_target(dir: &Path, base: &str) -> PathBuf {
    let mut target = dir.join(format!("{base}.md"));
    let mut inc = 0;
    while target.exists() {
        inc += 1;
        target = dir.join(format!("{base}-{inc}.md"));
    }
    target
}

impl Handler for SaveHandler {
    fn name(&self) -> &str {
        "SaveHandler"
    }

    fn serializer(&self) -> Option<&dyn Serializer> {
        None
    }

    /// Echo to the output stream, no trailing newline added.
    fn write(&self, encoded: &str) -> Result<(), HandlerError> {
        let mut echo = self
            .echo
            .lock()
            .map_err(|_| HandlerError::new("output stream poisoned").in_handler(self.name()))?;
        echo.write_all(encoded.as_bytes())
            .and_then(|_| echo.flush())
            .map_err(|e| {
                HandlerError::new("failed to echo content")
                    .in_handler(self.name())
                    .caused_by(e)
            })
    }

    fn handle(&self, payload: &Payload) -> Result<(), HandlerError> {
        match payload {
            Payload::Mapping(data) => self.save(data),
            Payload::Serialized(text) => Err(HandlerError::new("save needs structured data")
                .in_handler(self.name())
                .with_data(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn options(stub: &str, tags: &[&str], nofabric: bool) -> SaveOptions {
        SaveOptions {
            stub: stub.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            nofabric,
        }
    }

    fn fetch(input: &str, tags: &str, opts: SaveOptions) -> ResultMapping {
        let processor = SaveProcessor::new(tags, "%Y-%m-%d").unwrap();
        SaveFetcher::new(Box::new(Cursor::new(input.to_string())), processor, opts)
            .fetch("-")
            .unwrap()
    }

    #[test]
    fn frontmatter_combines_configured_stub_and_extra_tags() {
        let out = fetch("body\n", "fabric", options("notes", &["rust", "cli"], false));
        let fm = out["frontmatter"].as_str().unwrap();
        assert!(fm.starts_with("---\ngeneration_date: "));
        assert!(fm.ends_with("\ntags: fabric notes rust cli\n---\n"));
        assert_eq!(out["content"], "body\n");
    }

    #[test]
    fn no_tags_means_no_frontmatter() {
        let out = fetch("body", "fabric", options("notes", &[], true));
        assert_eq!(out["frontmatter"], "");
    }

    #[test]
    fn bad_stub_is_rejected() {
        let processor = SaveProcessor::new("", "%Y").unwrap();
        let fetcher = SaveFetcher::new(Box::new(Cursor::new("x")), processor, options("a/b", &[], false));
        assert!(fetcher.fetch("-").is_err());
    }

    #[test]
    fn bad_date_format_fails_at_construction() {
        assert!(SaveProcessor::new("", "%Q%").is_err());
    }

    #[test]
    fn handler_writes_incrementing_files_and_echoes() {
        let dir = TempDir::new().unwrap();
        let data = fetch("hello\n", "", options("log", &[], false));
        let echo = SharedBuf::default();
        let handler = SaveHandler::new(Some(dir.path().to_path_buf())).echo_to(Box::new(echo.clone()));

        handler.handle(&Payload::Mapping(data.clone())).unwrap();
        let first = handler.last_saved().unwrap();
        handler.handle(&Payload::Mapping(data)).unwrap();
        let second = handler.last_saved().unwrap();

        let date = Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(first, dir.path().join(format!("{date}-log.md")));
        assert_eq!(second, dir.path().join(format!("{date}-log-1.md")));
        assert_eq!(std::fs::read_to_string(first).unwrap(), "hello\n");
        assert_eq!(echo.text(), "hello\nhello\n");
    }

    #[test]
    fn silent_suppresses_echo_unless_passthrough() {
        let dir = TempDir::new().unwrap();
        let data = fetch("quiet", "", options("q", &[], false));

        let echo = SharedBuf::default();
        SaveHandler::new(Some(dir.path().to_path_buf()))
            .silent(true)
            .echo_to(Box::new(echo.clone()))
            .handle(&Payload::Mapping(data.clone()))
            .unwrap();
        assert_eq!(echo.text(), "");

        SaveHandler::new(Some(dir.path().to_path_buf()))
            .silent(true)
            .passthrough(true)
            .echo_to(Box::new(echo.clone()))
            .handle(&Payload::Mapping(data))
            .unwrap();
        assert_eq!(echo.text(), "quiet");
    }

    #[test]
    fn missing_output_dir_is_a_handler_error() {
        let data = fetch("x", "", options("x", &[], false));
        let err = SaveHandler::new(None).handle(&Payload::Mapping(data.clone())).unwrap_err();
        assert!(err.to_string().contains("output_path not set"));

        let err = SaveHandler::new(Some(PathBuf::from("/no/such/dir")))
            .handle(&Payload::Mapping(data))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert_eq!(err.handler.as_deref(), Some("SaveHandler"));
    }
}
