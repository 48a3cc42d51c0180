//! Output handlers.
//!
//! A handler consumes the final [`Payload`] of a command. Mapping payloads are
//! preprocessed, encoded with the handler's [`Serializer`], and written to the
//! handler's sink; serialized payloads are written as-is.
//!
//! | Handler | Sink |
//! |---------|------|
//! | [`FileHandler`] | file path, truncate or append, optional parent creation |
//! | [`ConsoleHandler`] | stdout / stderr with prefix, indent, ANSI color |
//! | [`CompositeHandler`] | none; fans out to child handlers |
//!
//! Domain handlers (`SaveHandler`, `PptxWriteHandler`) live with their
//! sources.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{FactoryError, HandlerError};
use crate::models::{Payload, ResultMapping};
use crate::serializer::Serializer;

pub trait Handler {
    fn name(&self) -> &str;

    /// Encoder for mapping payloads. `None` for handlers without a sink.
    fn serializer(&self) -> Option<&dyn Serializer>;

    /// Adjust data before encoding. Identity by default.
    fn preprocess(&self, data: ResultMapping) -> ResultMapping {
        data
    }

    /// Deliver encoded text to the sink.
    fn write(&self, encoded: &str) -> Result<(), HandlerError>;

    fn handle(&self, payload: &Payload) -> Result<(), HandlerError> {
        match payload {
            Payload::Serialized(text) => self.write(text),
            Payload::Mapping(data) => {
                let serializer = self.serializer().ok_or_else(|| {
                    HandlerError::new("handler has no serializer").in_handler(self.name())
                })?;
                let data = self.preprocess(data.clone());
                let encoded = serializer.encode(&data).map_err(|err| {
                    tracing::error!(handler = self.name(), error = %err, "serialization failed");
                    HandlerError::from(err).in_handler(self.name())
                })?;
                self.write(&encoded)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// File
// ═══════════════════════════════════════════════════════════════════════

pub struct FileHandler {
    path: PathBuf,
    serializer: Box<dyn Serializer>,
    append: bool,
    create_dirs: bool,
    timestamp: bool,
}

impl FileHandler {
    pub fn new(path: impl Into<PathBuf>, serializer: Box<dyn Serializer>) -> Self {
        Self {
            path: path.into(),
            serializer,
            append: false,
            create_dirs: true,
            timestamp: false,
        }
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Whether a missing parent directory is created (default) or an error.
    pub fn create_dirs(mut self, create: bool) -> Self {
        self.create_dirs = create;
        self
    }

    /// Inject a `_generated_at` RFC 3339 timestamp into mapping payloads.
    pub fn timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<(), HandlerError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Ok(()),
        };
        if parent.is_dir() {
            return Ok(());
        }
        if !self.create_dirs {
            return Err(HandlerError::new(format!(
                "output directory does not exist: {}",
                parent.display()
            ))
            .in_handler(self.name()));
        }
        std::fs::create_dir_all(parent).map_err(|err| {
            HandlerError::new(format!("failed to create {}", parent.display()))
                .in_handler(self.name())
                .caused_by(err)
        })
    }
}

impl Handler for FileHandler {
    fn name(&self) -> &str {
        "FileHandler"
    }

    fn serializer(&self) -> Option<&dyn Serializer> {
        Some(self.serializer.as_ref())
    }

    fn preprocess(&self, mut data: ResultMapping) -> ResultMapping {
        if self.timestamp {
            data.insert(
                "_generated_at".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        data
    }

    fn write(&self, encoded: &str) -> Result<(), HandlerError> {
        self.ensure_parent()?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .map_err(|err| {
                HandlerError::new(format!("failed to open {}", self.path.display()))
                    .in_handler(self.name())
                    .with_data(encoded)
                    .caused_by(err)
            })?;
        let mut text = encoded.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        file.write_all(text.as_bytes()).map_err(|err| {
            HandlerError::new(format!("failed to write {}", self.path.display()))
                .in_handler(self.name())
                .with_data(encoded)
                .caused_by(err)
        })?;
        tracing::info!(path = %self.path.display(), bytes = text.len(), "output written");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Console
// ═══════════════════════════════════════════════════════════════════════

/// ANSI foreground colors (SGR 30–37).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    pub fn code(&self) -> u8 {
        match self {
            Color::Black => 30,
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
            Color::White => 37,
        }
    }
}

impl FromStr for Color {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "black" => Ok(Color::Black),
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "yellow" => Ok(Color::Yellow),
            "blue" => Ok(Color::Blue),
            "magenta" => Ok(Color::Magenta),
            "cyan" => Ok(Color::Cyan),
            "white" => Ok(Color::White),
            other => Err(FactoryError::InvalidOption {
                name: "color",
                reason: format!("unknown color '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStream {
    #[default]
    Stdout,
    Stderr,
}

impl ConsoleStream {
    fn is_tty(&self) -> bool {
        match self {
            ConsoleStream::Stdout => atty::is(atty::Stream::Stdout),
            ConsoleStream::Stderr => atty::is(atty::Stream::Stderr),
        }
    }
}

impl fmt::Display for ConsoleStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleStream::Stdout => f.write_str("stdout"),
            ConsoleStream::Stderr => f.write_str("stderr"),
        }
    }
}

pub struct ConsoleHandler {
    serializer: Box<dyn Serializer>,
    stream: ConsoleStream,
    color: Option<Color>,
    force_color: bool,
    indent: usize,
    prefix: String,
    type_tag: Option<String>,
}

impl ConsoleHandler {
    pub fn new(serializer: Box<dyn Serializer>) -> Self {
        Self {
            serializer,
            stream: ConsoleStream::Stdout,
            color: None,
            force_color: false,
            indent: 0,
            prefix: String::new(),
            type_tag: None,
        }
    }

    pub fn stream(mut self, stream: ConsoleStream) -> Self {
        self.stream = stream;
        self
    }

    /// Color output. Applied only when the stream is a terminal unless forced.
    pub fn color(mut self, color: Option<Color>) -> Self {
        self.color = color;
        self
    }

    pub fn force_color(mut self, force: bool) -> Self {
        self.force_color = force;
        self
    }

    pub fn indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Inject `_type: <tag>` into mapping payloads.
    pub fn type_tag(mut self, tag: Option<String>) -> Self {
        self.type_tag = tag;
        self
    }

    /// Apply prefix, indentation, and optional color to every line.
    pub fn render(&self, text: &str, colorize: bool) -> String {
        let pad = " ".repeat(self.indent);
        let body = text
            .split('\n')
            .map(|line| format!("{}{}{}", self.prefix, pad, line))
            .collect::<Vec<_>>()
            .join("\n");
        match self.color {
            Some(color) if colorize => format!("\x1b[{}m{}\x1b[0m", color.code(), body),
            _ => body,
        }
    }
}

impl Handler for ConsoleHandler {
    fn name(&self) -> &str {
        "ConsoleHandler"
    }

    fn serializer(&self) -> Option<&dyn Serializer> {
        Some(self.serializer.as_ref())
    }

    fn preprocess(&self, mut data: ResultMapping) -> ResultMapping {
        if let Some(tag) = &self.type_tag {
            data.insert("_type".to_string(), serde_json::Value::String(tag.clone()));
        }
        data
    }

    fn write(&self, encoded: &str) -> Result<(), HandlerError> {
        let colorize = self.color.is_some() && (self.force_color || self.stream.is_tty());
        let text = self.render(encoded.trim_end_matches('\n'), colorize);
        let result = match self.stream {
            ConsoleStream::Stdout => {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{}", text).and_then(|_| out.flush())
            }
            ConsoleStream::Stderr => {
                let mut err = std::io::stderr().lock();
                writeln!(err, "{}", text).and_then(|_| err.flush())
            }
        };
        result.map_err(|err| {
            HandlerError::new(format!("failed to write to {}", self.stream))
                .in_handler(self.name())
                .with_data(encoded)
                .caused_by(err)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Composite
// ═══════════════════════════════════════════════════════════════════════

/// Fans a payload out to every child handler.
///
/// A failing child is logged and skipped; the remaining children still
/// receive the payload and `handle` succeeds. Children are kept in insertion
/// order and the same instance cannot be added twice.
#[derive(Default)]
pub struct CompositeHandler {
    handlers: Vec<Arc<dyn Handler>>,
}

impl CompositeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child. Returns `false` if this exact instance is already present.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> bool {
        if self.contains(&handler) {
            tracing::warn!(handler = handler.name(), "handler already in composite");
            return false;
        }
        self.handlers.push(handler);
        true
    }

    pub fn remove_handler(&mut self, handler: &Arc<dyn Handler>) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        before != self.handlers.len()
    }

    pub fn contains(&self, handler: &Arc<dyn Handler>) -> bool {
        self.handlers.iter().any(|h| Arc::ptr_eq(h, handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    fn no_handlers(&self) -> HandlerError {
        HandlerError::new("No handlers available in the composite.").in_handler(self.name())
    }

    fn fan_out(
        &self,
        deliver: impl Fn(&dyn Handler) -> Result<(), HandlerError>,
    ) -> Result<(), HandlerError> {
        if self.handlers.is_empty() {
            return Err(self.no_handlers());
        }
        for handler in &self.handlers {
            if let Err(err) = deliver(handler.as_ref()) {
                tracing::error!(
                    handler = handler.name(),
                    error = %err,
                    "child handler failed; continuing with remaining handlers"
                );
            }
        }
        Ok(())
    }
}

impl Handler for CompositeHandler {
    fn name(&self) -> &str {
        "CompositeHandler"
    }

    fn serializer(&self) -> Option<&dyn Serializer> {
        None
    }

    fn write(&self, encoded: &str) -> Result<(), HandlerError> {
        self.fan_out(|h| h.write(encoded))
    }

    fn handle(&self, payload: &Payload) -> Result<(), HandlerError> {
        self.fan_out(|h| h.handle(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{JsonSerializer, PlainTextSerializer};
    use serde_json::json;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn mapping() -> ResultMapping {
        let mut data = ResultMapping::new();
        data.insert("k".into(), json!(["v1", "v2"]));
        data
    }

    /// Records payloads; optionally fails every call.
    struct Recorder {
        fail: bool,
        seen: RefCell<Vec<Payload>>,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                seen: RefCell::new(Vec::new()),
            })
        }
    }

    impl Handler for Recorder {
        fn name(&self) -> &str {
            if self.fail {
                "FailingRecorder"
            } else {
                "Recorder"
            }
        }

        fn serializer(&self) -> Option<&dyn Serializer> {
            None
        }

        fn write(&self, encoded: &str) -> Result<(), HandlerError> {
            self.handle(&Payload::Serialized(encoded.to_string()))
        }

        fn handle(&self, payload: &Payload) -> Result<(), HandlerError> {
            self.seen.borrow_mut().push(payload.clone());
            if self.fail {
                Err(HandlerError::new("boom").in_handler(self.name()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn composite_isolates_failing_child() {
        let h1 = Recorder::new(true);
        let h2 = Recorder::new(false);
        let mut composite = CompositeHandler::new();
        composite.add_handler(h1.clone());
        composite.add_handler(h2.clone());

        let payload = Payload::Mapping(mapping());
        composite.handle(&payload).unwrap();

        assert_eq!(h1.seen.borrow().len(), 1);
        assert_eq!(*h2.seen.borrow(), vec![payload]);
    }

    #[test]
    fn composite_rejects_duplicates_by_identity() {
        let h = Recorder::new(false);
        let twin = Recorder::new(false);
        let mut composite = CompositeHandler::new();
        assert!(composite.add_handler(h.clone()));
        assert!(!composite.add_handler(h.clone()));
        assert!(composite.add_handler(twin));
        assert_eq!(composite.len(), 2);
        assert_eq!(composite.handler_names(), vec!["Recorder", "Recorder"]);

        let as_dyn: Arc<dyn Handler> = h;
        assert!(composite.remove_handler(&as_dyn));
        assert!(!composite.remove_handler(&as_dyn));
        composite.clear();
        assert!(composite.is_empty());
    }

    #[test]
    fn empty_composite_fails() {
        let err = CompositeHandler::new()
            .handle(&Payload::Mapping(mapping()))
            .unwrap_err();
        assert_eq!(err.message, "No handlers available in the composite.");
        assert_eq!(err.handler.as_deref(), Some("CompositeHandler"));
    }

    #[test]
    fn file_handler_encodes_and_adds_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("result.json");
        let handler = FileHandler::new(&path, Box::new(JsonSerializer));
        handler.handle(&Payload::Mapping(mapping())).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.ends_with("}\n"));
        let back: ResultMapping = serde_json::from_str(&written).unwrap();
        assert_eq!(back, mapping());
    }

    #[test]
    fn file_handler_appends_preserialized_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let handler = FileHandler::new(&path, Box::new(PlainTextSerializer)).append(true);
        handler.handle(&Payload::from("first")).unwrap();
        handler.handle(&Payload::from("second\n")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn file_handler_without_dir_creation_requires_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.txt");
        let handler = FileHandler::new(&path, Box::new(JsonSerializer)).create_dirs(false);
        let err = handler.handle(&Payload::from("x")).unwrap_err();
        assert!(err.message.contains("does not exist"));
        assert_eq!(err.handler.as_deref(), Some("FileHandler"));
    }

    #[test]
    fn file_handler_timestamp_injection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stamped.json");
        let handler = FileHandler::new(&path, Box::new(JsonSerializer)).timestamp(true);
        handler.handle(&Payload::Mapping(mapping())).unwrap();
        let back: ResultMapping =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(back.contains_key("_generated_at"));
    }

    #[test]
    fn console_render_prefix_indent_color() {
        let handler = ConsoleHandler::new(Box::new(PlainTextSerializer))
            .prefix("> ")
            .indent(2)
            .color(Some(Color::Green));
        assert_eq!(handler.render("a\nb", false), ">   a\n>   b");
        assert_eq!(handler.render("a", true), "\x1b[32m>   a\x1b[0m");
    }

    #[test]
    fn console_type_tag_is_injected() {
        let handler = ConsoleHandler::new(Box::new(JsonSerializer))
            .type_tag(Some("console_output".into()));
        let data = handler.preprocess(mapping());
        assert_eq!(data["_type"], json!("console_output"));
    }

    #[test]
    fn color_names_parse() {
        assert_eq!("Cyan".parse::<Color>().unwrap().code(), 36);
        assert!("mauve".parse::<Color>().is_err());
    }
}
