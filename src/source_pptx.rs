//! PowerPoint decks.
//!
//! - [`PptxFetcher`] reads slide text, speaker notes and core properties.
//!   Output: `slides` → `[{slide_number, content, notes}]`, `metadata` → record.
//! - [`PptxEditFetcher`] replaces slide text or notes and carries the modified
//!   deck base64-encoded under `presentation`; [`PptxWriteHandler`] writes it.
//!
//! Slide numbers are 1-based in output and on the command line, 0-based
//! everywhere else.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FetchError, HandlerError, ProcessError};
use crate::fetcher::{FetchPipeline, FetcherKind};
use crate::handler::Handler;
use crate::models::{Payload, ResultMapping};
use crate::pptx::{Presentation, PptxError};
use crate::processor::Processor;
use crate::serializer::Serializer;

impl From<PptxError> for ProcessError {
    fn from(err: PptxError) -> Self {
        ProcessError::InvalidInput(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Slide selection
// ═══════════════════════════════════════════════════════════════════════

/// Which slides to read. Indices are 0-based; `Range` is `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlideSelection {
    #[default]
    All,
    Single(usize),
    Range { start: usize, end: usize },
}

impl SlideSelection {
    pub fn range(start: usize, end: usize) -> Result<Self, ProcessError> {
        if start >= end {
            return Err(ProcessError::InvalidRange { start, end });
        }
        Ok(SlideSelection::Range { start, end })
    }

    /// Concrete indices for a deck of `count` slides. Never clamps.
    pub fn resolve(&self, count: usize) -> Result<Range<usize>, ProcessError> {
        match *self {
            SlideSelection::All => Ok(0..count),
            SlideSelection::Single(index) => {
                if index >= count {
                    return Err(ProcessError::OutOfRange {
                        what: "slide",
                        requested: index + 1,
                        available: count,
                    });
                }
                Ok(index..index + 1)
            }
            SlideSelection::Range { start, end } => {
                if start >= end {
                    return Err(ProcessError::InvalidRange { start, end });
                }
                if end > count {
                    return Err(ProcessError::OutOfRange {
                        what: "slide",
                        requested: end,
                        available: count,
                    });
                }
                Ok(start..end)
            }
        }
    }
}

/// Parses the 1-based command-line form: `"3"` or `"1-3"` (inclusive).
impl FromStr for SlideSelection {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ProcessError::InvalidInput(format!(
                "slide selection must be a number or a range like 1-3 (counting from 1), got {s:?}"
            ))
        };
        let number = |part: &str| part.trim().parse::<usize>().map_err(|_| invalid());

        match s.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                if start == 0 || end < start {
                    return Err(invalid());
                }
                if start == end {
                    return Ok(SlideSelection::Single(start - 1));
                }
                SlideSelection::range(start - 1, end)
            }
            None => match number(s)? {
                0 => Err(invalid()),
                n => Ok(SlideSelection::Single(n - 1)),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reading
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct PptxOptions {
    pub selection: SlideSelection,
    pub only_content: bool,
    pub only_notes: bool,
    pub only_metadata: bool,
    pub no_metadata: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideRecord {
    pub slide_number: usize,
    pub content: String,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct DeckContent {
    pub slides: Vec<SlideRecord>,
    pub metadata: BTreeMap<String, String>,
    pub slide_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PptxProcessor;

impl Processor for PptxProcessor {
    type Input = Presentation;
    type Prepared = Presentation;
    type Extracted = DeckContent;
    type Processed = DeckContent;
    type Output = ResultMapping;
    type Options = PptxOptions;

    fn preprocess(&self, deck: Presentation, _: &PptxOptions) -> Result<Presentation, ProcessError> {
        Ok(deck)
    }

    fn extract_content(
        &self,
        deck: Presentation,
        options: &PptxOptions,
    ) -> Result<DeckContent, ProcessError> {
        let indices = options.selection.resolve(deck.slide_count())?;
        let mut slides = Vec::with_capacity(indices.len());
        for index in indices {
            slides.push(SlideRecord {
                slide_number: index + 1,
                content: deck.slide_text(index)?,
                notes: deck.notes_text(index)?,
            });
        }
        Ok(DeckContent {
            slides,
            metadata: deck.core_properties()?,
            slide_count: deck.slide_count(),
        })
    }

    fn main_process(&self, content: DeckContent, _: &PptxOptions) -> Result<DeckContent, ProcessError> {
        Ok(content)
    }

    fn postprocess(
        &self,
        content: DeckContent,
        options: &PptxOptions,
    ) -> Result<ResultMapping, ProcessError> {
        let mut out = ResultMapping::new();
        if !options.only_metadata {
            let slides = content
                .slides
                .into_iter()
                .map(|slide| {
                    let mut record = Map::new();
                    record.insert("slide_number".into(), json!(slide.slide_number));
                    if options.only_content {
                        record.insert("content".into(), Value::String(slide.content));
                    } else if options.only_notes {
                        record.insert("notes".into(), Value::String(slide.notes));
                    } else {
                        record.insert("content".into(), Value::String(slide.content));
                        record.insert("notes".into(), Value::String(slide.notes));
                    }
                    Value::Object(record)
                })
                .collect();
            out.insert("slides".into(), Value::Array(slides));
        }
        if options.only_metadata || !options.no_metadata {
            let mut metadata: Map<String, Value> = content
                .metadata
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            metadata.insert("slide_count".into(), json!(content.slide_count));
            out.insert("metadata".into(), Value::Object(metadata));
        }
        Ok(out)
    }
}

fn open_deck(source: &str) -> Result<Presentation, FetchError> {
    let path = Path::new(source);
    if !path.is_file() {
        return Err(FetchError::unavailable(source, "file not found"));
    }
    Presentation::open(path).map_err(|e| FetchError::unavailable(source, e))
}

pub struct PptxFetcher {
    processor: PptxProcessor,
    options: PptxOptions,
}

impl PptxFetcher {
    pub fn new(processor: PptxProcessor, options: PptxOptions) -> Self {
        Self { processor, options }
    }
}

impl FetchPipeline for PptxFetcher {
    const KIND: FetcherKind = FetcherKind::Pptx;

    type Raw = Presentation;
    type Processed = ResultMapping;

    fn fetch_content(&self, source: &str) -> Result<Presentation, FetchError> {
        let deck = open_deck(source)?;
        tracing::debug!(path = source, slides = deck.slide_count(), "presentation opened");
        Ok(deck)
    }

    fn process_content(&self, raw: Presentation) -> Result<ResultMapping, FetchError> {
        Ok(self.processor.process(raw, &self.options)?)
    }

    fn format_output(&self, processed: ResultMapping) -> Result<ResultMapping, FetchError> {
        Ok(processed)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Editing
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditTarget {
    #[default]
    Content,
    Notes,
}

impl EditTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditTarget::Content => "content",
            EditTarget::Notes => "notes",
        }
    }
}

/// Replaces the text of one slide (or every slide when `slide_index` is `None`).
#[derive(Debug, Clone)]
pub struct PptxEditProcessor {
    pub slide_index: Option<usize>,
    pub text: String,
    pub target: EditTarget,
}

pub struct EditedDeck {
    pub deck: Presentation,
    pub updated_slides: Vec<usize>,
}

impl Processor for PptxEditProcessor {
    type Input = Presentation;
    type Prepared = Presentation;
    type Extracted = (Presentation, Vec<usize>);
    type Processed = EditedDeck;
    type Output = EditedDeck;
    type Options = ();

    fn preprocess(&self, deck: Presentation, _: &()) -> Result<Presentation, ProcessError> {
        Ok(deck)
    }

    fn extract_content(
        &self,
        deck: Presentation,
        _: &(),
    ) -> Result<(Presentation, Vec<usize>), ProcessError> {
        let count = deck.slide_count();
        let targets = match self.slide_index {
            Some(index) if index >= count => {
                return Err(ProcessError::OutOfRange {
                    what: "slide",
                    requested: index + 1,
                    available: count,
                })
            }
            Some(index) => vec![index],
            None => (0..count).collect(),
        };
        Ok((deck, targets))
    }

    fn main_process(
        &self,
        (mut deck, targets): (Presentation, Vec<usize>),
        _: &(),
    ) -> Result<EditedDeck, ProcessError> {
        if self.text.is_empty() {
            return Ok(EditedDeck {
                deck,
                updated_slides: Vec::new(),
            });
        }
        for &index in &targets {
            match self.target {
                EditTarget::Content => deck.set_slide_text(index, &self.text)?,
                EditTarget::Notes => deck.set_notes_text(index, &self.text)?,
            }
        }
        Ok(EditedDeck {
            deck,
            updated_slides: targets.into_iter().map(|i| i + 1).collect(),
        })
    }

    fn postprocess(&self, edited: EditedDeck, _: &()) -> Result<EditedDeck, ProcessError> {
        Ok(edited)
    }
}

pub struct PptxEditFetcher {
    processor: PptxEditProcessor,
}

impl PptxEditFetcher {
    pub fn new(processor: PptxEditProcessor) -> Self {
        Self { processor }
    }
}

impl FetchPipeline for PptxEditFetcher {
    const KIND: FetcherKind = FetcherKind::PptxEdit;

    type Raw = Presentation;
    type Processed = EditedDeck;

    fn fetch_content(&self, source: &str) -> Result<Presentation, FetchError> {
        open_deck(source)
    }

    fn process_content(&self, raw: Presentation) -> Result<EditedDeck, FetchError> {
        Ok(self.processor.process(raw, &())?)
    }

    fn format_output(&self, edited: EditedDeck) -> Result<ResultMapping, FetchError> {
        let bytes = edited
            .deck
            .to_bytes()
            .map_err(|e| FetchError::Process(e.into()))?;
        let mut out = ResultMapping::new();
        out.insert("presentation".into(), Value::String(BASE64.encode(bytes)));
        out.insert("updated_slides".into(), json!(edited.updated_slides));
        out.insert("target".into(), json!(self.processor.target.as_str()));
        Ok(out)
    }
}

/// Writes the `presentation` entry of an edit result to a `.pptx` file.
pub struct PptxWriteHandler {
    output: PathBuf,
}

impl PptxWriteHandler {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Handler for PptxWriteHandler {
    fn name(&self) -> &str {
        "PptxWriteHandler"
    }

    fn serializer(&self) -> Option<&dyn Serializer> {
        None
    }

    /// `encoded` is the base64 deck.
    fn write(&self, encoded: &str) -> Result<(), HandlerError> {
        let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
            HandlerError::new("presentation payload is not valid base64")
                .in_handler(self.name())
                .caused_by(e)
        })?;
        std::fs::write(&self.output, bytes).map_err(|e| {
            HandlerError::new(format!("failed to write {}", self.output.display()))
                .in_handler(self.name())
                .caused_by(e)
        })?;
        tracing::info!(path = %self.output.display(), "presentation saved");
        Ok(())
    }

    fn handle(&self, payload: &Payload) -> Result<(), HandlerError> {
        match payload {
            Payload::Serialized(text) => self.write(text),
            Payload::Mapping(data) => match data.get("presentation").and_then(Value::as_str) {
                Some(encoded) => self.write(encoded),
                None => Err(HandlerError::new("no presentation in result")
                    .in_handler(self.name())
                    .with_data(&serde_json::to_string(data).unwrap_or_default())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use crate::pptx::fixtures::deck;
    use tempfile::TempDir;

    fn five_slides() -> Presentation {
        Presentation::from_bytes(&deck(&[
            ("One", "first", Some("n1")),
            ("Two", "second", Some("n2")),
            ("Three", "third", None),
            ("Four", "fourth", None),
            ("Five", "fifth", Some("n5")),
        ]))
        .unwrap()
    }

    fn slide_numbers(out: &ResultMapping) -> Vec<u64> {
        out["slides"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["slide_number"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn range_returns_exactly_requested_slides_with_metadata() {
        let options = PptxOptions {
            selection: SlideSelection::range(0, 2).unwrap(),
            ..PptxOptions::default()
        };
        let out = PptxProcessor.process(five_slides(), &options).unwrap();
        assert_eq!(slide_numbers(&out), vec![1, 2]);
        assert_eq!(out["slides"][1]["content"], "Two second");
        assert_eq!(out["slides"][0]["notes"], "n1");
        assert_eq!(out["metadata"]["title"], "Quarterly Review");
        assert_eq!(out["metadata"]["slide_count"], 5);
    }

    #[test]
    fn no_metadata_drops_the_key() {
        let options = PptxOptions {
            selection: SlideSelection::range(0, 2).unwrap(),
            no_metadata: true,
            ..PptxOptions::default()
        };
        let out = PptxProcessor.process(five_slides(), &options).unwrap();
        assert_eq!(slide_numbers(&out), vec![1, 2]);
        assert!(!out.contains_key("metadata"));
    }

    #[test]
    fn inverted_range_is_a_range_error() {
        assert_eq!(
            SlideSelection::range(4, 2),
            Err(ProcessError::InvalidRange { start: 4, end: 2 })
        );
        let options = PptxOptions {
            selection: SlideSelection::Range { start: 4, end: 2 },
            ..PptxOptions::default()
        };
        let err = PptxProcessor.process(five_slides(), &options).unwrap_err();
        assert_eq!(err, ProcessError::InvalidRange { start: 4, end: 2 });
    }

    #[test]
    fn selection_past_the_deck_is_out_of_range() {
        let options = PptxOptions {
            selection: SlideSelection::Single(5),
            ..PptxOptions::default()
        };
        let err = PptxProcessor.process(five_slides(), &options).unwrap_err();
        assert!(matches!(err, ProcessError::OutOfRange { requested: 6, available: 5, .. }));

        let options = PptxOptions {
            selection: SlideSelection::range(3, 9).unwrap(),
            ..PptxOptions::default()
        };
        assert!(PptxProcessor.process(five_slides(), &options).is_err());
    }

    #[test]
    fn only_flags_shape_the_output() {
        let notes = PptxOptions {
            only_notes: true,
            no_metadata: true,
            ..PptxOptions::default()
        };
        let out = PptxProcessor.process(five_slides(), &notes).unwrap();
        assert_eq!(out["slides"][4], json!({"slide_number": 5, "notes": "n5"}));

        let meta = PptxOptions {
            only_metadata: true,
            ..PptxOptions::default()
        };
        let out = PptxProcessor.process(five_slides(), &meta).unwrap();
        assert!(!out.contains_key("slides"));
        assert_eq!(out["metadata"]["creator"], "Ops Team");
    }

    #[test]
    fn command_line_selection_is_one_based() {
        assert_eq!("3".parse::<SlideSelection>().unwrap(), SlideSelection::Single(2));
        assert_eq!(
            "1-3".parse::<SlideSelection>().unwrap(),
            SlideSelection::Range { start: 0, end: 3 }
        );
        assert_eq!("2-2".parse::<SlideSelection>().unwrap(), SlideSelection::Single(1));
        assert!("0".parse::<SlideSelection>().is_err());
        assert!("3-1".parse::<SlideSelection>().is_err());
        assert!("a-b".parse::<SlideSelection>().is_err());
    }

    #[test]
    fn edit_round_trips_through_handler() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("deck.pptx");
        let output = dir.path().join("edited.pptx");
        std::fs::write(&input, five_slides().to_bytes().unwrap()).unwrap();

        let fetcher = PptxEditFetcher::new(PptxEditProcessor {
            slide_index: Some(2),
            text: "Replaced".into(),
            target: EditTarget::Content,
        });
        let out = fetcher.fetch(input.to_str().unwrap()).unwrap();
        assert_eq!(out["updated_slides"], json!([3]));

        PptxWriteHandler::new(&output)
            .handle(&Payload::Mapping(out))
            .unwrap();
        let edited = Presentation::open(&output).unwrap();
        assert_eq!(edited.slide_text(2).unwrap(), "Replaced third");
        assert_eq!(edited.slide_text(1).unwrap(), "Two second");
    }

    #[test]
    fn edit_out_of_range_fails() {
        let processor = PptxEditProcessor {
            slide_index: Some(9),
            text: "x".into(),
            target: EditTarget::Notes,
        };
        let err = processor.process(five_slides(), &()).err().unwrap();
        assert!(matches!(err, ProcessError::OutOfRange { requested: 10, .. }));
    }

    #[test]
    fn empty_text_changes_nothing() {
        let processor = PptxEditProcessor {
            slide_index: None,
            text: String::new(),
            target: EditTarget::Content,
        };
        let edited = processor.process(five_slides(), &()).ok().unwrap();
        assert!(edited.updated_slides.is_empty());
        assert_eq!(edited.deck.slide_text(0).unwrap(), "One first");
    }

    #[test]
    fn missing_file_is_unavailable() {
        let fetcher = PptxFetcher::new(PptxProcessor, PptxOptions::default());
        assert!(matches!(
            fetcher.fetch("/no/such/deck.pptx"),
            Err(FetchError::SourceUnavailable { .. })
        ));
    }
}
