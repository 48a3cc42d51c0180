//! The source-acquisition pipeline.
//!
//! ```text
//!            ┌──────────────┐    ┌─────────────────┐    ┌───────────────┐
//! source ──▶ │fetch_content │──▶ │ process_content │──▶ │ format_output │──▶ ResultMapping
//!            └──────────────┘    │  (Processor)    │    └───────────────┘
//!                                └─────────────────┘
//! ```
//!
//! Concrete fetchers implement [`FetchPipeline`]; every `FetchPipeline` is a
//! [`Fetcher`] through a blanket impl that sequences the three stages.
//! [`Fetcher`] is the object-safe face used by decorators, visitors, and the
//! CLI (`Box<dyn Fetcher>`).

use std::fmt;

use crate::error::FetchError;
use crate::models::ResultMapping;
use crate::visitor::{self, Visitor};

// ═══════════════════════════════════════════════════════════════════════
// Kind tag
// ═══════════════════════════════════════════════════════════════════════

/// Tag identifying a concrete fetcher type. Visitor dispatch matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetcherKind {
    Code,
    Git,
    Web,
    YouTube,
    Pptx,
    PptxEdit,
    Save,
    /// Fetchers defined outside this crate.
    Custom(&'static str),
}

impl FetcherKind {
    pub fn name(&self) -> &'static str {
        match self {
            FetcherKind::Code => "CodeFetcher",
            FetcherKind::Git => "GitFetcher",
            FetcherKind::Web => "WebFetcher",
            FetcherKind::YouTube => "YouTubeFetcher",
            FetcherKind::Pptx => "PptxFetcher",
            FetcherKind::PptxEdit => "PptxEditFetcher",
            FetcherKind::Save => "SaveFetcher",
            FetcherKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════

/// Object-safe fetcher contract.
pub trait Fetcher {
    fn kind(&self) -> FetcherKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Acquire, process, and format content from `source`.
    fn fetch(&self, source: &str) -> Result<ResultMapping, FetchError>;

    /// Hand this fetcher to `visitor`.
    fn accept(&self, visitor: &mut dyn Visitor);
}

/// Three-stage template implemented by concrete fetchers.
///
/// `fetch_content` talks to the external collaborator and may fail with
/// [`FetchError::SourceUnavailable`]; nothing here retries.
pub trait FetchPipeline {
    const KIND: FetcherKind;

    type Raw;
    type Processed;

    fn fetch_content(&self, source: &str) -> Result<Self::Raw, FetchError>;

    /// Delegates to the bound processor.
    fn process_content(&self, raw: Self::Raw) -> Result<Self::Processed, FetchError>;

    /// Wrap processed content under the canonical keys.
    fn format_output(&self, processed: Self::Processed) -> Result<ResultMapping, FetchError>;
}

impl<T: FetchPipeline> Fetcher for T {
    fn kind(&self) -> FetcherKind {
        T::KIND
    }

    fn fetch(&self, source: &str) -> Result<ResultMapping, FetchError> {
        let raw = self.fetch_content(source)?;
        let processed = self.process_content(raw)?;
        self.format_output(processed)
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor::dispatch(visitor, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use serde_json::json;
    use std::cell::RefCell;

    struct Echo {
        stages: RefCell<Vec<&'static str>>,
    }

    impl FetchPipeline for Echo {
        const KIND: FetcherKind = FetcherKind::Custom("EchoFetcher");
        type Raw = String;
        type Processed = Vec<String>;

        fn fetch_content(&self, source: &str) -> Result<String, FetchError> {
            self.stages.borrow_mut().push("fetch_content");
            if source.is_empty() {
                return Err(FetchError::unavailable("<empty>", "no source"));
            }
            Ok(source.to_string())
        }

        fn process_content(&self, raw: String) -> Result<Vec<String>, FetchError> {
            self.stages.borrow_mut().push("process_content");
            if raw == "bad" {
                return Err(ProcessError::InvalidInput("bad".into()).into());
            }
            Ok(raw.split(',').map(str::to_string).collect())
        }

        fn format_output(&self, processed: Vec<String>) -> Result<ResultMapping, FetchError> {
            self.stages.borrow_mut().push("format_output");
            let mut out = ResultMapping::new();
            out.insert("items".into(), json!(processed));
            Ok(out)
        }
    }

    fn echo() -> Echo {
        Echo {
            stages: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn fetch_runs_three_stages() {
        let f = echo();
        let out = f.fetch("a,b").unwrap();
        assert_eq!(out["items"], json!(["a", "b"]));
        assert_eq!(
            *f.stages.borrow(),
            vec!["fetch_content", "process_content", "format_output"]
        );
    }

    #[test]
    fn source_unavailable_propagates() {
        let f = echo();
        let err = f.fetch("").unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable { .. }));
        assert_eq!(*f.stages.borrow(), vec!["fetch_content"]);
    }

    #[test]
    fn processing_error_is_wrapped() {
        let err = echo().fetch("bad").unwrap_err();
        assert!(matches!(err, FetchError::Process(ProcessError::InvalidInput(_))));
    }

    #[test]
    fn name_comes_from_kind() {
        assert_eq!(echo().name(), "EchoFetcher");
        assert_eq!(FetcherKind::YouTube.to_string(), "YouTubeFetcher");
    }
}
