//! The four-stage content transformation pipeline.
//!
//! ```text
//! input ─▶ preprocess ─▶ extract_content ─▶ main_process ─▶ postprocess ─▶ output
//! ```
//!
//! Implementors supply the four stages; [`Processor::process`] runs them in
//! order, exactly once each. Stages read only the processor's construction-time
//! configuration and the per-call `options`; no stage keeps state across calls.
//!
//! Concrete processors live next to the fetcher that uses them:
//!
//! | Processor | Module |
//! |-----------|--------|
//! | `CodeProcessor` | [`crate::source_code`] |
//! | `GitCommitProcessor` | [`crate::source_git`] |
//! | `WebProcessor` | [`crate::source_web`] |
//! | `YouTubeProcessor` | [`crate::source_youtube`] |
//! | `PptxProcessor`, `PptxEditProcessor` | [`crate::source_pptx`] |
//! | `SaveProcessor` | [`crate::source_save`] |

use crate::error::ProcessError;

pub trait Processor {
    type Input;
    type Prepared;
    type Extracted;
    type Processed;
    type Output;
    /// Per-call options. Use `()` when a processor takes none.
    type Options: Default;

    /// Cheap normalization (strip, split into units).
    fn preprocess(
        &self,
        input: Self::Input,
        options: &Self::Options,
    ) -> Result<Self::Prepared, ProcessError>;

    /// Select the relevant subset of the prepared content.
    fn extract_content(
        &self,
        prepared: Self::Prepared,
        options: &Self::Options,
    ) -> Result<Self::Extracted, ProcessError>;

    /// Apply the configured transformation rules.
    fn main_process(
        &self,
        extracted: Self::Extracted,
        options: &Self::Options,
    ) -> Result<Self::Processed, ProcessError>;

    /// Final shape adjustment requested by the caller.
    fn postprocess(
        &self,
        processed: Self::Processed,
        options: &Self::Options,
    ) -> Result<Self::Output, ProcessError>;

    fn process(
        &self,
        input: Self::Input,
        options: &Self::Options,
    ) -> Result<Self::Output, ProcessError> {
        let prepared = self.preprocess(input, options)?;
        let extracted = self.extract_content(prepared, options)?;
        let processed = self.main_process(extracted, options)?;
        self.postprocess(processed, options)
    }
}

/// Truncate to `max` characters, appending `"..."` when anything was cut.
pub fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records every stage it runs.
    #[derive(Default)]
    struct Recording {
        calls: RefCell<Vec<&'static str>>,
    }

    impl Processor for Recording {
        type Input = String;
        type Prepared = String;
        type Extracted = String;
        type Processed = String;
        type Output = String;
        type Options = ();

        fn preprocess(&self, input: String, _: &()) -> Result<String, ProcessError> {
            self.calls.borrow_mut().push("preprocess");
            Ok(format!("{input}|pre"))
        }

        fn extract_content(&self, prepared: String, _: &()) -> Result<String, ProcessError> {
            self.calls.borrow_mut().push("extract_content");
            Ok(format!("{prepared}|extract"))
        }

        fn main_process(&self, extracted: String, _: &()) -> Result<String, ProcessError> {
            self.calls.borrow_mut().push("main_process");
            Ok(format!("{extracted}|main"))
        }

        fn postprocess(&self, processed: String, _: &()) -> Result<String, ProcessError> {
            self.calls.borrow_mut().push("postprocess");
            Ok(format!("{processed}|post"))
        }
    }

    #[test]
    fn stages_run_in_order_exactly_once() {
        let p = Recording::default();
        let out = p.process("x".into(), &()).unwrap();
        assert_eq!(out, "x|pre|extract|main|post");
        assert_eq!(
            *p.calls.borrow(),
            vec!["preprocess", "extract_content", "main_process", "postprocess"]
        );
    }

    #[test]
    fn repeated_calls_do_not_share_state() {
        let p = Recording::default();
        let first = p.process("a".into(), &()).unwrap();
        let second = p.process("a".into(), &()).unwrap();
        assert_eq!(first, second);
        assert_eq!(p.calls.borrow().len(), 8);
    }

    struct FailsInExtract {
        reached_main: RefCell<bool>,
    }

    impl Processor for FailsInExtract {
        type Input = ();
        type Prepared = ();
        type Extracted = ();
        type Processed = ();
        type Output = ();
        type Options = ();

        fn preprocess(&self, _: (), _: &()) -> Result<(), ProcessError> {
            Ok(())
        }
        fn extract_content(&self, _: (), _: &()) -> Result<(), ProcessError> {
            Err(ProcessError::InvalidInput("nothing to extract".into()))
        }
        fn main_process(&self, _: (), _: &()) -> Result<(), ProcessError> {
            *self.reached_main.borrow_mut() = true;
            Ok(())
        }
        fn postprocess(&self, _: (), _: &()) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    #[test]
    fn failing_stage_stops_the_pipeline() {
        let p = FailsInExtract {
            reached_main: RefCell::new(false),
        };
        assert!(p.process((), &()).is_err());
        assert!(!*p.reached_main.borrow());
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("héllo", 5), "héllo");
        assert_eq!(truncate_with_ellipsis("ééééé", 2), "éé...");
    }
}
