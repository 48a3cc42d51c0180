//! Operations applied to fetchers without changing their types.
//!
//! A [`Visitor`] has one method per [`FetcherKind`]; each defaults to
//! [`Visitor::visit_default`], a no-op. [`dispatch`] selects the method from
//! the fetcher's kind tag through a fixed table.
//!
//! [`StatisticsVisitor`] is the stock visitor: given the mapping a fetch
//! produced, it records counts appropriate to the fetcher that produced it.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::fetcher::{Fetcher, FetcherKind};
use crate::models::ResultMapping;

pub trait Visitor {
    fn visit_code(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    fn visit_git(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    fn visit_web(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    fn visit_youtube(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    fn visit_pptx(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    fn visit_pptx_edit(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    fn visit_save(&mut self, fetcher: &dyn Fetcher) {
        self.visit_default(fetcher)
    }

    /// Fallback for kinds without a dedicated method.
    fn visit_default(&mut self, _fetcher: &dyn Fetcher) {}
}

type VisitFn = fn(&mut dyn Visitor, &dyn Fetcher);

fn route(kind: FetcherKind) -> VisitFn {
    match kind {
        FetcherKind::Code => |v, f| v.visit_code(f),
        FetcherKind::Git => |v, f| v.visit_git(f),
        FetcherKind::Web => |v, f| v.visit_web(f),
        FetcherKind::YouTube => |v, f| v.visit_youtube(f),
        FetcherKind::Pptx => |v, f| v.visit_pptx(f),
        FetcherKind::PptxEdit => |v, f| v.visit_pptx_edit(f),
        FetcherKind::Save => |v, f| v.visit_save(f),
        FetcherKind::Custom(_) => |v, f| v.visit_default(f),
    }
}

/// Invoke the visitor method matching the fetcher's kind.
pub fn dispatch(visitor: &mut dyn Visitor, fetcher: &dyn Fetcher) {
    route(fetcher.kind())(visitor, fetcher)
}

/// Collects counts from a fetch result.
///
/// | Fetcher | Statistics |
/// |---------|------------|
/// | code | `code_files`, `code_lines` |
/// | git | `git_commits` |
/// | web | `web_content_length` |
/// | youtube | `transcript_length`, `comment_count` |
/// | pptx | `slide_count` |
pub struct StatisticsVisitor<'a> {
    result: &'a ResultMapping,
    stats: BTreeMap<&'static str, usize>,
}

impl<'a> StatisticsVisitor<'a> {
    pub fn new(result: &'a ResultMapping) -> Self {
        Self {
            result,
            stats: BTreeMap::new(),
        }
    }

    pub fn stats(&self) -> &BTreeMap<&'static str, usize> {
        &self.stats
    }

    pub fn into_stats(self) -> BTreeMap<&'static str, usize> {
        self.stats
    }

    fn array_len(&self, key: &str) -> usize {
        self.result
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn text_len(&self, key: &str) -> usize {
        match self.result.get(key) {
            Some(Value::String(s)) => s.chars().count(),
            Some(Value::Array(lines)) => {
                let chars: usize = lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|l| l.chars().count())
                    .sum();
                // lines are measured space-joined
                chars + lines.len().saturating_sub(1)
            }
            _ => 0,
        }
    }
}

impl Visitor for StatisticsVisitor<'_> {
    fn visit_code(&mut self, _fetcher: &dyn Fetcher) {
        let lines = self
            .result
            .values()
            .filter_map(Value::as_array)
            .map(Vec::len)
            .sum();
        self.stats.insert("code_files", self.result.len());
        self.stats.insert("code_lines", lines);
    }

    fn visit_git(&mut self, _fetcher: &dyn Fetcher) {
        let commits = match self.result.get("commit_count").and_then(Value::as_u64) {
            Some(n) => n as usize,
            None => self.result.len(),
        };
        self.stats.insert("git_commits", commits);
    }

    fn visit_web(&mut self, _fetcher: &dyn Fetcher) {
        let len = self.text_len("web_content");
        self.stats.insert("web_content_length", len);
    }

    fn visit_youtube(&mut self, _fetcher: &dyn Fetcher) {
        if self.result.contains_key("transcript") {
            let len = self.text_len("transcript");
            self.stats.insert("transcript_length", len);
        }
        if self.result.contains_key("comments") {
            let count = self.array_len("comments");
            self.stats.insert("comment_count", count);
        }
    }

    fn visit_pptx(&mut self, _fetcher: &dyn Fetcher) {
        let count = self.array_len("slides");
        self.stats.insert("slide_count", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use serde_json::json;

    struct Stub(FetcherKind);

    impl Fetcher for Stub {
        fn kind(&self) -> FetcherKind {
            self.0
        }

        fn fetch(&self, _source: &str) -> Result<ResultMapping, FetchError> {
            Ok(ResultMapping::new())
        }

        fn accept(&self, visitor: &mut dyn Visitor) {
            dispatch(visitor, self);
        }
    }

    #[derive(Default)]
    struct Calls {
        specific: Vec<&'static str>,
        fallback: Vec<&'static str>,
    }

    impl Visitor for Calls {
        fn visit_code(&mut self, fetcher: &dyn Fetcher) {
            self.specific.push(fetcher.name());
        }

        fn visit_default(&mut self, fetcher: &dyn Fetcher) {
            self.fallback.push(fetcher.name());
        }
    }

    #[test]
    fn specific_method_for_known_kind_fallback_otherwise() {
        let mut calls = Calls::default();
        Stub(FetcherKind::Code).accept(&mut calls);
        Stub(FetcherKind::Custom("MysteryFetcher")).accept(&mut calls);
        Stub(FetcherKind::Git).accept(&mut calls);

        assert_eq!(calls.specific, vec!["CodeFetcher"]);
        assert_eq!(calls.fallback, vec!["MysteryFetcher", "GitFetcher"]);
    }

    #[test]
    fn code_statistics() {
        let mut result = ResultMapping::new();
        result.insert("a.py".into(), json!(["x", "y"]));
        result.insert("b.py".into(), json!(["z"]));
        let mut stats = StatisticsVisitor::new(&result);
        Stub(FetcherKind::Code).accept(&mut stats);
        assert_eq!(stats.stats()["code_files"], 2);
        assert_eq!(stats.stats()["code_lines"], 3);
    }

    #[test]
    fn git_statistics_prefer_commit_count() {
        let mut result = ResultMapping::new();
        result.insert("commit_count".into(), json!(42));
        let mut stats = StatisticsVisitor::new(&result);
        Stub(FetcherKind::Git).accept(&mut stats);
        assert_eq!(stats.into_stats()["git_commits"], 42);
    }

    #[test]
    fn web_and_unrecognized() {
        let mut result = ResultMapping::new();
        result.insert("web_content".into(), json!(["abc", "de"]));
        let mut stats = StatisticsVisitor::new(&result);
        Stub(FetcherKind::Web).accept(&mut stats);
        Stub(FetcherKind::Custom("Other")).accept(&mut stats);
        assert_eq!(stats.stats().len(), 1);
        assert_eq!(stats.stats()["web_content_length"], 6);
    }

    #[test]
    fn text_length_counts_joining_spaces() {
        let mut result = ResultMapping::new();
        result.insert("web_content".into(), json!(["one", "two", "three"]));
        result.insert("transcript".into(), json!("hello"));
        let mut stats = StatisticsVisitor::new(&result);
        Stub(FetcherKind::Web).accept(&mut stats);
        Stub(FetcherKind::YouTube).accept(&mut stats);
        assert_eq!(stats.stats()["web_content_length"], 13);
        assert_eq!(stats.stats()["transcript_length"], 5);

        let mut empty = ResultMapping::new();
        empty.insert("web_content".into(), json!([]));
        let mut stats = StatisticsVisitor::new(&empty);
        Stub(FetcherKind::Web).accept(&mut stats);
        assert_eq!(stats.stats()["web_content_length"], 0);
    }

    #[test]
    fn youtube_statistics_only_for_requested_parts() {
        let mut result = ResultMapping::new();
        result.insert("comments".into(), json!(["nice", "meh"]));
        let mut stats = StatisticsVisitor::new(&result);
        Stub(FetcherKind::YouTube).accept(&mut stats);
        assert_eq!(stats.stats().get("comment_count"), Some(&2));
        assert!(stats.stats().get("transcript_length").is_none());
    }
}
