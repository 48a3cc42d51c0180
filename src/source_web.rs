//! Web pages.
//!
//! [`WebFetcher`] downloads a page with `reqwest::blocking`; [`WebProcessor`]
//! turns HTML into cleaned lines using one of several [`ExtractionMethod`]s
//! built on `scraper`.
//!
//! | Method | Strategy |
//! |--------|----------|
//! | `custom` | `<article>` or a content/post `<div>`, else `<body>` minus header/nav/footer/aside |
//! | `raw` | every text node outside `<script>`/`<style>` |
//! | `html2text` | whole document, one line per block element |
//! | `readability` | container with the most paragraph text |
//!
//! Output: `web_content` → lines, plus `metadata` when requested.

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{FactoryError, FetchError, ProcessError};
use crate::fetcher::{FetchPipeline, FetcherKind};
use crate::models::ResultMapping;
use crate::processor::{truncate_with_ellipsis, Processor};

const WORDS_PER_MINUTE: f64 = 200.0;

const NEVER_TEXT: &[&str] = &["script", "style", "noscript", "template", "head"];
const CHROME: &[&str] = &["header", "nav", "footer", "aside"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "pre", "blockquote", "table", "tr", "header", "footer", "nav", "aside", "figure",
    "figcaption", "dd", "dt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Custom,
    Raw,
    Html2Text,
    Readability,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Custom => "custom",
            ExtractionMethod::Raw => "raw",
            ExtractionMethod::Html2Text => "html2text",
            ExtractionMethod::Readability => "readability",
        }
    }

    /// Extract plain text from an HTML document.
    pub fn extract(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        match self {
            ExtractionMethod::Custom => extract_custom(&document),
            ExtractionMethod::Raw => {
                let mut out = String::new();
                collect_text(document.root_element(), NEVER_TEXT, false, &mut out);
                out
            }
            ExtractionMethod::Html2Text => {
                let mut out = String::new();
                collect_text(document.root_element(), NEVER_TEXT, true, &mut out);
                out
            }
            ExtractionMethod::Readability => {
                extract_readability(&document).unwrap_or_else(|| extract_custom(&document))
            }
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(ExtractionMethod::Custom),
            "raw" => Ok(ExtractionMethod::Raw),
            "html2text" => Ok(ExtractionMethod::Html2Text),
            "readability" => Ok(ExtractionMethod::Readability),
            other => Err(FactoryError::UnsupportedMethod(other.to_string())),
        }
    }
}

fn collect_text(element: ElementRef<'_>, skip: &[&str], blocks: bool, out: &mut String) {
    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if skip.contains(&name) {
                continue;
            }
            if name == "br" {
                out.push('\n');
                continue;
            }
            let block = blocks && BLOCK_TAGS.contains(&name);
            if block {
                out.push('\n');
            }
            collect_text(child_el, skip, blocks, out);
            if block {
                out.push('\n');
            }
        } else if let Node::Text(text) = child.value() {
            out.push_str(text);
        }
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn extract_custom(document: &Html) -> String {
    let content_div = Selector::parse("div[class]").ok().and_then(|sel| {
        document.select(&sel).find(|el| {
            el.value()
                .attr("class")
                .map(|class| ["article", "content", "post"].iter().any(|w| class.contains(w)))
                .unwrap_or(false)
        })
    });

    let mut out = String::new();
    if let Some(main) = select_first(document, "article").or(content_div) {
        collect_text(main, NEVER_TEXT, true, &mut out);
        return out;
    }

    let skip: Vec<&str> = NEVER_TEXT.iter().chain(CHROME).copied().collect();
    let root = select_first(document, "body").unwrap_or_else(|| document.root_element());
    collect_text(root, &skip, true, &mut out);
    out
}

fn extract_readability(document: &Html) -> Option<String> {
    let containers = Selector::parse("article, main, section, div").ok()?;
    let paragraphs = Selector::parse("p").ok()?;

    let best = document
        .select(&containers)
        .map(|el| {
            let score: usize = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| paragraphs.matches(child))
                .map(|p| p.text().map(str::len).sum::<usize>())
                .sum();
            (score, el)
        })
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)?;

    let mut out = String::new();
    collect_text(best.1, NEVER_TEXT, true, &mut out);
    Some(out)
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = select_first(&document, "title")?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Processor
// ═══════════════════════════════════════════════════════════════════════

pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebContent {
    pub lines: Vec<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct WebProcessor {
    method: ExtractionMethod,
    remove_excess_whitespace: bool,
    remove_urls: bool,
    min_line_length: usize,
    max_line_length: Option<usize>,
    extract_metadata: bool,
    whitespace: Regex,
    url: Regex,
    word: Regex,
}

impl WebProcessor {
    pub fn builder(method: ExtractionMethod) -> WebProcessorBuilder {
        WebProcessorBuilder {
            method,
            remove_excess_whitespace: true,
            remove_urls: false,
            min_line_length: 0,
            max_line_length: None,
            extract_metadata: false,
        }
    }

    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    fn metadata(&self, title: Option<String>, lines: &[String]) -> Value {
        let words: usize = lines.iter().map(|l| self.word.find_iter(l).count()).sum();
        let title = title
            .or_else(|| lines.iter().find(|l| !l.trim().is_empty()).cloned())
            .unwrap_or_default();
        json!({
            "title": title,
            "word_count": words,
            "estimated_read_time": (words as f64 / WORDS_PER_MINUTE).round() as u64,
        })
    }
}

pub struct WebProcessorBuilder {
    method: ExtractionMethod,
    remove_excess_whitespace: bool,
    remove_urls: bool,
    min_line_length: usize,
    max_line_length: Option<usize>,
    extract_metadata: bool,
}

impl WebProcessorBuilder {
    pub fn remove_excess_whitespace(mut self, on: bool) -> Self {
        self.remove_excess_whitespace = on;
        self
    }

    pub fn remove_urls(mut self, on: bool) -> Self {
        self.remove_urls = on;
        self
    }

    pub fn line_bounds(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_line_length = min;
        self.max_line_length = max;
        self
    }

    pub fn extract_metadata(mut self, on: bool) -> Self {
        self.extract_metadata = on;
        self
    }

    pub fn build(self) -> Result<WebProcessor, FactoryError> {
        if let Some(max) = self.max_line_length {
            if max < self.min_line_length {
                return Err(FactoryError::InvalidOption {
                    name: "max_line_length",
                    reason: "must be >= min_line_length".into(),
                });
            }
        }
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| FactoryError::InvalidOption {
                name: "pattern",
                reason: e.to_string(),
            })
        };
        Ok(WebProcessor {
            method: self.method,
            remove_excess_whitespace: self.remove_excess_whitespace,
            remove_urls: self.remove_urls,
            min_line_length: self.min_line_length,
            max_line_length: self.max_line_length,
            extract_metadata: self.extract_metadata,
            whitespace: compile(r"\s+")?,
            url: compile(r"https?://[^\s<>\x22']+")?,
            word: compile(r"\w+")?,
        })
    }
}

impl Processor for WebProcessor {
    type Input = String;
    type Prepared = String;
    type Extracted = ExtractedPage;
    type Processed = WebContent;
    type Output = WebContent;
    type Options = ();

    fn preprocess(&self, html: String, _: &()) -> Result<String, ProcessError> {
        Ok(html.replace("\r\n", "\n"))
    }

    fn extract_content(&self, html: String, _: &()) -> Result<ExtractedPage, ProcessError> {
        Ok(ExtractedPage {
            title: page_title(&html),
            text: self.method.extract(&html),
        })
    }

    fn main_process(&self, page: ExtractedPage, _: &()) -> Result<WebContent, ProcessError> {
        let lines: Vec<String> = page
            .text
            .split('\n')
            .map(|line| {
                let mut line = line.to_string();
                if self.remove_urls {
                    line = self.url.replace_all(&line, "").into_owned();
                }
                if self.remove_excess_whitespace {
                    line = self.whitespace.replace_all(&line, " ").into_owned();
                }
                line.trim().to_string()
            })
            .filter(|line| !line.is_empty())
            .filter(|line| line.chars().count() >= self.min_line_length)
            .map(|line| match self.max_line_length {
                Some(max) => truncate_with_ellipsis(&line, max),
                None => line,
            })
            .collect();

        let metadata = if self.extract_metadata {
            Some(self.metadata(page.title, &lines))
        } else {
            None
        };
        Ok(WebContent { lines, metadata })
    }

    fn postprocess(&self, content: WebContent, _: &()) -> Result<WebContent, ProcessError> {
        Ok(content)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

pub struct WebFetcher {
    client: reqwest::blocking::Client,
    processor: WebProcessor,
}

impl WebFetcher {
    pub fn new(processor: WebProcessor, user_agent: &str) -> Result<Self, FactoryError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FactoryError::InvalidOption {
                name: "user_agent",
                reason: e.to_string(),
            })?;
        Ok(Self { client, processor })
    }
}

impl FetchPipeline for WebFetcher {
    const KIND: FetcherKind = FetcherKind::Web;

    type Raw = String;
    type Processed = WebContent;

    fn fetch_content(&self, source: &str) -> Result<String, FetchError> {
        let url = url::Url::parse(source).map_err(|e| FetchError::unavailable(source, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::unavailable(source, "only http and https URLs are supported"));
        }
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::unavailable(source, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::unavailable(source, format!("HTTP {}", status)));
        }
        let body = response
            .text()
            .map_err(|e| FetchError::unavailable(source, e))?;
        tracing::debug!(url = source, bytes = body.len(), "page downloaded");
        Ok(body)
    }

    fn process_content(&self, raw: String) -> Result<WebContent, FetchError> {
        Ok(self.processor.process(raw, &())?)
    }

    fn format_output(&self, content: WebContent) -> Result<ResultMapping, FetchError> {
        let mut out = ResultMapping::new();
        out.insert("web_content".into(), json!(content.lines));
        if let Some(metadata) = content.metadata {
            out.insert("metadata".into(), metadata);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;

    const PAGE: &str = r#"<html><head><title>Release Notes</title><style>p{}</style></head>
<body>
<nav>Home | Blog</nav>
<header>Site header</header>
<div class="post-body">
  <p>Spindle   ships today.</p>
  <p>Docs at https://example.com/docs now.</p>
  <script>track()</script>
</div>
<footer>Copyright</footer>
</body></html>"#;

    fn processor(method: ExtractionMethod) -> WebProcessorBuilder {
        WebProcessor::builder(method)
    }

    #[test]
    fn custom_prefers_content_container() {
        let p = processor(ExtractionMethod::Custom).build().unwrap();
        let out = p.process(PAGE.to_string(), &()).unwrap();
        assert_eq!(
            out.lines,
            vec!["Spindle ships today.", "Docs at https://example.com/docs now."]
        );
        assert!(out.metadata.is_none());
    }

    #[test]
    fn custom_falls_back_to_body_without_chrome() {
        let html = "<body><nav>menu</nav><p>Only this</p><footer>f</footer></body>";
        let text = ExtractionMethod::Custom.extract(html);
        assert_eq!(text.trim(), "Only this");
    }

    #[test]
    fn raw_keeps_navigation_but_not_scripts() {
        let text = ExtractionMethod::Raw.extract(PAGE);
        assert!(text.contains("Home | Blog"));
        assert!(!text.contains("track()"));
    }

    #[test]
    fn readability_picks_densest_container() {
        let html = "<body><div><p>short</p></div>\
                    <section><p>a much longer paragraph of text</p><p>and more</p></section></body>";
        let text = ExtractionMethod::Readability.extract(html);
        assert!(text.contains("a much longer paragraph"));
        assert!(!text.contains("short"));
    }

    #[test]
    fn removes_urls_and_applies_bounds() {
        let p = processor(ExtractionMethod::Custom)
            .remove_urls(true)
            .line_bounds(10, Some(12))
            .build()
            .unwrap();
        let out = p.process(PAGE.to_string(), &()).unwrap();
        assert_eq!(out.lines, vec!["Spindle ship...", "Docs at now."]);
    }

    #[test]
    fn metadata_counts_words_and_uses_title() {
        let p = processor(ExtractionMethod::Custom)
            .extract_metadata(true)
            .build()
            .unwrap();
        let out = p.process(PAGE.to_string(), &()).unwrap();
        let meta = out.metadata.unwrap();
        assert_eq!(meta["title"], json!("Release Notes"));
        assert_eq!(meta["estimated_read_time"], json!(0));
        assert!(meta["word_count"].as_u64().unwrap() >= 6);
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert_eq!(
            "goose".parse::<ExtractionMethod>(),
            Err(FactoryError::UnsupportedMethod("goose".into()))
        );
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(processor(ExtractionMethod::Raw)
            .line_bounds(10, Some(2))
            .build()
            .is_err());
    }

    #[test]
    fn invalid_url_is_unavailable() {
        let fetcher =
            WebFetcher::new(processor(ExtractionMethod::Raw).build().unwrap(), "test").unwrap();
        assert!(matches!(
            fetcher.fetch("not a url"),
            Err(FetchError::SourceUnavailable { .. })
        ));
        assert!(matches!(
            fetcher.fetch("ftp://example.com/file"),
            Err(FetchError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn format_output_includes_metadata_only_when_present() {
        let fetcher =
            WebFetcher::new(processor(ExtractionMethod::Raw).build().unwrap(), "test").unwrap();
        let out = fetcher
            .format_output(WebContent {
                lines: vec!["a".into()],
                metadata: None,
            })
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["web_content"], json!(["a"]));
    }
}
