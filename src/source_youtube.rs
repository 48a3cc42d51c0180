//! YouTube videos.
//!
//! [`YouTubeFetcher`] resolves a video id from a URL and pulls the requested
//! parts through a [`VideoService`]; [`YouTubeProcessor`] turns them into
//! the result mapping:
//!
//! | Key | Value |
//! |-----|-------|
//! | `duration` | length in whole minutes |
//! | `transcript` | caption text joined by spaces |
//! | `comments` | top-level comments, replies prefixed `"    - "` |
//! | `metadata` | `{id, title, channel, published_at}` |
//!
//! Selecting no part selects all of them.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::{FactoryError, FetchError, ProcessError};
use crate::fetcher::{FetchPipeline, FetcherKind};
use crate::models::ResultMapping;
use crate::processor::Processor;

/// Extract the video id from the common YouTube URL shapes.
pub fn video_id(source: &str) -> Option<String> {
    let cleaned = source.trim().replace('\\', "");
    let url = url::Url::parse(&cleaned).ok()?;
    let host = url.host_str()?;
    let id = match host {
        "youtu.be" => url
            .path()
            .trim_start_matches('/')
            .chars()
            .take(11)
            .collect::<String>(),
        "www.youtube.com" | "youtube.com" | "m.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next()? {
                "watch" => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned())?,
                "embed" | "v" => segments.next()?.to_string(),
                _ => return None,
            }
        }
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

// ═══════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoDetails {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub published_at: String,
    /// ISO-8601 duration, e.g. `PT4M13S`.
    pub duration: String,
}

/// Remote video data source.
pub trait VideoService: Send + Sync {
    fn video_details(&self, id: &str) -> Result<VideoDetails, FetchError>;
    fn transcript(&self, id: &str, lang: &str) -> Result<String, FetchError>;
    fn comments(&self, id: &str) -> Result<Vec<String>, FetchError>;
}

/// YouTube Data API v3 plus the public timedtext endpoint.
pub struct YouTubeApi {
    client: reqwest::blocking::Client,
    api_base: String,
    transcript_base: String,
    api_key: Option<String>,
    max_comments: usize,
}

impl YouTubeApi {
    pub fn new(
        api_base: impl Into<String>,
        transcript_base: impl Into<String>,
        api_key: Option<String>,
        max_comments: usize,
    ) -> Result<Self, FactoryError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("spindle/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FactoryError::InvalidOption {
                name: "http_client",
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            transcript_base: transcript_base.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            max_comments,
        })
    }

    fn key(&self) -> Result<&str, FetchError> {
        self.api_key.as_deref().ok_or_else(|| {
            FetchError::unavailable("youtube", "YOUTUBE_API_KEY is not set (run `spindle env set`)")
        })
    }

    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.api_base, endpoint);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.key()?)])
            .send()
            .map_err(|e| FetchError::unavailable(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::unavailable(url, format!("HTTP {}", status)));
        }
        response.json().map_err(|e| FetchError::unavailable(url, e))
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

impl VideoService for YouTubeApi {
    fn video_details(&self, id: &str) -> Result<VideoDetails, FetchError> {
        let body = self.get_json("videos", &[("id", id), ("part", "contentDetails,snippet")])?;
        let item = body
            .pointer("/items/0")
            .ok_or_else(|| FetchError::unavailable(id, "video not found"))?;
        Ok(VideoDetails {
            id: str_at(item, "/id").to_string(),
            title: str_at(item, "/snippet/title").to_string(),
            channel: str_at(item, "/snippet/channelTitle").to_string(),
            published_at: str_at(item, "/snippet/publishedAt").to_string(),
            duration: str_at(item, "/contentDetails/duration").to_string(),
        })
    }

    fn transcript(&self, id: &str, lang: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.transcript_base)
            .query(&[("lang", lang), ("v", id)])
            .send()
            .map_err(|e| FetchError::unavailable(id, e))?;
        if !response.status().is_success() {
            return Err(FetchError::unavailable(id, format!("HTTP {}", response.status())));
        }
        let xml = response.text().map_err(|e| FetchError::unavailable(id, e))?;
        let text = parse_timedtext(&xml).map_err(|e| FetchError::unavailable(id, e))?;
        if text.is_empty() {
            return Err(FetchError::unavailable(id, "no captions"));
        }
        Ok(text)
    }

    fn comments(&self, id: &str) -> Result<Vec<String>, FetchError> {
        let mut comments = Vec::new();
        let page_size = self.max_comments.clamp(1, 100).to_string();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("part", "snippet,replies"),
                ("videoId", id),
                ("textFormat", "plainText"),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let body = self.get_json("commentThreads", &query)?;
            for item in body["items"].as_array().into_iter().flatten() {
                comments.push(str_at(item, "/snippet/topLevelComment/snippet/textDisplay").to_string());
                for reply in item
                    .pointer("/replies/comments")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    comments.push(format!("    - {}", str_at(reply, "/snippet/textDisplay")));
                }
            }
            page_token = body["nextPageToken"].as_str().map(str::to_string);
            if page_token.is_none() || comments.len() >= self.max_comments {
                break;
            }
        }
        comments.truncate(self.max_comments);
        Ok(comments)
    }
}

/// Join the `<text>` elements of a timedtext document.
fn parse_timedtext(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut parts: Vec<String> = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"text" => {
                in_text = true;
                parts.push(String::new());
            }
            Event::End(e) if e.local_name().as_ref() == b"text" => in_text = false,
            Event::Text(t) if in_text => {
                if let Some(last) = parts.last_mut() {
                    last.push_str(&t.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts
        .iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

// ═══════════════════════════════════════════════════════════════════════
// Processor
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct YouTubeOptions {
    pub duration: bool,
    pub transcript: bool,
    pub comments: bool,
    pub metadata: bool,
    pub lang: String,
}

impl Default for YouTubeOptions {
    fn default() -> Self {
        Self {
            duration: false,
            transcript: false,
            comments: false,
            metadata: false,
            lang: "en".to_string(),
        }
    }
}

impl YouTubeOptions {
    fn all(&self) -> bool {
        !(self.duration || self.transcript || self.comments || self.metadata)
    }

    pub fn wants_duration(&self) -> bool {
        self.duration || self.all()
    }

    pub fn wants_transcript(&self) -> bool {
        self.transcript || self.all()
    }

    pub fn wants_comments(&self) -> bool {
        self.comments || self.all()
    }

    pub fn wants_metadata(&self) -> bool {
        self.metadata || self.all()
    }
}

/// Parts pulled from the service for one video.
#[derive(Debug, Clone, Default)]
pub struct RawVideo {
    pub details: Option<VideoDetails>,
    pub transcript: Option<Result<String, String>>,
    pub comments: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoSummary {
    pub duration_minutes: Option<i64>,
    pub transcript: Option<String>,
    pub comments: Option<Vec<String>>,
    pub metadata: Option<VideoDetails>,
}

pub struct YouTubeProcessor {
    duration_re: Regex,
}

impl YouTubeProcessor {
    pub fn new() -> Result<Self, FactoryError> {
        let duration_re = Regex::new(
            r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
        )
        .map_err(|e| FactoryError::InvalidOption {
            name: "duration_pattern",
            reason: e.to_string(),
        })?;
        Ok(Self { duration_re })
    }

    /// ISO-8601 duration to seconds.
    pub fn duration_seconds(&self, iso: &str) -> Result<f64, ProcessError> {
        let caps = self
            .duration_re
            .captures(iso.trim())
            .ok_or_else(|| ProcessError::InvalidInput(format!("invalid ISO-8601 duration: {iso}")))?;
        let field = |i: usize| -> f64 {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        Ok(field(1) * 604_800.0 + field(2) * 86_400.0 + field(3) * 3_600.0 + field(4) * 60.0 + field(5))
    }
}

impl Processor for YouTubeProcessor {
    type Input = RawVideo;
    type Prepared = RawVideo;
    type Extracted = RawVideo;
    type Processed = VideoSummary;
    type Output = ResultMapping;
    type Options = YouTubeOptions;

    fn preprocess(&self, raw: RawVideo, _: &YouTubeOptions) -> Result<RawVideo, ProcessError> {
        Ok(raw)
    }

    fn extract_content(&self, raw: RawVideo, options: &YouTubeOptions) -> Result<RawVideo, ProcessError> {
        Ok(RawVideo {
            details: raw
                .details
                .filter(|_| options.wants_duration() || options.wants_metadata()),
            transcript: raw.transcript.filter(|_| options.wants_transcript()),
            comments: raw.comments.filter(|_| options.wants_comments()),
        })
    }

    fn main_process(&self, raw: RawVideo, options: &YouTubeOptions) -> Result<VideoSummary, ProcessError> {
        let duration_minutes = match (&raw.details, options.wants_duration()) {
            (Some(details), true) => {
                let minutes = self.duration_seconds(&details.duration)? / 60.0;
                Some(minutes.round_ties_even() as i64)
            }
            _ => None,
        };
        let transcript = raw.transcript.map(|t| {
            t.unwrap_or_else(|reason| {
                format!(
                    "Transcript not available in the selected language ({}). ({})",
                    options.lang, reason
                )
            })
        });
        Ok(VideoSummary {
            duration_minutes,
            transcript,
            comments: raw.comments,
            metadata: raw.details.filter(|_| options.wants_metadata()),
        })
    }

    fn postprocess(&self, summary: VideoSummary, _: &YouTubeOptions) -> Result<ResultMapping, ProcessError> {
        let mut out = ResultMapping::new();
        if let Some(minutes) = summary.duration_minutes {
            out.insert("duration".into(), json!(minutes));
        }
        if let Some(transcript) = summary.transcript {
            out.insert("transcript".into(), Value::String(transcript));
        }
        if let Some(comments) = summary.comments {
            out.insert("comments".into(), json!(comments));
        }
        if let Some(details) = summary.metadata {
            out.insert(
                "metadata".into(),
                json!({
                    "id": details.id,
                    "title": details.title,
                    "channel": details.channel,
                    "published_at": details.published_at,
                }),
            );
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

pub struct YouTubeFetcher {
    service: Box<dyn VideoService>,
    processor: YouTubeProcessor,
    options: YouTubeOptions,
}

impl YouTubeFetcher {
    pub fn new(
        service: Box<dyn VideoService>,
        processor: YouTubeProcessor,
        options: YouTubeOptions,
    ) -> Self {
        Self {
            service,
            processor,
            options,
        }
    }
}

impl FetchPipeline for YouTubeFetcher {
    const KIND: FetcherKind = FetcherKind::YouTube;

    type Raw = RawVideo;
    type Processed = ResultMapping;

    fn fetch_content(&self, source: &str) -> Result<RawVideo, FetchError> {
        let id = video_id(source).ok_or_else(|| FetchError::unavailable(source, "Invalid YouTube URL"))?;
        let opts = &self.options;
        let mut raw = RawVideo::default();

        if opts.wants_duration() || opts.wants_metadata() {
            raw.details = Some(self.service.video_details(&id)?);
        }
        if opts.wants_transcript() {
            raw.transcript = Some(
                self.service
                    .transcript(&id, &opts.lang)
                    .map_err(|e| e.to_string()),
            );
        }
        if opts.wants_comments() {
            raw.comments = Some(match self.service.comments(&id) {
                Ok(comments) => comments,
                Err(err) => {
                    tracing::warn!(video = %id, error = %err, "failed to fetch comments");
                    Vec::new()
                }
            });
        }
        Ok(raw)
    }

    fn process_content(&self, raw: RawVideo) -> Result<ResultMapping, FetchError> {
        Ok(self.processor.process(raw, &self.options)?)
    }

    fn format_output(&self, processed: ResultMapping) -> Result<ResultMapping, FetchError> {
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubService {
        detail_calls: AtomicUsize,
        fail_transcript: bool,
        fail_comments: bool,
    }

    impl VideoService for StubService {
        fn video_details(&self, id: &str) -> Result<VideoDetails, FetchError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            Ok(VideoDetails {
                id: id.to_string(),
                title: "Rust in Production".into(),
                channel: "Ferris".into(),
                published_at: "2024-03-01T10:00:00Z".into(),
                duration: "PT12M30S".into(),
            })
        }

        fn transcript(&self, _id: &str, _lang: &str) -> Result<String, FetchError> {
            if self.fail_transcript {
                return Err(FetchError::unavailable("stub", "no captions"));
            }
            Ok("hello and welcome".into())
        }

        fn comments(&self, _id: &str) -> Result<Vec<String>, FetchError> {
            if self.fail_comments {
                return Err(FetchError::unavailable("stub", "quota"));
            }
            Ok(vec!["great".into(), "    - agreed".into()])
        }
    }

    fn fetcher(service: StubService, options: YouTubeOptions) -> YouTubeFetcher {
        YouTubeFetcher::new(Box::new(service), YouTubeProcessor::new().unwrap(), options)
    }

    #[test]
    fn video_id_shapes() {
        assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ?t=3").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=x").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(video_id("https://youtube.com/embed/abc123").as_deref(), Some("abc123"));
        assert_eq!(video_id("https://www.youtube.com/v/abc123").as_deref(), Some("abc123"));
        assert_eq!(video_id("https://vimeo.com/123"), None);
        assert_eq!(video_id("https://www.youtube.com/channel/x"), None);
        assert_eq!(video_id("not a url"), None);
    }

    #[test]
    fn durations_round_to_minutes() {
        let p = YouTubeProcessor::new().unwrap();
        assert_eq!(p.duration_seconds("PT1H2M3S").unwrap(), 3723.0);
        assert_eq!(p.duration_seconds("P1DT1S").unwrap(), 86_401.0);
        assert_eq!(p.duration_seconds("PT45S").unwrap(), 45.0);
        assert!(p.duration_seconds("12 minutes").is_err());
    }

    #[test]
    fn no_selection_means_everything() {
        let out = fetcher(StubService::default(), YouTubeOptions::default())
            .fetch("https://youtu.be/abcdefghijk")
            .unwrap();
        let keys: Vec<&str> = out.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["comments", "duration", "metadata", "transcript"]);
        assert_eq!(out["duration"], 12);
        assert_eq!(out["metadata"]["channel"], "Ferris");
        assert_eq!(out["transcript"], "hello and welcome");
    }

    #[test]
    fn selected_parts_only() {
        let options = YouTubeOptions {
            transcript: true,
            ..YouTubeOptions::default()
        };
        let service = StubService::default();
        let f = fetcher(service, options);
        let out = f.fetch("https://youtu.be/abcdefghijk").unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["transcript"]);
    }

    #[test]
    fn missing_transcript_is_reported_in_band() {
        let service = StubService {
            fail_transcript: true,
            fail_comments: true,
            ..StubService::default()
        };
        let options = YouTubeOptions {
            transcript: true,
            comments: true,
            lang: "de".into(),
            ..YouTubeOptions::default()
        };
        let out = fetcher(service, options).fetch("https://youtu.be/abcdefghijk").unwrap();
        let transcript = out["transcript"].as_str().unwrap();
        assert!(transcript.starts_with("Transcript not available in the selected language (de)."));
        assert_eq!(out["comments"], json!([]));
    }

    #[test]
    fn invalid_url_is_unavailable() {
        let err = fetcher(StubService::default(), YouTubeOptions::default())
            .fetch("https://example.com/watch?v=x")
            .unwrap_err();
        assert!(err.to_string().contains("Invalid YouTube URL"));
    }

    #[test]
    fn timedtext_is_joined() {
        let xml = r#"<?xml version="1.0"?><transcript><text start="0" dur="1">Hi &amp; welcome</text><text start="1" dur="2">to the
show</text></transcript>"#;
        assert_eq!(parse_timedtext(xml).unwrap(), "Hi & welcome to the show");
    }

    #[test]
    fn api_without_key_fails_before_network() {
        let api = YouTubeApi::new("http://127.0.0.1:9", "http://127.0.0.1:9", None, 10).unwrap();
        let err = api.video_details("abc").unwrap_err();
        assert!(err.to_string().contains("YOUTUBE_API_KEY"));
    }
}
