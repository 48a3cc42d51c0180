//! Line decoders for streamed provider responses.
//!
//! Both read a blocking body through `BufRead` one line at a time, so a
//! chunk is available as soon as its line arrives:
//!
//! - [`SseData`]: `data: <payload>` lines of a server-sent-event stream,
//!   ending at `data: [DONE]` or EOF. `event:`, `id:` and comment lines
//!   are skipped.
//! - [`NdjsonLines`]: one JSON document per non-blank line.
//!
//! [`text_chunks`] turns either into a [`ChunkStream`] of text deltas.

use std::io::{self, BufRead};

use crate::error::ProviderError;
use crate::provider::ChunkStream;

pub struct SseData<R> {
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> SseData<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseData<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let line = self.line.trim_end_matches(['\r', '\n']);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim_start();
                    if data == "[DONE]" {
                        self.done = true;
                        break;
                    }
                    if data.is_empty() {
                        continue;
                    }
                    return Some(Ok(data.to_string()));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

pub struct NdjsonLines<R> {
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> NdjsonLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for NdjsonLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let line = self.line.trim();
                    if !line.is_empty() {
                        return Some(Ok(line.to_string()));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Decode each payload line into an optional text delta.
///
/// Empty deltas are dropped. A decode error is yielded and ends the stream.
pub fn text_chunks<I, F>(lines: I, provider: &str, model: &str, mut decode: F) -> ChunkStream
where
    I: Iterator<Item = io::Result<String>> + Send + 'static,
    F: FnMut(&str) -> Result<Option<String>, ProviderError> + Send + 'static,
{
    let provider = provider.to_string();
    let model = model.to_string();
    let mut failed = false;
    Box::new(lines.filter_map(move |line| {
        if failed {
            return None;
        }
        let result = match line {
            Ok(line) => decode(&line),
            Err(e) => Err(ProviderError::Request {
                provider: provider.clone(),
                model: model.clone(),
                reason: format!("stream interrupted: {e}"),
            }),
        };
        match result {
            Ok(Some(text)) if !text.is_empty() => Some(Ok(text)),
            Ok(_) => None,
            Err(e) => {
                failed = true;
                Some(Err(e))
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sse_yields_data_until_done() {
        let body = "event: message\ndata: {\"a\":1}\n\n: keep-alive\ndata:{\"a\":2}\r\n\ndata: [DONE]\ndata: {\"a\":3}\n";
        let items: Vec<String> = SseData::new(Cursor::new(body)).map(Result::unwrap).collect();
        assert_eq!(items, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn sse_ends_at_eof_without_done() {
        let items: Vec<_> = SseData::new(Cursor::new("data: x\n")).collect();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn ndjson_skips_blank_lines() {
        let body = "{\"n\":1}\n\n  \n{\"n\":2}";
        let items: Vec<String> = NdjsonLines::new(Cursor::new(body)).map(Result::unwrap).collect();
        assert_eq!(items, vec!["{\"n\":1}", "{\"n\":2}"]);
    }

    #[test]
    fn text_chunks_drop_empty_and_stop_after_error() {
        let lines = vec!["a", "", "boom", "b"]
            .into_iter()
            .map(|s| Ok(s.to_string()));
        let chunks: Vec<_> = text_chunks(lines, "Stub", "m", |line| match line {
            "boom" => Err(ProviderError::Parse {
                provider: "Stub".into(),
                reason: "bad".into(),
            }),
            other => Ok(Some(other.to_string())),
        })
        .collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), "a");
        assert!(chunks[1].is_err());
    }

    #[test]
    fn pulling_is_lazy() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let lines = (0..100).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("chunk{i}"))
        });
        let mut stream = text_chunks(lines, "Stub", "m", |l| Ok(Some(l.to_string())));
        assert_eq!(stream.next().unwrap().unwrap(), "chunk0");
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }
}
