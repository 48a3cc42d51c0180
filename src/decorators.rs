//! Same-interface wrappers adding cross-cutting behavior to a [`Fetcher`].
//!
//! Decorators hold an inner `Box<dyn Fetcher>`, forward every method, and
//! intercept only `fetch`. They nest freely:
//!
//! ```text
//! TimingFetcher(LoggingFetcher(CodeFetcher))
//!   timing starts clock
//!     logging reports "Starting fetching with CodeFetcher"
//!       CodeFetcher::fetch
//!     logging reports "Finished fetching with CodeFetcher"
//!   timing reports "Fetching with CodeFetcher took 0.02 seconds"
//! ```
//!
//! Markers go through a [`FetchReporter`] on stderr so stdout stays
//! reserved for handler output.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::FetchError;
use crate::fetcher::{Fetcher, FetcherKind};
use crate::models::ResultMapping;
use crate::visitor::Visitor;

/// Observable decorator side effect.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchEvent {
    Started { fetcher: &'static str },
    Finished { fetcher: &'static str },
    Timed {
        fetcher: &'static str,
        elapsed: Duration,
    },
}

impl FetchEvent {
    pub fn message(&self) -> String {
        match self {
            FetchEvent::Started { fetcher } => format!("Starting fetching with {}", fetcher),
            FetchEvent::Finished { fetcher } => format!("Finished fetching with {}", fetcher),
            FetchEvent::Timed { fetcher, elapsed } => format!(
                "Fetching with {} took {:.2} seconds",
                fetcher,
                elapsed.as_secs_f64()
            ),
        }
    }
}

/// Sink for decorator markers.
pub trait FetchReporter: Send + Sync {
    fn report(&self, event: FetchEvent);
}

/// One line per event on stderr.
pub struct StderrReporter;

impl FetchReporter for StderrReporter {
    fn report(&self, event: FetchEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event.message());
        let _ = err.flush();
    }
}

/// Keeps events in memory, in report order.
#[derive(Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<FetchEvent>>,
}

impl MemoryReporter {
    pub fn events(&self) -> Vec<FetchEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl FetchReporter for MemoryReporter {
    fn report(&self, event: FetchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Reports a marker before and after the wrapped fetch.
pub struct LoggingFetcher {
    inner: Box<dyn Fetcher>,
    reporter: Arc<dyn FetchReporter>,
}

impl LoggingFetcher {
    pub fn new(inner: Box<dyn Fetcher>, reporter: Arc<dyn FetchReporter>) -> Self {
        Self { inner, reporter }
    }
}

impl Fetcher for LoggingFetcher {
    fn kind(&self) -> FetcherKind {
        self.inner.kind()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn fetch(&self, source: &str) -> Result<ResultMapping, FetchError> {
        let fetcher = self.inner.name();
        self.reporter.report(FetchEvent::Started { fetcher });
        tracing::info!(fetcher, source, "fetch started");
        let result = self.inner.fetch(source);
        self.reporter.report(FetchEvent::Finished { fetcher });
        match &result {
            Ok(data) => tracing::info!(fetcher, keys = data.len(), "fetch finished"),
            Err(err) => tracing::warn!(fetcher, error = %err, "fetch failed"),
        }
        result
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        self.inner.accept(visitor)
    }
}

/// Measures wall-clock time of the wrapped fetch.
pub struct TimingFetcher {
    inner: Box<dyn Fetcher>,
    reporter: Arc<dyn FetchReporter>,
}

impl TimingFetcher {
    pub fn new(inner: Box<dyn Fetcher>, reporter: Arc<dyn FetchReporter>) -> Self {
        Self { inner, reporter }
    }
}

impl Fetcher for TimingFetcher {
    fn kind(&self) -> FetcherKind {
        self.inner.kind()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn fetch(&self, source: &str) -> Result<ResultMapping, FetchError> {
        let start = Instant::now();
        let result = self.inner.fetch(source);
        let elapsed = start.elapsed();
        self.reporter.report(FetchEvent::Timed {
            fetcher: self.inner.name(),
            elapsed,
        });
        tracing::debug!(fetcher = self.inner.name(), elapsed_ms = elapsed.as_millis() as u64, "fetch timed");
        result
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        self.inner.accept(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::dispatch;
    use serde_json::json;

    /// Pushes a pseudo-event into the shared reporter when fetched.
    struct Probe {
        reporter: Arc<MemoryReporter>,
    }

    impl Fetcher for Probe {
        fn kind(&self) -> FetcherKind {
            FetcherKind::Code
        }

        fn fetch(&self, source: &str) -> Result<ResultMapping, FetchError> {
            self.reporter.report(FetchEvent::Started { fetcher: "inner-call" });
            if source == "missing" {
                return Err(FetchError::unavailable(source, "not found"));
            }
            let mut out = ResultMapping::new();
            out.insert(source.to_string(), json!(["line one", "line two"]));
            Ok(out)
        }

        fn accept(&self, visitor: &mut dyn Visitor) {
            dispatch(visitor, self);
        }
    }

    fn probe(reporter: &Arc<MemoryReporter>) -> Box<dyn Fetcher> {
        Box::new(Probe {
            reporter: Arc::clone(reporter),
        })
    }

    #[test]
    fn timing_does_not_alter_result() {
        let reporter = Arc::new(MemoryReporter::default());
        let bare = probe(&reporter).fetch("src").unwrap();
        let timed = TimingFetcher::new(probe(&reporter), reporter.clone()).fetch("src").unwrap();
        assert_eq!(bare, timed);
    }

    #[test]
    fn logging_markers_surround_the_call() {
        let reporter = Arc::new(MemoryReporter::default());
        let f = LoggingFetcher::new(probe(&reporter), reporter.clone());
        f.fetch("src").unwrap();
        assert_eq!(
            reporter.events(),
            vec![
                FetchEvent::Started { fetcher: "CodeFetcher" },
                FetchEvent::Started { fetcher: "inner-call" },
                FetchEvent::Finished { fetcher: "CodeFetcher" },
            ]
        );
    }

    #[test]
    fn decorators_compose_and_forward_identity() {
        let reporter = Arc::new(MemoryReporter::default());
        let logged = LoggingFetcher::new(probe(&reporter), reporter.clone());
        let f = TimingFetcher::new(Box::new(logged), reporter.clone());

        assert_eq!(f.kind(), FetcherKind::Code);
        assert_eq!(f.name(), "CodeFetcher");
        assert_eq!(f.fetch("x").unwrap(), probe(&reporter).fetch("x").unwrap());

        let events = reporter.events();
        assert!(matches!(events[0], FetchEvent::Started { fetcher: "CodeFetcher" }));
        assert!(matches!(events[2], FetchEvent::Finished { .. }));
        assert!(matches!(events[3], FetchEvent::Timed { fetcher: "CodeFetcher", .. }));
    }

    #[test]
    fn errors_pass_through_with_markers() {
        let reporter = Arc::new(MemoryReporter::default());
        let f = LoggingFetcher::new(probe(&reporter), reporter.clone());
        assert!(matches!(
            f.fetch("missing"),
            Err(FetchError::SourceUnavailable { .. })
        ));
        assert_eq!(reporter.events().len(), 3);
    }

    #[test]
    fn accept_reaches_the_wrapped_fetcher() {
        #[derive(Default)]
        struct SawCode(bool);
        impl Visitor for SawCode {
            fn visit_code(&mut self, _f: &dyn Fetcher) {
                self.0 = true;
            }
        }

        let reporter = Arc::new(MemoryReporter::default());
        let f = TimingFetcher::new(
            Box::new(LoggingFetcher::new(probe(&reporter), reporter.clone())),
            reporter.clone(),
        );
        let mut visitor = SawCode::default();
        f.accept(&mut visitor);
        assert!(visitor.0);
    }

    #[test]
    fn timed_message_has_two_decimals() {
        let event = FetchEvent::Timed {
            fetcher: "WebFetcher",
            elapsed: Duration::from_millis(1234),
        };
        assert_eq!(event.message(), "Fetching with WebFetcher took 1.23 seconds");
    }
}
