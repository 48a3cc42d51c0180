//! Error taxonomy for the library layer.
//!
//! Each component boundary converts backend failures into one of these
//! domain errors. The binary is the only place an error becomes a message
//! and an exit status.
//!
//! | Error | Raised by |
//! |-------|-----------|
//! | [`FetchError`] | `Fetcher::fetch` (source acquisition + processing) |
//! | [`ProcessError`] | `Processor::process` |
//! | [`SerializationError`] | `Serializer::encode` / `decode` |
//! | [`HandlerError`] | `Handler::handle` |
//! | [`FactoryError`] | factory `create_*`, provider construction |
//! | [`ProviderError`] | `ModelProvider::send_message` / `stream_message` |

use thiserror::Error;

/// Max characters of offending data kept on a [`HandlerError`].
const DATA_EXCERPT_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Raw content could not be acquired. Never retried.
    #[error("source unavailable: {location}: {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl FetchError {
    pub fn unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// A requested index lies outside the available items.
    #[error("{what} {requested} is out of range: only {available} available")]
    OutOfRange {
        what: &'static str,
        requested: usize,
        available: usize,
    },

    /// A `[start, end)` range with `start >= end`.
    #[error("invalid range: start {start} must be less than end {end}")]
    InvalidRange { start: usize, end: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Error)]
#[error("{format} serialization failed: {message}")]
pub struct SerializationError {
    pub format: &'static str,
    pub message: String,
}

impl SerializationError {
    pub fn new(format: &'static str, err: impl ToString) -> Self {
        Self {
            format,
            message: err.to_string(),
        }
    }
}

/// A handler-level failure.
///
/// Carries the originating handler name, an excerpt of the data being
/// handled, and the wrapped error if any.
#[derive(Debug, Error)]
#[error("{message}{}", handler_suffix(.handler))]
pub struct HandlerError {
    pub message: String,
    pub handler: Option<String>,
    pub data: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

fn handler_suffix(handler: &Option<String>) -> String {
    match handler {
        Some(name) => format!(" (in handler: {name})"),
        None => String::new(),
    }
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            handler: None,
            data: None,
            source: None,
        }
    }

    pub fn in_handler(mut self, name: impl Into<String>) -> Self {
        self.handler = Some(name.into());
        self
    }

    /// Attach the data being processed, truncated to 100 characters.
    pub fn with_data(mut self, data: &str) -> Self {
        let mut excerpt: String = data.chars().take(DATA_EXCERPT_CHARS).collect();
        if data.chars().count() > DATA_EXCERPT_CHARS {
            excerpt.push_str("...");
        }
        self.data = Some(excerpt);
        self
    }

    pub fn caused_by(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(err));
        self
    }

    /// Multi-line description listing every populated field.
    pub fn details(&self) -> String {
        let mut out = format!("Error: {}", self.message);
        if let Some(handler) = &self.handler {
            out.push_str(&format!("\nHandler: {handler}"));
        }
        if let Some(data) = &self.data {
            out.push_str(&format!("\nData: {data}"));
        }
        if let Some(source) = &self.source {
            out.push_str(&format!("\nOriginal error: {source}"));
        }
        out
    }
}

impl From<SerializationError> for HandlerError {
    fn from(err: SerializationError) -> Self {
        HandlerError::new("failed to encode data").caused_by(err)
    }
}

/// Construction-time validation failures. Never silently defaulted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported handler type: {0}")]
    UnsupportedHandlerType(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("unsupported extraction method: {0}")]
    UnsupportedMethod(String),

    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

/// Failure talking to an AI backend. Always tagged with the provider name.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: missing credential {key}")]
    MissingCredential { provider: String, key: &'static str },

    #[error("{provider} request for model {model} failed: {reason}")]
    Request {
        provider: String,
        model: String,
        reason: String,
    },

    #[error("{provider} returned HTTP {status} for model {model}: {body}")]
    Api {
        provider: String,
        model: String,
        status: u16,
        body: String,
    },

    #[error("{provider} sent an unexpected response: {reason}")]
    Parse { provider: String, reason: String },

    #[error("{provider} does not serve model {model}")]
    UnsupportedModel { provider: String, model: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::MissingCredential { provider, .. }
            | ProviderError::Request { provider, .. }
            | ProviderError::Api { provider, .. }
            | ProviderError::Parse { provider, .. }
            | ProviderError::UnsupportedModel { provider, .. } => provider,
        }
    }
}
