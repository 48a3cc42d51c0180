//! Wire encodings for [`ResultMapping`].
//!
//! | Format | Encoder | Round-trips |
//! |--------|---------|-------------|
//! | `json` | `serde_json`, pretty, 2-space indent | yes |
//! | `yaml` | `serde_yaml` | yes |
//! | `plaintext` | `key: value` lines, lists as indented blocks | strings only |

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{FactoryError, SerializationError};
use crate::models::ResultMapping;

/// Indent applied to list items and nested fields in plaintext output.
const PLAIN_INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    PlainText,
    Yaml,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::PlainText => "plaintext",
            Format::Yaml => "yaml",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "plaintext" | "plain" | "text" | "txt" => Ok(Format::PlainText),
            "yaml" | "yml" => Ok(Format::Yaml),
            other => Err(FactoryError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Encoder/decoder between a mapping and its text form.
pub trait Serializer: Send + Sync {
    fn format(&self) -> Format;
    fn encode(&self, data: &ResultMapping) -> Result<String, SerializationError>;
    fn decode(&self, text: &str) -> Result<ResultMapping, SerializationError>;
}

#[derive(Debug, Default, Clone)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn format(&self) -> Format {
        Format::Json
    }

    fn encode(&self, data: &ResultMapping) -> Result<String, SerializationError> {
        serde_json::to_string_pretty(data).map_err(|e| SerializationError::new("json", e))
    }

    fn decode(&self, text: &str) -> Result<ResultMapping, SerializationError> {
        serde_json::from_str(text).map_err(|e| SerializationError::new("json", e))
    }
}

#[derive(Debug, Default, Clone)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn format(&self) -> Format {
        Format::Yaml
    }

    fn encode(&self, data: &ResultMapping) -> Result<String, SerializationError> {
        serde_yaml::to_string(data).map_err(|e| SerializationError::new("yaml", e))
    }

    fn decode(&self, text: &str) -> Result<ResultMapping, SerializationError> {
        serde_yaml::from_str(text).map_err(|e| SerializationError::new("yaml", e))
    }
}

/// Human-oriented text output.
///
/// ```text
/// src/main.py:
///   import os
///   print(os.getcwd())
///
/// web_content: single line value
/// ```
///
/// Decoding yields string values and string lists; nested records come back
/// as their `key: value` lines.
#[derive(Debug, Default, Clone)]
pub struct PlainTextSerializer;

impl PlainTextSerializer {
    fn render_scalar(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn render_block(out: &mut Vec<String>, key: &str, value: &Value) {
        match value {
            Value::Array(items) => {
                out.push(format!("{key}:"));
                for item in items {
                    match item {
                        Value::Object(fields) => {
                            for (k, v) in fields {
                                out.push(format!("{PLAIN_INDENT}{k}: {}", Self::render_scalar(v)));
                            }
                            out.push(PLAIN_INDENT.to_string());
                        }
                        other => {
                            for line in Self::render_scalar(other).split('\n') {
                                out.push(format!("{PLAIN_INDENT}{line}"));
                            }
                        }
                    }
                }
            }
            Value::Object(fields) => {
                out.push(format!("{key}:"));
                for (k, v) in fields {
                    out.push(format!("{PLAIN_INDENT}{k}: {}", Self::render_scalar(v)));
                }
            }
            scalar => out.push(format!("{key}: {}", Self::render_scalar(scalar))),
        }
    }
}

impl Serializer for PlainTextSerializer {
    fn format(&self) -> Format {
        Format::PlainText
    }

    fn encode(&self, data: &ResultMapping) -> Result<String, SerializationError> {
        let mut blocks = Vec::with_capacity(data.len());
        for (key, value) in data {
            let mut lines = Vec::new();
            Self::render_block(&mut lines, key, value);
            blocks.push(lines.join("\n"));
        }
        Ok(blocks.join("\n\n"))
    }

    fn decode(&self, text: &str) -> Result<ResultMapping, SerializationError> {
        let mut out = ResultMapping::new();
        let mut current: Option<(String, Vec<Value>)> = None;

        for (lineno, line) in text.lines().enumerate() {
            if let Some(item) = line.strip_prefix(PLAIN_INDENT) {
                match current.as_mut() {
                    Some((_, items)) => items.push(Value::String(item.to_string())),
                    None => {
                        return Err(SerializationError::new(
                            "plaintext",
                            format!("line {}: indented item without a key", lineno + 1),
                        ))
                    }
                }
                continue;
            }
            if let Some((key, items)) = current.take() {
                out.insert(key, Value::Array(items));
            }
            if line.trim().is_empty() {
                continue;
            }
            if let Some(key) = line.strip_suffix(':') {
                current = Some((key.to_string(), Vec::new()));
            } else if let Some((key, value)) = line.split_once(": ") {
                out.insert(key.to_string(), Value::String(value.to_string()));
            } else {
                return Err(SerializationError::new(
                    "plaintext",
                    format!("line {}: expected 'key: value'", lineno + 1),
                ));
            }
        }
        if let Some((key, items)) = current.take() {
            out.insert(key, Value::Array(items));
        }
        Ok(out)
    }
}

/// Build a serializer from its format name.
pub fn create_serializer(format: &str) -> Result<Box<dyn Serializer>, FactoryError> {
    Ok(serializer_for(format.parse()?))
}

pub fn serializer_for(format: Format) -> Box<dyn Serializer> {
    match format {
        Format::Json => Box::new(JsonSerializer),
        Format::PlainText => Box::new(PlainTextSerializer),
        Format::Yaml => Box::new(YamlSerializer),
    }
}
