//! Anthropic messages backend.
//!
//! The messages API has no model listing, so the static list below is what
//! discovery reports. The system prompt travels in the top-level `system`
//! field rather than as a message.

use std::io::BufReader;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::models::{Conversation, ModelDescriptor};
use crate::provider::{
    execute, http_client, json_body, parse_line, ChunkStream, GenerationArgs, ModelProvider,
};
use crate::stream::{text_chunks, SseData};

const NAME: &str = "Claude";
const API_VERSION: &str = "2023-06-01";

pub const MODELS: &[&str] = &[
    "claude-3-5-sonnet-20240620",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-2.1",
];

pub struct ClaudeProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

impl ClaudeProvider {
    pub fn new(
        api_key: String,
        base_url: &str,
        timeout_secs: Option<u64>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(NAME, timeout_secs)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn body(conversation: &Conversation, model: &str, args: &GenerationArgs, stream: bool) -> Value {
        let messages: Vec<Value> = conversation
            .dialogue()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": args.max_tokens,
            "temperature": args.temperature,
            "top_p": args.top_p,
            "stream": stream,
        });
        if let Some(system) = conversation.system_prompt() {
            body["system"] = Value::String(system.to_string());
        }
        body
    }

    fn post(&self, body: &Value, model: &str) -> Result<reqwest::blocking::Response, ProviderError> {
        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body);
        execute(NAME, model, request)
    }
}

fn event_text(line: &str) -> Result<Option<String>, ProviderError> {
    let event = parse_line(NAME, line)?;
    match event["type"].as_str() {
        Some("content_block_delta") => Ok(event["delta"]["text"].as_str().map(str::to_string)),
        Some("error") => Err(ProviderError::Parse {
            provider: NAME.to_string(),
            reason: event["error"]["message"]
                .as_str()
                .unwrap_or("stream error")
                .to_string(),
        }),
        _ => Ok(None),
    }
}

impl ModelProvider for ClaudeProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        Ok(MODELS.iter().map(|m| m.to_string()).collect())
    }

    fn check_availability(&self) -> Result<bool, ProviderError> {
        Ok(!self.api_key.is_empty())
    }

    fn complete(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<String, ProviderError> {
        let body = json_body(NAME, self.post(&Self::body(conversation, model, args, false), model)?)?;
        let text: String = body["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect();
        if text.is_empty() && body["content"].as_array().is_none() {
            return Err(ProviderError::Parse {
                provider: NAME.to_string(),
                reason: "response has no content blocks".to_string(),
            });
        }
        Ok(text)
    }

    fn complete_stream(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.post(&Self::body(conversation, model, args, true), model)?;
        let lines = SseData::new(BufReader::new(response));
        Ok(text_chunks(lines, NAME, model, event_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_lifted_out() {
        let conv = Conversation::new(Some("be terse".into()), "hi");
        let body = ClaudeProvider::body(&conv, MODELS[0], &GenerationArgs::default(), false);
        assert_eq!(body["system"], "be terse");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn static_model_list() {
        let p = ClaudeProvider::new("key".into(), "http://127.0.0.1:9", Some(1)).unwrap();
        assert!(p.validate_model("claude-3-haiku-20240307"));
        assert_eq!(p.get_default_model().as_deref(), Some("claude-3-5-sonnet-20240620"));
        assert!(p.is_available());
    }

    #[test]
    fn stream_events() {
        assert_eq!(
            event_text(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#)
                .unwrap(),
            Some("Hi".to_string())
        );
        assert_eq!(event_text(r#"{"type":"message_start","message":{}}"#).unwrap(), None);
        let err = event_text(r#"{"type":"error","error":{"message":"Overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
