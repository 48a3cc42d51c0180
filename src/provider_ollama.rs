//! Local Ollama backend. No credentials; reachable means available.

use std::io::BufReader;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::models::{Conversation, ModelDescriptor};
use crate::provider::{
    execute, http_client, json_body, parse_line, ChunkStream, GenerationArgs, ModelProvider,
};
use crate::stream::{text_chunks, NdjsonLines};

const NAME: &str = "Ollama";

pub struct OllamaProvider {
    client: reqwest::blocking::Client,
    host: String,
}

impl OllamaProvider {
    pub fn new(host: &str, timeout_secs: Option<u64>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(NAME, timeout_secs)?,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    fn body(conversation: &Conversation, model: &str, args: &GenerationArgs, stream: bool) -> Value {
        let messages: Vec<Value> = conversation
            .messages()
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        json!({
            "model": model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": args.temperature,
                "top_p": args.top_p,
                "top_k": args.top_k,
                "frequency_penalty": args.frequency_penalty,
                "presence_penalty": args.presence_penalty,
                "num_predict": args.max_tokens,
            },
        })
    }

    fn chat(&self, body: &Value, model: &str) -> Result<reqwest::blocking::Response, ProviderError> {
        let request = self.client.post(format!("{}/api/chat", self.host)).json(body);
        execute(NAME, model, request)
    }
}

fn tag_names(body: &Value) -> Vec<ModelDescriptor> {
    body["models"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| m["name"].as_str())
        .map(str::to_string)
        .collect()
}

fn message_text(line: &str) -> Result<Option<String>, ProviderError> {
    let event = parse_line(NAME, line)?;
    if let Some(error) = event["error"].as_str() {
        return Err(ProviderError::Parse {
            provider: NAME.to_string(),
            reason: error.to_string(),
        });
    }
    Ok(event["message"]["content"].as_str().map(str::to_string))
}

impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let request = self.client.get(format!("{}/api/tags", self.host));
        let body = json_body(NAME, execute(NAME, "", request)?)?;
        Ok(tag_names(&body))
    }

    fn check_availability(&self) -> Result<bool, ProviderError> {
        Ok(!self.fetch_models()?.is_empty())
    }

    fn complete(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<String, ProviderError> {
        let body = json_body(NAME, self.chat(&Self::body(conversation, model, args, false), model)?)?;
        if let Some(error) = body["error"].as_str() {
            return Err(ProviderError::Parse {
                provider: NAME.to_string(),
                reason: error.to_string(),
            });
        }
        body["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse {
                provider: NAME.to_string(),
                reason: "response has no message.content".to_string(),
            })
    }

    fn complete_stream(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.chat(&Self::body(conversation, model, args, true), model)?;
        let lines = NdjsonLines::new(BufReader::new(response));
        Ok(text_chunks(lines, NAME, model, message_text))
    }
}
