//! OpenAI chat-completions backend.

use std::io::BufReader;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::models::{Conversation, ModelDescriptor};
use crate::provider::{
    execute, http_client, json_body, parse_line, ChunkStream, GenerationArgs, ModelProvider,
};
use crate::stream::{text_chunks, SseData};

const NAME: &str = "GPT";

pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
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
            .messages()
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        json!({
            "model": model,
            "messages": messages,
            "temperature": args.temperature,
            "top_p": args.top_p,
            "frequency_penalty": args.frequency_penalty,
            "presence_penalty": args.presence_penalty,
            "max_tokens": args.max_tokens,
            "stream": stream,
        })
    }

    fn post(&self, body: &Value, model: &str) -> Result<reqwest::blocking::Response, ProviderError> {
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body);
        execute(NAME, model, request)
    }
}

fn model_ids(body: &Value) -> Vec<ModelDescriptor> {
    let mut ids: Vec<String> = body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| m["id"].as_str())
        .filter(|id| id.starts_with("gpt"))
        .map(str::to_string)
        .collect();
    ids.sort();
    ids
}

fn delta_text(line: &str) -> Result<Option<String>, ProviderError> {
    let event = parse_line(NAME, line)?;
    if let Some(message) = event["error"]["message"].as_str() {
        return Err(ProviderError::Parse {
            provider: NAME.to_string(),
            reason: message.to_string(),
        });
    }
    Ok(event["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string))
}

impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key);
        let body = json_body(NAME, execute(NAME, "", request)?)?;
        Ok(model_ids(&body))
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
        let body = json_body(NAME, self.post(&Self::body(conversation, model, args, false), model)?)?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse {
                provider: NAME.to_string(),
                reason: "response has no choices[0].message.content".to_string(),
            })
    }

    fn complete_stream(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.post(&Self::body(conversation, model, args, true), model)?;
        let lines = SseData::new(BufReader::new(response));
        Ok(text_chunks(lines, NAME, model, delta_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gpt_models_are_listed() {
        let body = json!({ "data": [
            { "id": "whisper-1" },
            { "id": "gpt-4o" },
            { "id": "dall-e-3" },
            { "id": "gpt-3.5-turbo" },
        ]});
        assert_eq!(model_ids(&body), vec!["gpt-3.5-turbo", "gpt-4o"]);
    }

    #[test]
    fn request_carries_generation_args() {
        let conv = Conversation::new(Some("sys".into()), "hi");
        let body = OpenAiProvider::body(&conv, "gpt-4o", &GenerationArgs::default(), true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn stream_deltas() {
        assert_eq!(
            delta_text(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            Some("Hel".to_string())
        );
        assert_eq!(delta_text(r#"{"choices":[{"delta":{}}]}"#).unwrap(), None);
        assert!(delta_text(r#"{"error":{"message":"overloaded"}}"#).is_err());
        assert!(delta_text("not json").is_err());
    }
}
