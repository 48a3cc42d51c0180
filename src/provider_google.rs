//! Google Generative Language (Gemini) backend.

use std::io::BufReader;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::models::{Conversation, ModelDescriptor, Role};
use crate::provider::{
    execute, http_client, json_body, parse_line, ChunkStream, GenerationArgs, ModelProvider,
};
use crate::stream::{text_chunks, SseData};

const NAME: &str = "Google";

pub struct GoogleProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
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

    fn body(conversation: &Conversation, args: &GenerationArgs) -> Value {
        let contents: Vec<Value> = conversation
            .dialogue()
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": args.temperature,
                "topP": args.top_p,
                "topK": args.top_k,
                "maxOutputTokens": args.max_tokens,
            },
        });
        if let Some(system) = conversation.system_prompt() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    fn generate(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
        method: &str,
    ) -> Result<reqwest::blocking::Response, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/models/{model}:{method}", self.base_url))
            .query(&[("key", self.api_key.as_str())]);
        if method == "streamGenerateContent" {
            request = request.query(&[("alt", "sse")]);
        }
        execute(NAME, model, request.json(&Self::body(conversation, args)))
    }
}

fn generative_models(body: &Value) -> Vec<ModelDescriptor> {
    body["models"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|m| {
            m["supportedGenerationMethods"]
                .as_array()
                .is_some_and(|methods| methods.iter().any(|x| x == "generateContent"))
        })
        .filter_map(|m| m["name"].as_str())
        .map(|name| name.trim_start_matches("models/").to_string())
        .collect()
}

fn candidate_text(body: &Value) -> Option<String> {
    let parts = body["candidates"][0]["content"]["parts"].as_array()?;
    Some(parts.iter().filter_map(|p| p["text"].as_str()).collect())
}

fn chunk_text(line: &str) -> Result<Option<String>, ProviderError> {
    let event = parse_line(NAME, line)?;
    if let Some(message) = event["error"]["message"].as_str() {
        return Err(ProviderError::Parse {
            provider: NAME.to_string(),
            reason: message.to_string(),
        });
    }
    Ok(candidate_text(&event))
}

impl ModelProvider for GoogleProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", self.api_key.as_str())]);
        let body = json_body(NAME, execute(NAME, "", request)?)?;
        Ok(generative_models(&body))
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
        let response = self.generate(conversation, model, args, "generateContent")?;
        let body = json_body(NAME, response)?;
        candidate_text(&body).ok_or_else(|| ProviderError::Parse {
            provider: NAME.to_string(),
            reason: format!(
                "response has no candidate text (finish reason: {})",
                body["candidates"][0]["finishReason"].as_str().unwrap_or("unknown")
            ),
        })
    }

    fn complete_stream(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.generate(conversation, model, args, "streamGenerateContent")?;
        let lines = SseData::new(BufReader::new(response));
        Ok(text_chunks(lines, NAME, model, chunk_text))
    }
}
