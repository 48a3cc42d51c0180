//! AI model providers.
//!
//! One [`ModelProvider`] per backend, all with the same contract:
//!
//! | Call | On backend failure |
//! |------|--------------------|
//! | `get_models`, `is_available`, `get_default_model`, `validate_model` | logged, safe default returned |
//! | `send_message`, `stream_message` | logged, provider-tagged [`ProviderError`] returned |
//!
//! Backends implement only the `fetch_models` / `check_availability` /
//! `complete` / `complete_stream` hooks; the public calls are provided.
//!
//! # Selection
//!
//! ```text
//! model name ─▶ explicit --provider? ─yes─▶ that provider
//!                      │ no
//!                      ▼
//!               longest registered prefix ─match─▶ provider
//!                      │ none
//!                      ▼
//!               fallback (default ollama), only if it serves the model
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::config::{Config, ProvidersConfig};
use crate::env_store::{EnvStore, CLAUDE_API_KEY, GOOGLE_API_KEY, OPENAI_API_KEY};
use crate::error::{FactoryError, ProviderError};
use crate::models::{Conversation, ModelDescriptor};
use crate::provider_claude::ClaudeProvider;
use crate::provider_google::GoogleProvider;
use crate::provider_ollama::OllamaProvider;
use crate::provider_openai::OpenAiProvider;

/// Lazily pulled text deltas. Dropping the iterator releases the connection.
pub type ChunkStream = Box<dyn Iterator<Item = Result<String, ProviderError>> + Send>;

/// Sampling parameters shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationArgs {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
}

impl Default for GenerationArgs {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
            max_tokens: 1000,
        }
    }
}

pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError>;

    fn check_availability(&self) -> Result<bool, ProviderError>;

    fn default_model(&self) -> Result<Option<ModelDescriptor>, ProviderError> {
        Ok(self.fetch_models()?.into_iter().next())
    }

    fn complete(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<String, ProviderError>;

    fn complete_stream(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChunkStream, ProviderError>;

    fn get_models(&self) -> Vec<ModelDescriptor> {
        match self.fetch_models() {
            Ok(models) => {
                tracing::info!(provider = self.name(), count = models.len(), "fetched models");
                models
            }
            Err(err) => {
                tracing::error!(provider = self.name(), error = %err, "error fetching models");
                Vec::new()
            }
        }
    }

    fn is_available(&self) -> bool {
        match self.check_availability() {
            Ok(available) => available,
            Err(err) => {
                tracing::error!(provider = self.name(), error = %err, "error checking availability");
                false
            }
        }
    }

    fn get_default_model(&self) -> Option<ModelDescriptor> {
        match self.default_model() {
            Ok(Some(model)) => {
                tracing::info!(provider = self.name(), model = %model, "default model");
                Some(model)
            }
            Ok(None) => {
                tracing::warn!(provider = self.name(), "no default model available");
                None
            }
            Err(err) => {
                tracing::error!(provider = self.name(), error = %err, "error getting default model");
                None
            }
        }
    }

    fn validate_model(&self, model: &str) -> bool {
        match self.fetch_models() {
            Ok(models) => {
                let valid = models.iter().any(|m| m == model);
                if valid {
                    tracing::info!(provider = self.name(), model, "model is valid");
                } else {
                    tracing::warn!(provider = self.name(), model, "model is not valid");
                }
                valid
            }
            Err(err) => {
                tracing::error!(provider = self.name(), model, error = %err, "error validating model");
                false
            }
        }
    }

    fn send_message(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<String, ProviderError> {
        tracing::debug!(provider = self.name(), model, "sending message");
        self.complete(conversation, model, args).map_err(|err| {
            tracing::error!(provider = self.name(), model, error = %err, "send failed");
            err
        })
    }

    fn stream_message(
        &self,
        conversation: &Conversation,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChunkStream, ProviderError> {
        tracing::debug!(provider = self.name(), model, "streaming message");
        let stream = self
            .complete_stream(conversation, model, args)
            .map_err(|err| {
                tracing::error!(provider = self.name(), model, error = %err, "stream failed");
                err
            })?;
        let provider = self.name().to_string();
        let model = model.to_string();
        Ok(Box::new(stream.inspect(move |chunk| {
            if let Err(err) = chunk {
                tracing::error!(provider = %provider, model = %model, error = %err, "stream interrupted");
            }
        })))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP helpers shared by the backends
// ═══════════════════════════════════════════════════════════════════════

pub(crate) fn http_client(
    provider: &str,
    timeout_secs: Option<u64>,
) -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("spindle/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout_secs.map(Duration::from_secs))
        .build()
        .map_err(|e| ProviderError::Request {
            provider: provider.to_string(),
            model: String::new(),
            reason: e.to_string(),
        })
}

const ERROR_BODY_CHARS: usize = 300;

/// Send `request`, failing on transport errors and non-2xx statuses.
pub(crate) fn execute(
    provider: &str,
    model: &str,
    request: reqwest::blocking::RequestBuilder,
) -> Result<reqwest::blocking::Response, ProviderError> {
    let response = request.send().map_err(|e| ProviderError::Request {
        provider: provider.to_string(),
        model: model.to_string(),
        reason: e.to_string(),
    })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::Api {
        provider: provider.to_string(),
        model: model.to_string(),
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_CHARS).collect(),
    })
}

pub(crate) fn json_body(
    provider: &str,
    response: reqwest::blocking::Response,
) -> Result<serde_json::Value, ProviderError> {
    response.json().map_err(|e| ProviderError::Parse {
        provider: provider.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn parse_line(provider: &str, line: &str) -> Result<serde_json::Value, ProviderError> {
    serde_json::from_str(line).map_err(|e| ProviderError::Parse {
        provider: provider.to_string(),
        reason: format!("{e} (data: {})", line.chars().take(200).collect::<String>()),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Kinds, routing, construction
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    Gpt,
    Claude,
    Google,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gpt,
        ProviderKind::Claude,
        ProviderKind::Google,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gpt => "gpt",
            ProviderKind::Claude => "claude",
            ProviderKind::Google => "google",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpt" => Ok(ProviderKind::Gpt),
            "claude" => Ok(ProviderKind::Claude),
            "google" => Ok(ProviderKind::Google),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(FactoryError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// How a provider was chosen for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Explicit(ProviderKind),
    Prefix(ProviderKind),
    /// Must be confirmed against the provider's model list.
    Fallback(ProviderKind),
}

impl Route {
    pub fn kind(&self) -> ProviderKind {
        match *self {
            Route::Explicit(kind) | Route::Prefix(kind) | Route::Fallback(kind) => kind,
        }
    }
}

/// Registered model-name prefixes. Longest match wins.
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    routes: BTreeMap<String, ProviderKind>,
    fallback: Option<ProviderKind>,
}

impl ProviderRouter {
    pub fn new(fallback: Option<ProviderKind>) -> Self {
        Self {
            routes: BTreeMap::new(),
            fallback,
        }
    }

    /// `gpt` → GPT, `claude` → Claude, `gemini` → Google, fallback Ollama.
    pub fn with_defaults() -> Self {
        let mut router = Self::new(Some(ProviderKind::Ollama));
        router.register("gpt", ProviderKind::Gpt);
        router.register("claude", ProviderKind::Claude);
        router.register("gemini", ProviderKind::Google);
        router
    }

    pub fn from_config(config: &ProvidersConfig) -> Result<Self, FactoryError> {
        let mut router = Self::with_defaults();
        router.fallback = match config.fallback.trim() {
            "none" | "" => None,
            name => Some(name.parse()?),
        };
        for (prefix, provider) in &config.routes {
            router.register(prefix, provider.parse()?);
        }
        Ok(router)
    }

    pub fn register(&mut self, prefix: impl Into<String>, kind: ProviderKind) {
        self.routes.insert(prefix.into(), kind);
    }

    pub fn fallback(&self) -> Option<ProviderKind> {
        self.fallback
    }

    pub fn resolve(&self, model: &str, explicit: Option<ProviderKind>) -> Result<Route, FactoryError> {
        if let Some(kind) = explicit {
            return Ok(Route::Explicit(kind));
        }
        let matched = self
            .routes
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        match (matched, self.fallback) {
            (Some((_, kind)), _) => Ok(Route::Prefix(*kind)),
            (None, Some(kind)) => Ok(Route::Fallback(kind)),
            (None, None) => Err(FactoryError::UnsupportedProvider(format!(
                "no provider registered for model {model}"
            ))),
        }
    }
}

fn credential(env: &EnvStore, provider: &str, key: &'static str) -> Result<String, ProviderError> {
    env.get(key).ok_or_else(|| ProviderError::MissingCredential {
        provider: provider.to_string(),
        key,
    })
}

pub fn create_provider(
    kind: ProviderKind,
    config: &Config,
    env: &EnvStore,
) -> Result<Box<dyn ModelProvider>, ProviderError> {
    let p = &config.providers;
    Ok(match kind {
        ProviderKind::Gpt => Box::new(OpenAiProvider::new(
            credential(env, "GPT", OPENAI_API_KEY)?,
            &p.openai_base_url,
            p.timeout_secs,
        )?),
        ProviderKind::Claude => Box::new(ClaudeProvider::new(
            credential(env, "Claude", CLAUDE_API_KEY)?,
            &p.claude_base_url,
            p.timeout_secs,
        )?),
        ProviderKind::Google => Box::new(GoogleProvider::new(
            credential(env, "Google", GOOGLE_API_KEY)?,
            &p.google_base_url,
            p.timeout_secs,
        )?),
        ProviderKind::Ollama => Box::new(OllamaProvider::new(&p.ollama_host, p.timeout_secs)?),
    })
}

/// Builds and selects providers from the explicit configuration values.
pub struct ProviderManager<'a> {
    config: &'a Config,
    env: &'a EnvStore,
    router: ProviderRouter,
}

impl<'a> ProviderManager<'a> {
    pub fn new(config: &'a Config, env: &'a EnvStore) -> Result<Self, FactoryError> {
        Ok(Self {
            config,
            env,
            router: ProviderRouter::from_config(&config.providers)?,
        })
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn create(&self, kind: ProviderKind) -> Result<Box<dyn ModelProvider>, ProviderError> {
        create_provider(kind, self.config, self.env)
    }

    /// Provider → models for every configured, reachable provider.
    pub fn discover(&self) -> BTreeMap<ProviderKind, Vec<ModelDescriptor>> {
        let mut found = BTreeMap::new();
        for kind in ProviderKind::ALL {
            match self.create(kind) {
                Ok(provider) if provider.is_available() => {
                    found.insert(kind, provider.get_models());
                }
                Ok(_) => tracing::debug!(provider = %kind, "provider unavailable"),
                Err(err) => tracing::debug!(provider = %kind, error = %err, "provider not configured"),
            }
        }
        found
    }

    /// Provider that serves `model`.
    pub fn select(
        &self,
        model: &str,
        explicit: Option<ProviderKind>,
    ) -> Result<Box<dyn ModelProvider>> {
        let route = self.router.resolve(model, explicit)?;
        let provider = self.create(route.kind())?;
        if let Route::Fallback(kind) = route {
            if !provider.validate_model(model) {
                return Err(FactoryError::UnsupportedProvider(format!(
                    "model {model} is not served by any registered provider (fallback {kind} does not list it)"
                ))
                .into());
            }
        }
        tracing::debug!(provider = provider.name(), model, ?route, "provider selected");
        Ok(provider)
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider for exercising the provided methods.
    pub struct StubProvider {
        pub models: Result<Vec<String>, String>,
        pub reply: Result<String, String>,
        pub chunks: Vec<&'static str>,
        pub calls: AtomicUsize,
    }

    impl StubProvider {
        pub fn healthy() -> Self {
            Self {
                models: Ok(vec!["stub-large".into(), "stub-small".into()]),
                reply: Ok("pong".into()),
                chunks: vec!["po", "", "ng"],
                calls: AtomicUsize::new(0),
            }
        }

        pub fn broken() -> Self {
            Self {
                models: Err("connection refused".into()),
                reply: Err("connection refused".into()),
                chunks: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn fail(&self, model: &str, reason: &str) -> ProviderError {
            ProviderError::Request {
                provider: "Stub".into(),
                model: model.into(),
                reason: reason.into(),
            }
        }
    }

    impl ModelProvider for StubProvider {
        fn name(&self) -> &str {
            "Stub"
        }

        fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
            self.models.clone().map_err(|r| self.fail("", &r))
        }

        fn check_availability(&self) -> Result<bool, ProviderError> {
            self.fetch_models().map(|m| !m.is_empty())
        }

        fn complete(&self, _: &Conversation, model: &str, _: &GenerationArgs) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|r| self.fail(model, &r))
        }

        fn complete_stream(&self, _: &Conversation, model: &str, _: &GenerationArgs) -> Result<ChunkStream, ProviderError> {
            self.reply.clone().map_err(|r| self.fail(model, &r))?;
            let lines = self.chunks.clone().into_iter().map(|c| Ok(c.to_string()));
            Ok(crate::stream::text_chunks(lines, "Stub", model, |l| Ok(Some(l.to_string()))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubProvider;
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new(Some("be brief".into()), "ping")
    }

    #[test]
    fn discovery_fails_soft() {
        let p = StubProvider::broken();
        assert!(p.get_models().is_empty());
        assert!(!p.is_available());
        assert_eq!(p.get_default_model(), None);
        assert!(!p.validate_model("stub-large"));
    }

    #[test]
    fn generation_fails_loud_with_provider_tag() {
        let p = StubProvider::broken();
        let err = p
            .send_message(&conversation(), "stub-large", &GenerationArgs::default())
            .unwrap_err();
        assert_eq!(err.provider(), "Stub");
        assert!(p
            .stream_message(&conversation(), "stub-large", &GenerationArgs::default())
            .is_err());
    }

    #[test]
    fn healthy_provider_round_trip() {
        let p = StubProvider::healthy();
        assert_eq!(p.get_default_model().as_deref(), Some("stub-large"));
        assert!(p.validate_model("stub-small"));
        assert!(!p.validate_model("other"));
        assert_eq!(
            p.send_message(&conversation(), "stub-large", &GenerationArgs::default())
                .unwrap(),
            "pong"
        );
        let chunks: Vec<String> = p
            .stream_message(&conversation(), "stub-large", &GenerationArgs::default())
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(chunks, vec!["po", "ng"]);
    }

    #[test]
    fn router_prefers_longest_prefix_and_explicit_tag() {
        let mut router = ProviderRouter::with_defaults();
        router.register("gpt-oss", ProviderKind::Ollama);
        assert_eq!(router.resolve("gpt-4o", None).unwrap(), Route::Prefix(ProviderKind::Gpt));
        assert_eq!(
            router.resolve("gpt-oss:20b", None).unwrap(),
            Route::Prefix(ProviderKind::Ollama)
        );
        assert_eq!(
            router.resolve("gemini-1.5-pro", None).unwrap(),
            Route::Prefix(ProviderKind::Google)
        );
        assert_eq!(
            router.resolve("llama3", None).unwrap(),
            Route::Fallback(ProviderKind::Ollama)
        );
        assert_eq!(
            router.resolve("llama3", Some(ProviderKind::Claude)).unwrap(),
            Route::Explicit(ProviderKind::Claude)
        );
    }

    #[test]
    fn router_without_fallback_rejects_unknown_models() {
        let config = ProvidersConfig {
            fallback: "none".into(),
            ..ProvidersConfig::default()
        };
        let router = ProviderRouter::from_config(&config).unwrap();
        assert!(matches!(
            router.resolve("mistral", None),
            Err(FactoryError::UnsupportedProvider(_))
        ));
        assert!(router.resolve("claude-3-haiku-20240307", None).is_ok());
    }

    #[test]
    fn config_routes_are_registered() {
        let mut config = ProvidersConfig::default();
        config.routes.insert("o1".into(), "gpt".into());
        let router = ProviderRouter::from_config(&config).unwrap();
        assert_eq!(router.resolve("o1-mini", None).unwrap(), Route::Prefix(ProviderKind::Gpt));

        config.routes.insert("x".into(), "bard".into());
        assert!(ProviderRouter::from_config(&config).is_err());
    }

    #[test]
    fn provider_kind_names() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!(
            "openai".parse::<ProviderKind>(),
            Err(FactoryError::UnsupportedProvider("openai".into()))
        );
    }

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.providers.ollama_host = "http://127.0.0.1:9".into();
        config.providers.openai_base_url = "http://127.0.0.1:9/v1".into();
        config.providers.timeout_secs = Some(2);
        config
    }

    #[test]
    fn missing_credentials_are_reported() {
        let config = offline_config();
        let env = EnvStore::new("/nonexistent/.env").isolated();
        let err = create_provider(ProviderKind::Gpt, &config, &env).err().unwrap();
        assert!(matches!(err, ProviderError::MissingCredential { key: OPENAI_API_KEY, .. }));
    }

    #[test]
    fn unreachable_backend_degrades_then_raises() {
        let config = offline_config();
        let env = EnvStore::new("/nonexistent/.env")
            .isolated()
            .with_value(OPENAI_API_KEY, "sk-test");
        let provider = create_provider(ProviderKind::Gpt, &config, &env).unwrap();
        assert!(provider.get_models().is_empty());
        let err = provider
            .send_message(&conversation(), "gpt-4o", &GenerationArgs::default())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Request { .. }));
    }

    #[test]
    fn unlisted_fallback_model_is_unsupported() {
        let config = offline_config();
        let env = EnvStore::new("/nonexistent/.env").isolated();
        let manager = ProviderManager::new(&config, &env).unwrap();
        let err = manager.select("mistral", None).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<FactoryError>(),
            Some(FactoryError::UnsupportedProvider(_))
        ));
        assert!(manager.discover().is_empty());
    }
}
