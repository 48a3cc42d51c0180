//! # Spindle
//!
//! Content extraction and AI orchestration from the command line.
//!
//! Spindle pulls content out of code trees, git history, web pages, YouTube
//! videos and PowerPoint decks, normalizes it into a [`ResultMapping`], and
//! hands it to output handlers. The same configuration drives a small set of
//! model providers for pattern-based prompting.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Factory   │──▶│   Fetcher   │──▶│ ResultMapping│──▶│ Handler  │
//! │ (config +  │   │ fetch ▸     │   └──────────────┘   │ file /   │
//! │  overrides)│   │ process ▸   │                      │ console /│
//! └────────────┘   │ format      │                      │ composite│
//!                  └─────────────┘                      └──────────┘
//!
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────────┐
//! │ Conversation │──▶│ ProviderRouter │──▶│ ModelProvider        │
//! └──────────────┘   └────────────────┘   │ GPT/Claude/Google/   │
//!                                         │ Ollama               │
//!                                         └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with per-factory defaults |
//! | [`env_store`] | `.env` credential store |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`serializer`] | JSON, plaintext and YAML encoders |
//! | [`processor`] | Four-stage transformation template |
//! | [`fetcher`] | Three-stage acquisition template |
//! | [`decorators`] | Logging and timing fetcher wrappers |
//! | [`visitor`] | Kind-dispatched fetcher visitors |
//! | [`handler`] | File, console and composite output |
//! | [`factory`] | Per-domain factories |
//! | [`source_code`], [`source_git`], [`source_web`], [`source_youtube`], [`source_pptx`], [`source_save`] | Domain pipelines |
//! | [`pptx`] | PowerPoint reader/writer |
//! | [`provider`] | Model provider abstraction and routing |
//! | [`stream`] | Streaming response decoders |
//! | [`fabric`] | Pattern prompting, setup and pattern updates |
//! | [`ticket`] | Jira ticket creation |
//!
//! [`ResultMapping`]: models::ResultMapping

pub mod config;
pub mod decorators;
pub mod env_store;
pub mod error;
pub mod fabric;
pub mod factory;
pub mod fetcher;
pub mod handler;
pub mod logging;
pub mod models;
pub mod pptx;
pub mod processor;
pub mod provider;
pub mod provider_claude;
pub mod provider_google;
pub mod provider_ollama;
pub mod provider_openai;
pub mod serializer;
pub mod source_code;
pub mod source_git;
pub mod source_pptx;
pub mod source_save;
pub mod source_web;
pub mod source_youtube;
pub mod stream;
pub mod ticket;
pub mod visitor;
