//! Thin provider proxies: a single generation request in, a single
//! `{success, text|object, error?, usage?, duration}` outcome back.
//!
//! There is deliberately no retry or backoff policy here beyond the HTTP
//! client's defaults; a failed call is captured into the outcome and the
//! caller decides what to do with it.

mod anthropic;
mod catalog;
mod client;
mod errors;
mod google;
mod openai;
mod provider;
mod reve;
mod types;

pub use anthropic::{AnthropicAdapter, AnthropicAdapterConfig};
pub use catalog::provider_for_model;
pub use client::Client;
pub use errors::{LlmError, ProviderErrorKind, classify_status};
pub use google::{GoogleAdapter, GoogleAdapterConfig};
pub use openai::{OpenAICompatibleAdapter, OpenAICompatibleConfig};
pub use provider::{AdapterTimeout, ProviderAdapter, ProviderReply};
pub use reve::{ReveAdapter, ReveAdapterConfig};
pub use types::{GenerationRequest, GenerationOutcome, Usage};

pub type LlmResult<T> = Result<T, LlmError>;
