//! Error taxonomy for provider dispatch.

use serde::{Deserialize, Serialize};

/// Provider error classification derived from the HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Authentication,
    AccessDenied,
    NotFound,
    InvalidRequest,
    RateLimit,
    ContextLength,
    Server,
    Other,
}

/// Map an HTTP status code onto the provider error taxonomy.
pub fn classify_status(status: u16) -> ProviderErrorKind {
    match status {
        400 | 422 => ProviderErrorKind::InvalidRequest,
        401 => ProviderErrorKind::Authentication,
        403 => ProviderErrorKind::AccessDenied,
        404 => ProviderErrorKind::NotFound,
        413 => ProviderErrorKind::ContextLength,
        429 => ProviderErrorKind::RateLimit,
        500..=599 => ProviderErrorKind::Server,
        _ => ProviderErrorKind::Other,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{provider} returned HTTP {status} ({kind:?}): {message}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        status: u16,
        message: String,
    },
    #[error("{provider} returned an unexpected payload: {message}")]
    MalformedResponse { provider: String, message: String },
    #[error("missing required input: {0}")]
    MissingInput(String),
    #[error("no provider registered for model '{0}'")]
    UnknownModel(String),
}

impl LlmError {
    pub fn provider(provider: &str, status: u16, message: impl Into<String>) -> Self {
        LlmError::Provider {
            provider: provider.to_string(),
            kind: classify_status(status),
            status,
            message: message.into(),
        }
    }
}
