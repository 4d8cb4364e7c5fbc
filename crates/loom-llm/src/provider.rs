use crate::{
    LlmError, LlmResult,
    types::{GenerationRequest, Usage},
};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;

/// Connection and request timeouts in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdapterTimeout {
    pub connect: f64,
    pub request: f64,
}

impl Default for AdapterTimeout {
    fn default() -> Self {
        Self {
            connect: 10.0,
            request: 120.0,
        }
    }
}

/// What a provider hands back on success; the client wraps it into a
/// [`GenerationOutcome`](crate::GenerationOutcome) with timing attached.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderReply {
    pub text: Option<String>,
    pub object: Option<Value>,
    pub usage: Option<Usage>,
}

/// One hosted model provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> LlmResult<ProviderReply>;
}

pub(crate) fn build_http_client(
    headers: HeaderMap,
    timeout: AdapterTimeout,
) -> LlmResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs_f64(timeout.connect))
        .timeout(Duration::from_secs_f64(timeout.request))
        .default_headers(headers)
        .build()
        .map_err(|error| LlmError::Network(error.to_string()))
}

/// Read the response body, mapping HTTP-level failures into the provider
/// error taxonomy before any JSON parsing happens.
pub(crate) async fn read_json_response(
    provider: &str,
    response: reqwest::Response,
) -> LlmResult<Value> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|error| LlmError::Network(error.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(LlmError::provider(provider, status, body));
    }
    serde_json::from_str(&body).map_err(|error| LlmError::MalformedResponse {
        provider: provider.to_string(),
        message: error.to_string(),
    })
}

/// Structured-output replies come back as text; parse it into the object
/// the schema asked for.
pub(crate) fn object_from_text(provider: &str, text: &str) -> LlmResult<Value> {
    serde_json::from_str(text).map_err(|_| LlmError::MalformedResponse {
        provider: provider.to_string(),
        message: "structured output is not valid JSON".to_string(),
    })
}
