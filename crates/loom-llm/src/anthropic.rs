//! Anthropic adapter using the native Messages API (`/v1/messages`).

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::{
    LlmError, LlmResult,
    provider::{
        AdapterTimeout, ProviderAdapter, ProviderReply, build_http_client, object_from_text,
        read_json_response,
    },
    types::{GenerationRequest, Usage},
};

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Clone, Debug)]
pub struct AnthropicAdapterConfig {
    pub api_key: String,
    pub base_url: String,
    pub anthropic_version: String,
    pub timeout: AdapterTimeout,
}

impl AnthropicAdapterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        Some(config)
    }
}

#[derive(Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    config: AnthropicAdapterConfig,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.config.base_url)
            .field("anthropic_version", &self.config.anthropic_version)
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(config: AnthropicAdapterConfig) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&config.api_key).map_err(|error| {
                LlmError::Configuration(format!("invalid Anthropic API key header: {error}"))
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&config.anthropic_version).map_err(|error| {
                LlmError::Configuration(format!("invalid anthropic-version header: {error}"))
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = build_http_client(headers, config.timeout)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &GenerationRequest) -> Value {
        let mut system = request.system.clone().unwrap_or_default();
        if let Some(schema) = &request.schema {
            // The Messages API has no response_format; steer the model and
            // parse the reply as JSON instead.
            if !system.is_empty() {
                system.push('\n');
            }
            system.push_str(&format!(
                "Respond with a single JSON value matching this JSON schema, no prose: {schema}"
            ));
        }
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> LlmResult<ProviderReply> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|error| LlmError::Network(error.to_string()))?;
        let payload = read_json_response(self.name(), response).await?;

        let text = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: self.name().to_string(),
                message: "missing content[0].text".to_string(),
            })?
            .to_string();
        let object = match request.schema {
            Some(_) => Some(object_from_text(self.name(), &text)?),
            None => None,
        };
        let usage = payload.get("usage").map(|usage| {
            Usage::new(
                usage["input_tokens"].as_u64().unwrap_or(0),
                usage["output_tokens"].as_u64().unwrap_or(0),
            )
        });
        Ok(ProviderReply {
            text: Some(text),
            object,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requests_fold_instructions_into_system() {
        let adapter = AnthropicAdapter::new(AnthropicAdapterConfig::new("key")).unwrap();
        let request = GenerationRequest {
            model: "claude-sonnet-4-5".into(),
            system: Some("Be brief.".into()),
            prompt: "List colors".into(),
            schema: Some(json!({"type": "array"})),
            ..GenerationRequest::default()
        };
        let body = adapter.build_body(&request);
        let system = body["system"].as_str().unwrap();
        assert!(system.starts_with("Be brief."));
        assert!(system.contains("JSON schema"));
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }
}
