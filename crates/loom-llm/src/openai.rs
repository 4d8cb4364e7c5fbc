//! OpenAI-compatible chat completions adapter. Also serves Groq and xAI,
//! which speak the same wire dialect behind different base URLs.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::{
    LlmError, LlmResult,
    provider::{
        AdapterTimeout, ProviderAdapter, ProviderReply, build_http_client, object_from_text,
        read_json_response,
    },
    types::{GenerationRequest, Usage},
};

#[derive(Clone, Debug)]
pub struct OpenAICompatibleConfig {
    pub provider_name: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout: AdapterTimeout,
}

impl OpenAICompatibleConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_name: "openai".to_string(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            provider_name: "groq".to_string(),
            api_key: api_key.into(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn xai(api_key: impl Into<String>) -> Self {
        Self {
            provider_name: "xai".to_string(),
            api_key: api_key.into(),
            base_url: "https://api.x.ai/v1".to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn openai_from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        let mut config = Self::openai(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Some(config)
    }

    pub fn groq_from_env() -> Option<Self> {
        std::env::var("GROQ_API_KEY").ok().map(Self::groq)
    }

    pub fn xai_from_env() -> Option<Self> {
        std::env::var("XAI_API_KEY").ok().map(Self::xai)
    }
}

#[derive(Clone)]
pub struct OpenAICompatibleAdapter {
    client: reqwest::Client,
    config: OpenAICompatibleConfig,
}

impl std::fmt::Debug for OpenAICompatibleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAICompatibleAdapter")
            .field("provider_name", &self.config.provider_name)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OpenAICompatibleAdapter {
    pub fn new(config: OpenAICompatibleConfig) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|error| {
                LlmError::Configuration(format!(
                    "invalid {} API key header: {error}",
                    config.provider_name
                ))
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = build_http_client(headers, config.timeout)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_body(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(schema) = &request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "response", "schema": schema, "strict": true},
            });
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAICompatibleAdapter {
    fn name(&self) -> &str {
        &self.config.provider_name
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

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: self.name().to_string(),
                message: "missing choices[0].message.content".to_string(),
            })?
            .to_string();
        let object = match request.schema {
            Some(_) => Some(object_from_text(self.name(), &text)?),
            None => None,
        };
        let usage = payload.get("usage").map(|usage| {
            Usage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0),
            )
        });
        Ok(ProviderReply {
            text: Some(text),
            object,
            usage,
        })
    }
}
