//! Google adapter for the Gemini `generateContent` API.

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

#[derive(Clone, Debug)]
pub struct GoogleAdapterConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: AdapterTimeout,
}

impl GoogleAdapterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok()
            .map(Self::new)
    }
}

#[derive(Clone)]
pub struct GoogleAdapter {
    client: reqwest::Client,
    config: GoogleAdapterConfig,
}

impl std::fmt::Debug for GoogleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAdapter")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl GoogleAdapter {
    pub fn new(config: GoogleAdapterConfig) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&config.api_key).map_err(|error| {
                LlmError::Configuration(format!("invalid Google API key header: {error}"))
            })?,
        );
        let client = build_http_client(headers, config.timeout)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{model}:generateContent",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "contents": [{"parts": [{"text": request.prompt}]}],
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        let mut generation_config = json!({});
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(schema) = &request.schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }
        if let Some(map) = generation_config.as_object()
            && !map.is_empty()
        {
            body["generationConfig"] = generation_config;
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &str {
        "google"
    }

    async fn generate(&self, request: &GenerationRequest) -> LlmResult<ProviderReply> {
        let response = self
            .client
            .post(self.endpoint(&request.model))
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|error| LlmError::Network(error.to_string()))?;
        let payload = read_json_response(self.name(), response).await?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: self.name().to_string(),
                message: "missing candidates[0].content.parts[0].text".to_string(),
            })?
            .to_string();
        let object = match request.schema {
            Some(_) => Some(object_from_text(self.name(), &text)?),
            None => None,
        };
        let usage = payload.get("usageMetadata").map(|usage| {
            Usage::new(
                usage["promptTokenCount"].as_u64().unwrap_or(0),
                usage["candidatesTokenCount"].as_u64().unwrap_or(0),
            )
        });
        Ok(ProviderReply {
            text: Some(text),
            object,
            usage,
        })
    }
}
