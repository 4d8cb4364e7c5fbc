//! REVE image generation adapter: create mode and edit mode, where edit
//! requires a reference image before the request leaves the process.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::{
    LlmError, LlmResult,
    provider::{AdapterTimeout, ProviderAdapter, ProviderReply, build_http_client, read_json_response},
    types::GenerationRequest,
};

#[derive(Clone, Debug)]
pub struct ReveAdapterConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: AdapterTimeout,
}

impl ReveAdapterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.reve.com/v1".to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("REVE_API_KEY").ok().map(Self::new)
    }
}

#[derive(Clone)]
pub struct ReveAdapter {
    client: reqwest::Client,
    config: ReveAdapterConfig,
}

impl std::fmt::Debug for ReveAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReveAdapter")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl ReveAdapter {
    pub fn new(config: ReveAdapterConfig) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|error| {
                LlmError::Configuration(format!("invalid REVE API key header: {error}"))
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = build_http_client(headers, config.timeout)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, edit_mode: bool) -> String {
        let path = if edit_mode { "image/edit" } else { "image/create" };
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &GenerationRequest) -> LlmResult<Value> {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
        });
        if request.edit_mode {
            let reference = request.reference_image.as_ref().ok_or_else(|| {
                LlmError::MissingInput("edit-mode request has no reference image".to_string())
            })?;
            body["reference_image"] = json!(reference);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for ReveAdapter {
    fn name(&self) -> &str {
        "reve"
    }

    async fn generate(&self, request: &GenerationRequest) -> LlmResult<ProviderReply> {
        let body = self.build_body(request)?;
        let response = self
            .client
            .post(self.endpoint(request.edit_mode))
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::Network(error.to_string()))?;
        let payload = read_json_response(self.name(), response).await?;

        let image = payload["image"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: self.name().to_string(),
                message: "missing image payload".to_string(),
            })?;
        Ok(ProviderReply {
            text: None,
            object: Some(json!({"image": image})),
            usage: None,
        })
    }
}
