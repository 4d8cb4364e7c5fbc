//! Provider registry and the dispatch wrapper that turns adapter results
//! (and failures) into [`GenerationOutcome`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::{
    AnthropicAdapter, AnthropicAdapterConfig, GoogleAdapter, GoogleAdapterConfig, LlmError,
    LlmResult, OpenAICompatibleAdapter, OpenAICompatibleConfig, ReveAdapter, ReveAdapterConfig,
    catalog::provider_for_model,
    provider::ProviderAdapter,
    types::{GenerationOutcome, GenerationRequest},
};

#[derive(Clone, Default)]
pub struct Client {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Build a client from whatever API keys the environment carries.
    /// Errors only when no provider at all is configured.
    pub fn from_env() -> LlmResult<Self> {
        let mut client = Self::new();
        if let Some(config) = OpenAICompatibleConfig::openai_from_env() {
            client.register_provider(Arc::new(OpenAICompatibleAdapter::new(config)?));
        }
        if let Some(config) = OpenAICompatibleConfig::groq_from_env() {
            client.register_provider(Arc::new(OpenAICompatibleAdapter::new(config)?));
        }
        if let Some(config) = OpenAICompatibleConfig::xai_from_env() {
            client.register_provider(Arc::new(OpenAICompatibleAdapter::new(config)?));
        }
        if let Some(config) = AnthropicAdapterConfig::from_env() {
            client.register_provider(Arc::new(AnthropicAdapter::new(config)?));
        }
        if let Some(config) = GoogleAdapterConfig::from_env() {
            client.register_provider(Arc::new(GoogleAdapter::new(config)?));
        }
        if let Some(config) = ReveAdapterConfig::from_env() {
            client.register_provider(Arc::new(ReveAdapter::new(config)?));
        }
        if client.providers.is_empty() {
            return Err(LlmError::Configuration(
                "no providers configured from environment".to_string(),
            ));
        }
        Ok(client)
    }

    /// Dispatch one request. Never returns an error: every failure path,
    /// including pre-dispatch validation, lands in the outcome so sibling
    /// units are unaffected.
    pub async fn dispatch(&self, request: &GenerationRequest) -> GenerationOutcome {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        // Missing-input short circuit: never hits the network.
        if request.edit_mode && request.reference_image.is_none() {
            return GenerationOutcome::failure(
                "edit-mode request has no reference image",
                elapsed(started),
            );
        }

        let adapter = match self.resolve(&request.model) {
            Ok(adapter) => adapter,
            Err(error) => return GenerationOutcome::failure(error.to_string(), elapsed(started)),
        };

        debug!(model = %request.model, provider = adapter.name(), "dispatching generation request");
        match adapter.generate(request).await {
            Ok(reply) => GenerationOutcome {
                success: true,
                text: reply.text,
                object: reply.object,
                error: None,
                usage: reply.usage,
                duration_ms: elapsed(started),
            },
            Err(error) => GenerationOutcome::failure(error.to_string(), elapsed(started)),
        }
    }

    fn resolve(&self, model: &str) -> LlmResult<Arc<dyn ProviderAdapter>> {
        let name =
            provider_for_model(model).ok_or_else(|| LlmError::UnknownModel(model.to_string()))?;
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::Configuration(format!("provider '{name}' is not registered")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderReply;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockAdapter {
        name: &'static str,
        calls: AtomicUsize,
        reply: LlmResult<ProviderReply>,
    }

    impl MockAdapter {
        fn ok(name: &'static str, text: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                reply: Ok(ProviderReply {
                    text: Some(text.to_string()),
                    object: None,
                    usage: None,
                }),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                reply: Err(LlmError::provider(name, 429, "slow down")),
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, _request: &GenerationRequest) -> LlmResult<ProviderReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(error) => Err(LlmError::Configuration(error.to_string())),
            }
        }
    }

    fn request(model: &str) -> GenerationRequest {
        GenerationRequest {
            model: model.into(),
            prompt: "hi".into(),
            ..GenerationRequest::default()
        }
    }

    #[tokio::test]
    async fn dispatch_wraps_success_into_an_outcome() {
        let mut client = Client::new();
        client.register_provider(MockAdapter::ok("openai", "hello"));
        let outcome = client.dispatch(&request("gpt-4o")).await;
        assert!(outcome.success);
        assert_eq!(outcome.text.as_deref(), Some("hello"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn provider_failures_are_captured_not_thrown() {
        let mut client = Client::new();
        client.register_provider(MockAdapter::failing("openai"));
        let outcome = client.dispatch(&request("gpt-4o")).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("slow down"));
    }

    #[tokio::test]
    async fn unknown_models_fail_without_a_provider() {
        let client = Client::new();
        let outcome = client.dispatch(&request("mystery-9000")).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("mystery-9000"));
    }

    #[tokio::test]
    async fn missing_reference_image_short_circuits_before_the_adapter() {
        let adapter = MockAdapter::ok("reve", "unused");
        let mut client = Client::new();
        client.register_provider(adapter.clone());

        let mut req = request("reve-image-1");
        req.edit_mode = true;
        let outcome = client.dispatch(&req).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("reference image"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }
}
