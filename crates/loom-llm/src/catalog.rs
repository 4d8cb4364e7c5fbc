//! Static model-name routing: which provider serves a given model id.

/// Prefix table, first match wins. Ordering matters where prefixes nest.
const ROUTES: &[(&str, &str)] = &[
    ("gpt-", "openai"),
    ("chatgpt-", "openai"),
    ("o1", "openai"),
    ("o3", "openai"),
    ("o4", "openai"),
    ("claude-", "anthropic"),
    ("gemini-", "google"),
    ("grok-", "xai"),
    ("llama-", "groq"),
    ("meta-llama/", "groq"),
    ("mixtral-", "groq"),
    ("qwen", "groq"),
    ("reve-", "reve"),
];

/// Resolve the provider name for a model id, or `None` for an unknown
/// model family.
pub fn provider_for_model(model: &str) -> Option<&'static str> {
    let lower = model.to_ascii_lowercase();
    ROUTES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, provider)| *provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_known_model_families() {
        assert_eq!(provider_for_model("gpt-4o"), Some("openai"));
        assert_eq!(provider_for_model("o3-mini"), Some("openai"));
        assert_eq!(provider_for_model("claude-sonnet-4-5"), Some("anthropic"));
        assert_eq!(provider_for_model("gemini-2.0-flash"), Some("google"));
        assert_eq!(provider_for_model("grok-3"), Some("xai"));
        assert_eq!(provider_for_model("llama-3.3-70b-versatile"), Some("groq"));
        assert_eq!(provider_for_model("reve-image-1"), Some("reve"));
        assert_eq!(provider_for_model("mystery-model"), None);
    }
}
