use crate::types::{PrismError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four upstream families we can speak to. OpenAI and OpenRouter share a
/// wire dialect but not credentials or endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    OpenAi,
    Anthropic,
    OpenRouter,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = PrismError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" | "gemini" => Ok(Self::Google),
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(PrismError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl Provider {
    /// The request header clients use to hand us their own API key.
    pub fn key_header(&self) -> &'static str {
        match self {
            Self::Google => "x-google-api-key",
            Self::OpenAi => "x-openai-api-key",
            Self::Anthropic => "x-anthropic-api-key",
            Self::OpenRouter => "x-openrouter-api-key",
        }
    }

    /// Environment variable holding the operator fallback key.
    pub fn host_key_env(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// Static configuration for one model offered to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Display name clients send in the `model` field.
    pub name: String,
    /// Provider-specific model identifier used on the wire.
    pub model_id: String,
    pub provider: Provider,
    pub supports_reasoning: bool,
    pub can_toggle_thinking: bool,
}

impl ModelConfig {
    fn new(
        name: &str,
        model_id: &str,
        provider: Provider,
        supports_reasoning: bool,
        can_toggle_thinking: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            model_id: model_id.to_string(),
            provider,
            supports_reasoning,
            can_toggle_thinking,
        }
    }
}

lazy_static::lazy_static! {
    static ref MODEL_REGISTRY: Vec<ModelConfig> = vec![
        ModelConfig::new("Gemini 2.5 Flash", "gemini-2.5-flash", Provider::Google, false, false),
        ModelConfig::new("Gemini 2.5 Pro", "gemini-2.5-pro", Provider::Google, true, true),
        ModelConfig::new("GPT-4o", "gpt-4o", Provider::OpenAi, false, false),
        ModelConfig::new("GPT-4o mini", "gpt-4o-mini", Provider::OpenAi, false, false),
        ModelConfig::new("o4-mini", "o4-mini", Provider::OpenAi, true, false),
        ModelConfig::new("Claude 3.7 Sonnet", "claude-3-7-sonnet-20250219", Provider::Anthropic, true, true),
        ModelConfig::new("Claude 3.5 Sonnet", "claude-3-5-sonnet-20241022", Provider::Anthropic, false, false),
        ModelConfig::new("DeepSeek R1", "deepseek/deepseek-r1", Provider::OpenRouter, true, false),
        ModelConfig::new("Llama 3.3 70B", "meta-llama/llama-3.3-70b-instruct", Provider::OpenRouter, false, false),
    ];
}

/// Look up a model by display name. Names of the form `provider/model-id`
/// are accepted as a raw passthrough for models not in the registry.
pub fn resolve_model(name: &str) -> Result<ModelConfig> {
    if let Some(config) = MODEL_REGISTRY.iter().find(|m| m.name == name) {
        return Ok(config.clone());
    }

    if let Some((prefix, model_id)) = name.split_once('/') {
        let provider: Provider = prefix.parse()?;
        if model_id.is_empty() {
            return Err(PrismError::UnknownModel(name.to_string()).into());
        }
        return Ok(ModelConfig::new(name, model_id, provider, false, false));
    }

    Err(PrismError::UnknownModel(name.to_string()).into())
}

/// The full registry, for the model picker endpoint.
pub fn available_models() -> Vec<ModelConfig> {
    MODEL_REGISTRY.clone()
}

/// Every distinct client key header, for the CORS allow list.
pub fn api_key_headers() -> Vec<&'static str> {
    vec![
        Provider::Google.key_header(),
        Provider::OpenAi.key_header(),
        Provider::Anthropic.key_header(),
        Provider::OpenRouter.key_header(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registry_model_by_display_name() {
        let config = resolve_model("Gemini 2.5 Flash").unwrap();
        assert_eq!(config.model_id, "gemini-2.5-flash");
        assert_eq!(config.provider, Provider::Google);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = resolve_model("GPT-9 Ultra").unwrap_err();
        assert!(matches!(err.inner, PrismError::UnknownModel(_)));
    }

    #[test]
    fn provider_prefixed_name_passes_through() {
        let config = resolve_model("anthropic/claude-3-opus-20240229").unwrap();
        assert_eq!(config.provider, Provider::Anthropic);
        assert_eq!(config.model_id, "claude-3-opus-20240229");
    }

    #[test]
    fn openrouter_passthrough_keeps_vendor_segment() {
        let config = resolve_model("openrouter/qwen/qwen-2.5-72b-instruct").unwrap();
        assert_eq!(config.provider, Provider::OpenRouter);
        assert_eq!(config.model_id, "qwen/qwen-2.5-72b-instruct");
    }

    #[test]
    fn unknown_provider_prefix_is_unsupported() {
        let err = resolve_model("mistral/mistral-large").unwrap_err();
        assert!(matches!(err.inner, PrismError::UnsupportedProvider(_)));
    }
}
