use crate::models::Provider;
use crate::types::{PrismError, Result};

/// Where a resolved key came from. Observability only; callers must not
/// branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    User,
    Host,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Host => write!(f, "host"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
}

/// Operator fallback credentials, loaded once at startup and never mutated.
#[derive(Debug, Clone, Default)]
pub struct HostKeys {
    google: Option<String>,
    openai: Option<String>,
    anthropic: Option<String>,
    openrouter: Option<String>,
}

impl HostKeys {
    pub fn from_env() -> Self {
        fn non_empty(var: &str) -> Option<String> {
            match std::env::var(var) {
                Ok(v) if !v.trim().is_empty() => Some(v),
                _ => None,
            }
        }
        Self {
            google: non_empty(Provider::Google.host_key_env()),
            openai: non_empty(Provider::OpenAi.host_key_env()),
            anthropic: non_empty(Provider::Anthropic.host_key_env()),
            openrouter: non_empty(Provider::OpenRouter.host_key_env()),
        }
    }

    #[cfg(test)]
    pub fn with_key(provider: Provider, key: &str) -> Self {
        let mut keys = Self::default();
        match provider {
            Provider::Google => keys.google = Some(key.to_string()),
            Provider::OpenAi => keys.openai = Some(key.to_string()),
            Provider::Anthropic => keys.anthropic = Some(key.to_string()),
            Provider::OpenRouter => keys.openrouter = Some(key.to_string()),
        }
        keys
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Google => self.google.as_deref(),
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::OpenRouter => self.openrouter.as_deref(),
        }
    }
}

/// Pure lookup, no retries: a non-empty user key always wins; otherwise the
/// host key for that provider; otherwise `MissingCredential`.
pub fn resolve(
    provider: Provider,
    user_key: Option<&str>,
    host_keys: &HostKeys,
) -> Result<ResolvedKey> {
    if let Some(key) = user_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            tracing::debug!("[KEYS] Using user-supplied key for {}", provider);
            return Ok(ResolvedKey {
                key: trimmed.to_string(),
                source: KeySource::User,
            });
        }
    }

    if let Some(key) = host_keys.get(provider) {
        tracing::debug!("[KEYS] Using host fallback key for {}", provider);
        return Ok(ResolvedKey {
            key: key.to_string(),
            source: KeySource::Host,
        });
    }

    tracing::warn!("[KEYS] No usable key for {}", provider);
    Err(PrismError::MissingCredential(provider).into())
}
