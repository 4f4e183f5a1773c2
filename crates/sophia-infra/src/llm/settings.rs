//! Per-adapter connection settings derived from a [`ProviderConfiguration`].

use std::time::Duration;

use secrecy::SecretString;

use sophia_types::llm::{GenerationRequest, LlmError};
use sophia_types::provider::{ProviderConfiguration, ProviderKind};

/// Output cap used when neither the request nor the global config sets one
/// and the vendor requires it.
pub const FALLBACK_MAX_TOKENS: u32 = 1024;

/// What an adapter needs to talk to its vendor.
///
/// The API key is only exposed while building request headers.
#[derive(Debug)]
pub struct AdapterSettings {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub default_max_tokens: Option<u32>,
}

impl AdapterSettings {
    pub fn from_config(config: &ProviderConfiguration) -> Self {
        Self {
            name: config.name(),
            kind: config.provider,
            base_url: config.effective_base_url().to_string(),
            api_key: config
                .api_key
                .as_deref()
                .filter(|key| !key.trim().is_empty())
                .map(|key| SecretString::from(key.to_string())),
            default_model: config.effective_model().to_string(),
            timeout: config.timeout.as_duration(),
            max_retries: config.max_retries.get(),
            default_max_tokens: None,
        }
    }

    pub fn with_default_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The API key, or an authentication error naming the variable to set.
    pub fn require_key(&self) -> Result<&SecretString, LlmError> {
        self.api_key.as_ref().ok_or_else(|| {
            LlmError::authentication(
                &self.name,
                format!("API key not configured (set {})", self.kind.api_key_env_var()),
            )
        })
    }

    /// Model for `request` on this provider, falling back to the configured default.
    pub fn model_for(&self, request: &GenerationRequest) -> String {
        request
            .model_for_provider(&self.name)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Output cap for `request`: the request's own, then the global default.
    pub fn max_tokens_for(&self, request: &GenerationRequest) -> Option<u32> {
        request.max_tokens.or(self.default_max_tokens)
    }
}
