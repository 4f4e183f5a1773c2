//! Per-vendor settings for providers that speak the OpenAI chat protocol.
//!
//! OpenAI and OpenRouter share the wire format; they differ in the output
//! cap field they honor and in OpenRouter's attribution headers.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use sophia_types::provider::ProviderConfiguration;

/// Title sent to OpenRouter when the configuration does not set one.
pub const DEFAULT_APP_TITLE: &str = "Sophia";

/// Metadata keys read from the provider configuration.
pub const REFERER_METADATA_KEY: &str = "http_referer";
pub const TITLE_METADATA_KEY: &str = "app_title";

/// Vendor-specific knobs layered over the shared protocol.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatConfig {
    /// Extra headers sent on every request.
    pub extra_headers: HeaderMap,
    /// Send the legacy `max_tokens` field instead of `max_completion_tokens`.
    pub legacy_max_tokens: bool,
}

/// OpenAI: no extra headers, `max_completion_tokens`.
pub fn openai_defaults() -> OpenAiCompatConfig {
    OpenAiCompatConfig::default()
}

/// OpenRouter: `HTTP-Referer` / `X-Title` attribution and legacy `max_tokens`.
pub fn openrouter_defaults(config: &ProviderConfiguration) -> OpenAiCompatConfig {
    let metadata_str = |key: &str| config.metadata.get(key).and_then(|v| v.as_str());

    let mut extra_headers = HeaderMap::new();
    if let Some(value) = metadata_str(REFERER_METADATA_KEY).and_then(|v| HeaderValue::from_str(v).ok())
    {
        extra_headers.insert(HeaderName::from_static("http-referer"), value);
    }
    let title = metadata_str(TITLE_METADATA_KEY)
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_APP_TITLE));
    extra_headers.insert(HeaderName::from_static("x-title"), title);

    OpenAiCompatConfig {
        extra_headers,
        legacy_max_tokens: true,
    }
}
