//! LLM provider implementations.
//!
//! Concrete implementations of the [`LlmProvider`](sophia_core::llm::provider::LlmProvider)
//! trait for Ollama, OpenAI, OpenRouter, Anthropic and Gemini, plus the
//! [`HttpProviderFactory`] that picks the right one for a
//! [`ProviderConfiguration`].

pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod ollama;
pub mod openai_compat;
pub mod retry;
pub mod settings;
pub mod streaming;

use sophia_core::llm::box_provider::BoxLlmProvider;
use sophia_core::llm::factory::{self, ProviderFactory};
use sophia_core::llm::orchestrator::MultiProviderOrchestrator;
use sophia_core::service::store::HealthMap;
use sophia_types::config::GlobalConfig;
use sophia_types::llm::LlmError;
use sophia_types::provider::{ProviderConfiguration, ProviderKind};

use self::anthropic::AnthropicProvider;
use self::gemini::GeminiProvider;
use self::ollama::OllamaProvider;
use self::openai_compat::OpenAiCompatibleProvider;
use self::settings::AdapterSettings;

/// Builds the HTTP adapter matching each configuration's kind.
///
/// Construction never contacts the vendor; a missing API key only surfaces
/// from `initialize` or `generate`.
#[derive(Debug, Clone, Default)]
pub struct HttpProviderFactory {
    default_max_tokens: Option<u32>,
}

impl HttpProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            default_max_tokens: global.default_max_tokens,
        }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, config: &ProviderConfiguration) -> Result<BoxLlmProvider, LlmError> {
        let settings =
            AdapterSettings::from_config(config).with_default_max_tokens(self.default_max_tokens);
        let provider = match config.provider {
            ProviderKind::Ollama => BoxLlmProvider::new(OllamaProvider::new(settings)?),
            ProviderKind::OpenAi => BoxLlmProvider::new(OpenAiCompatibleProvider::openai(settings)?),
            ProviderKind::OpenRouter => BoxLlmProvider::new(OpenAiCompatibleProvider::openrouter(
                settings,
                openai_compat::config::openrouter_defaults(config),
            )?),
            ProviderKind::Anthropic => BoxLlmProvider::new(AnthropicProvider::new(settings)?),
            ProviderKind::Gemini => BoxLlmProvider::new(GeminiProvider::new(settings)?),
        };
        tracing::debug!(provider = %provider.name(), "Created provider");
        Ok(provider)
    }
}

/// Build an orchestrator over the enabled configurations using the HTTP adapters.
pub fn build_orchestrator(
    configs: &[ProviderConfiguration],
    health: &HealthMap,
    global: &GlobalConfig,
) -> MultiProviderOrchestrator {
    factory::build_orchestrator(configs, health, &HttpProviderFactory::from_global(global))
}
