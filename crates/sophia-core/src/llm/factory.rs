//! Provider construction port.
//!
//! The configuration service and the orchestrator builder depend on this
//! trait; sophia-infra implements it with the real HTTP adapters.

use sophia_types::llm::LlmError;
use sophia_types::provider::{HealthStatus, ProviderConfiguration, ProviderKind};

use super::box_provider::BoxLlmProvider;
use super::orchestrator::MultiProviderOrchestrator;
use crate::service::store::HealthMap;

/// Builds a provider instance from its configuration.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, config: &ProviderConfiguration) -> Result<BoxLlmProvider, LlmError>;

    /// Build a provider with default settings for `kind`.
    fn create_kind(&self, kind: ProviderKind) -> Result<BoxLlmProvider, LlmError> {
        self.create(&ProviderConfiguration::new(kind))
    }
}

/// Build an orchestrator from enabled configurations, ordered by `(priority, name)`.
///
/// Providers whose last recorded check was `Unavailable` move behind the
/// rest, keeping their relative order; they stay registered as a last
/// resort. Disabled configurations are skipped. A configuration the factory
/// rejects is logged and left out rather than failing the whole build.
pub fn build_orchestrator<F: ProviderFactory + ?Sized>(
    configs: &[ProviderConfiguration],
    health: &HealthMap,
    factory: &F,
) -> MultiProviderOrchestrator {
    let unavailable = |config: &ProviderConfiguration| {
        health
            .get(&config.name())
            .is_some_and(|h| h.status == HealthStatus::Unavailable)
    };
    let mut enabled: Vec<&ProviderConfiguration> = configs.iter().filter(|c| c.enabled).collect();
    enabled.sort_by(|a, b| {
        unavailable(a)
            .cmp(&unavailable(b))
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.name().cmp(&b.name()))
    });

    let mut orchestrator = MultiProviderOrchestrator::new();
    for config in enabled {
        let name = config.name();
        match factory.create(config) {
            Ok(provider) => {
                orchestrator.register_with_timeout(name, provider, config.timeout.as_duration())
            }
            Err(err) => {
                tracing::warn!(provider = %name, error = %err, "Skipping provider that failed to build");
            }
        }
    }
    orchestrator
}
