//! Application state wiring the configuration service to the infra layer.
//!
//! The service is generic over its store and provider factory; AppState pins
//! them to the JSON file store and the HTTP adapters.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use sophia_core::service::provider_config::ProviderConfigService;
use sophia_infra::config::load_global_config;
use sophia_infra::filesystem::resolve_data_dir;
use sophia_infra::llm::HttpProviderFactory;
use sophia_infra::store::JsonFileStore;
use sophia_types::config::GlobalConfig;

pub type ConcreteConfigService = ProviderConfigService<JsonFileStore, HttpProviderFactory>;

/// Shared state for every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConcreteConfigService>,
    pub global: GlobalConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, read `config.toml` and load persisted state.
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_at(resolve_data_dir()).await
    }

    pub async fn init_at(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let global = load_global_config(&data_dir).await;
        let service = ProviderConfigService::new(
            JsonFileStore::new(&data_dir),
            HttpProviderFactory::from_global(&global),
        )
        .with_defaults(global.clone());
        service
            .load()
            .await
            .with_context(|| format!("Failed to load provider state from {}", data_dir.display()))?;

        Ok(Self {
            service: Arc::new(service),
            global,
            data_dir,
        })
    }
}
