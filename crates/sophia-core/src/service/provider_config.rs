//! Provider configuration service.
//!
//! Owns the in-memory view of provider configurations, health records and
//! the active selection, and persists every change through a
//! [`ConfigStore`]. All state sits behind one async mutex so concurrent
//! callers serialize their read-modify-write cycles; a document is only
//! committed in memory after the store accepted it.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use tokio::sync::Mutex;

use sophia_types::config::GlobalConfig;
use sophia_types::error::ConfigError;
use sophia_types::provider::{
    ActiveSelection, BackupInfo, BackupSnapshot, MaxRetries, ProviderConfiguration, ProviderHealth,
    ProviderKind, TimeoutSecs,
};

use crate::llm::factory::{ProviderFactory, build_orchestrator};
use crate::llm::health::{HealthMonitor, ProbeOutcome};
use crate::llm::orchestrator::MultiProviderOrchestrator;
use crate::service::store::{ConfigStore, ConfigurationMap, HealthMap};

/// Environment variable naming the provider consumers should prefer.
pub const SELECTED_PROVIDER_VAR: &str = "SELECTED_LLM_PROVIDER";
/// Environment variable naming the model to use with the selected provider.
pub const SELECTED_MODEL_VAR: &str = "SELECTED_LLM_MODEL";

/// What `sync_from` changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub active: Option<ActiveSelection>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.active.is_none()
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    configurations: ConfigurationMap,
    health: HealthMap,
    active: Option<ActiveSelection>,
}

/// Configuration, health and backup management for LLM providers.
pub struct ProviderConfigService<S: ConfigStore, F: ProviderFactory> {
    store: S,
    factory: F,
    defaults: GlobalConfig,
    state: Mutex<ServiceState>,
}

impl<S: ConfigStore, F: ProviderFactory> ProviderConfigService<S, F> {
    pub fn new(store: S, factory: F) -> Self {
        Self {
            store,
            factory,
            defaults: GlobalConfig::default(),
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Use `config` for the timeout and retry budget of providers created by sync.
    pub fn with_defaults(mut self, config: GlobalConfig) -> Self {
        self.defaults = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Read every persisted document into memory, replacing current state.
    pub async fn load(&self) -> Result<(), ConfigError> {
        let configurations = self.store.load_configurations().await?;
        let health = self.store.load_health().await?;
        let active = self.store.load_active().await?;
        tracing::debug!(
            configurations = configurations.len(),
            health_records = health.len(),
            "Loaded provider configuration"
        );

        let mut state = self.state.lock().await;
        state.configurations = configurations;
        state.health = health;
        state.active = active;
        Ok(())
    }

    // --- Configurations ---

    /// Add a new configuration. Fails if one with the same name exists.
    pub async fn create_configuration(
        &self,
        config: ProviderConfiguration,
    ) -> Result<ProviderConfiguration, ConfigError> {
        let name = config.name();
        let mut state = self.state.lock().await;
        if state.configurations.contains_key(&name) {
            return Err(ConfigError::AlreadyExists(name));
        }
        let mut next = state.configurations.clone();
        next.insert(name.clone(), config.clone());
        self.commit_configurations(&mut state, next).await?;
        tracing::info!(provider = %name, "Created provider configuration");
        Ok(config)
    }

    /// Insert or replace a configuration, keeping the original `created_at`.
    pub async fn upsert_configuration(
        &self,
        mut config: ProviderConfiguration,
    ) -> Result<ProviderConfiguration, ConfigError> {
        let name = config.name();
        let mut state = self.state.lock().await;
        if let Some(existing) = state.configurations.get(&name) {
            config.created_at = existing.created_at;
            config.touch();
        }
        let mut next = state.configurations.clone();
        next.insert(name.clone(), config.clone());
        self.commit_configurations(&mut state, next).await?;
        tracing::info!(provider = %name, "Saved provider configuration");
        Ok(config)
    }

    /// Apply `update` to an existing configuration.
    pub async fn update_configuration<U>(
        &self,
        name: &str,
        update: U,
    ) -> Result<ProviderConfiguration, ConfigError>
    where
        U: FnOnce(&mut ProviderConfiguration),
    {
        let mut state = self.state.lock().await;
        let mut next = state.configurations.clone();
        let config = next
            .get_mut(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))?;
        let provider = config.provider;
        update(config);
        // The key and the vendor stay in lockstep.
        config.provider = provider;
        config.touch();
        let updated = config.clone();
        self.commit_configurations(&mut state, next).await?;
        tracing::info!(provider = %name, "Updated provider configuration");
        Ok(updated)
    }

    /// Remove a configuration and its health record.
    ///
    /// Returns whether anything was removed; removing an absent name succeeds.
    pub async fn delete_configuration(&self, name: &str) -> Result<bool, ConfigError> {
        let mut state = self.state.lock().await;
        if !state.configurations.contains_key(name) {
            return Ok(false);
        }
        let mut next = state.configurations.clone();
        next.remove(name);
        self.commit_configurations(&mut state, next).await?;

        if state.health.contains_key(name) {
            let mut health = state.health.clone();
            health.remove(name);
            self.commit_health(&mut state, health).await?;
        }
        if state.active.as_ref().is_some_and(|a| a.provider == name) {
            self.store.save_active(None).await?;
            state.active = None;
        }
        tracing::info!(provider = %name, "Deleted provider configuration");
        Ok(true)
    }

    pub async fn get_configuration(&self, name: &str) -> Option<ProviderConfiguration> {
        self.state.lock().await.configurations.get(name).cloned()
    }

    /// All configurations, sorted by priority then name.
    pub async fn list_configurations(&self) -> Vec<ProviderConfiguration> {
        let state = self.state.lock().await;
        sorted(state.configurations.values())
    }

    /// Enabled configurations, sorted by priority then name.
    pub async fn get_enabled_providers(&self) -> Vec<ProviderConfiguration> {
        let state = self.state.lock().await;
        sorted(state.configurations.values().filter(|c| c.enabled))
    }

    pub async fn set_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<ProviderConfiguration, ConfigError> {
        self.update_configuration(name, |config| config.enabled = enabled)
            .await
    }

    // --- Environment sync ---

    /// Sync configurations from the process environment.
    pub async fn sync_with_environment(&self) -> Result<SyncReport, ConfigError> {
        self.sync_from(|var| std::env::var(var).ok()).await
    }

    /// Sync configurations from `lookup`, a variable-name to value function.
    ///
    /// Each vendor's key variable (or `OLLAMA_BASE_URL`) that is set creates
    /// the configuration with defaults or updates the stored key/URL. If
    /// `SELECTED_LLM_PROVIDER` names a configured, enabled provider it
    /// becomes the active selection.
    pub async fn sync_from<L>(&self, lookup: L) -> Result<SyncReport, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut report = SyncReport::default();

        {
            let mut state = self.state.lock().await;
            let mut next = state.configurations.clone();
            for kind in ProviderKind::ALL {
                let Some(value) = read(kind.api_key_env_var()) else {
                    continue;
                };
                let name = kind.to_string();
                match next.get_mut(&name) {
                    Some(existing) => {
                        let changed = if kind.requires_api_key() {
                            replace_if_changed(&mut existing.api_key, value)
                        } else {
                            replace_if_changed(&mut existing.base_url, value)
                        };
                        if changed {
                            existing.touch();
                            report.updated.push(name);
                        }
                    }
                    None => {
                        let config = self.default_configuration(kind);
                        let config = if kind.requires_api_key() {
                            config.with_api_key(value)
                        } else {
                            config.with_base_url(value)
                        };
                        next.insert(name.clone(), config);
                        report.created.push(name);
                    }
                }
            }
            if !report.created.is_empty() || !report.updated.is_empty() {
                self.commit_configurations(&mut state, next).await?;
            }
        }

        if let Some(provider) = read(SELECTED_PROVIDER_VAR) {
            let model = read(SELECTED_MODEL_VAR);
            match self.set_active_provider(&provider, model).await {
                Ok(active) => report.active = Some(active),
                Err(err @ (ConfigError::NotConfigured(_) | ConfigError::Disabled(_))) => {
                    tracing::warn!(provider = %provider, error = %err, "Ignoring selected provider");
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            "Synced provider configuration from environment"
        );
        Ok(report)
    }

    fn default_configuration(&self, kind: ProviderKind) -> ProviderConfiguration {
        let mut config = ProviderConfiguration::new(kind);
        match TimeoutSecs::new(self.defaults.default_timeout_secs) {
            Ok(timeout) => config.timeout = timeout,
            Err(err) => tracing::warn!(error = %err, "Ignoring configured default timeout"),
        }
        match MaxRetries::new(self.defaults.default_max_retries) {
            Ok(retries) => config.max_retries = retries,
            Err(err) => tracing::warn!(error = %err, "Ignoring configured default max_retries"),
        }
        config
    }

    // --- Active selection ---

    /// Record `name` (and optionally a model) as the provider to prefer.
    pub async fn set_active_provider(
        &self,
        name: &str,
        model: Option<String>,
    ) -> Result<ActiveSelection, ConfigError> {
        let mut state = self.state.lock().await;
        let config = state
            .configurations
            .get(name)
            .ok_or_else(|| ConfigError::NotConfigured(name.to_string()))?;
        if !config.enabled {
            return Err(ConfigError::Disabled(name.to_string()));
        }
        let active = ActiveSelection {
            provider: name.to_string(),
            model,
            selected_at: Utc::now(),
        };
        self.store.save_active(Some(&active)).await?;
        state.active = Some(active.clone());
        tracing::info!(provider = %name, model = ?active.model, "Set active provider");
        Ok(active)
    }

    pub async fn active_provider(&self) -> Option<ActiveSelection> {
        self.state.lock().await.active.clone()
    }

    // --- Validation ---

    /// Rule violations for one configuration; empty means valid.
    pub async fn validate_configuration(&self, name: &str) -> Result<Vec<String>, ConfigError> {
        let state = self.state.lock().await;
        let config = state
            .configurations
            .get(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))?;
        Ok(validate(config))
    }

    /// Violations for every configuration, keyed by name.
    pub async fn validate_all_configurations(&self) -> BTreeMap<String, Vec<String>> {
        let state = self.state.lock().await;
        state
            .configurations
            .iter()
            .map(|(name, config)| (name.clone(), validate(config)))
            .collect()
    }

    // --- Health ---

    /// Probe one provider and persist the updated health record.
    ///
    /// Disabled providers and providers missing a required API key are
    /// recorded as unavailable without a network call. The outcome is folded
    /// into the record current at commit time, so overlapping checks each
    /// count. A provider deleted while its probe ran gets no record.
    pub async fn check_provider_health(&self, name: &str) -> Result<ProviderHealth, ConfigError> {
        let config = self
            .get_configuration(name)
            .await
            .ok_or_else(|| ConfigError::NotConfigured(name.to_string()))?;

        let check = if !config.enabled {
            CheckResult::Disabled
        } else if config.provider.requires_api_key() && !config.has_api_key() {
            CheckResult::Failed("API key not configured".to_string())
        } else {
            match self.factory.create(&config) {
                Ok(provider) => {
                    let outcome = HealthMonitor::probe(&provider, config.timeout.as_duration()).await;
                    CheckResult::Probed(outcome)
                }
                Err(err) => CheckResult::Failed(err.to_string()),
            }
        };

        let mut state = self.state.lock().await;
        if !state.configurations.contains_key(name) {
            tracing::debug!(provider = %name, "Provider removed during health check");
            return Err(ConfigError::NotConfigured(name.to_string()));
        }
        let mut record = state
            .health
            .get(name)
            .cloned()
            .unwrap_or_else(|| ProviderHealth::new(name));
        check.apply(&mut record);

        let mut health = state.health.clone();
        health.insert(name.to_string(), record.clone());
        self.commit_health(&mut state, health).await?;
        drop(state);

        match record.error_message.as_deref() {
            None => tracing::info!(provider = %name, "Provider healthy"),
            Some(error) => tracing::warn!(
                provider = %name,
                error = %error,
                consecutive_failures = record.consecutive_failures,
                "Provider unavailable"
            ),
        }
        Ok(record)
    }

    /// Probe every configured provider in priority order.
    pub async fn check_all_providers_health(&self) -> Result<HealthMap, ConfigError> {
        let mut results = HealthMap::new();
        for config in self.list_configurations().await {
            let name = config.name();
            match self.check_provider_health(&name).await {
                Ok(record) => {
                    results.insert(name, record);
                }
                Err(ConfigError::NotConfigured(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }

    /// Names of providers whose last check was healthy.
    pub async fn get_healthy_providers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .health
            .values()
            .filter(|h| h.is_healthy())
            .map(|h| h.provider.clone())
            .collect()
    }

    pub async fn get_health(&self, name: &str) -> Option<ProviderHealth> {
        self.state.lock().await.health.get(name).cloned()
    }

    pub async fn health_records(&self) -> HealthMap {
        self.state.lock().await.health.clone()
    }

    // --- Orchestration ---

    /// Orchestrator over the enabled configurations (not yet initialized),
    /// with providers last recorded as unavailable tried last.
    pub async fn build_orchestrator(&self) -> MultiProviderOrchestrator {
        let state = self.state.lock().await;
        let configs = sorted(state.configurations.values());
        build_orchestrator(&configs, &state.health, &self.factory)
    }

    // --- Backups ---

    /// Snapshot configurations and health records into a new backup.
    pub async fn create_backup(&self, label: Option<&str>) -> Result<BackupInfo, ConfigError> {
        let state = self.state.lock().await;
        let snapshot = BackupSnapshot {
            timestamp: Utc::now(),
            label: label.map(str::to_string),
            configurations: state.configurations.clone(),
            health_status: state.health.clone(),
        };
        let info = self.store.write_backup(&snapshot).await?;
        tracing::info!(path = %info.path.display(), "Created configuration backup");
        Ok(info)
    }

    /// Replace configurations and health records with a backup's contents.
    ///
    /// Both documents are written before the in-memory state changes.
    pub async fn restore_backup(&self, path: &Path) -> Result<BackupSnapshot, ConfigError> {
        let snapshot = self.store.read_backup(path).await?;
        let mut state = self.state.lock().await;
        self.store.save_configurations(&snapshot.configurations).await?;
        self.store.save_health(&snapshot.health_status).await?;
        state.configurations = snapshot.configurations.clone();
        state.health = snapshot.health_status.clone();

        let stale = state
            .active
            .as_ref()
            .is_some_and(|a| !state.configurations.contains_key(&a.provider));
        if stale {
            self.store.save_active(None).await?;
            state.active = None;
        }
        tracing::info!(
            path = %path.display(),
            configurations = snapshot.configurations.len(),
            "Restored configuration backup"
        );
        Ok(snapshot)
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>, ConfigError> {
        self.store.list_backups().await
    }

    /// Delete backups older than `keep_days`. Returns how many were removed.
    pub async fn cleanup_old_backups(&self, keep_days: u32) -> Result<usize, ConfigError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(keep_days));
        let mut removed = 0;
        for backup in self.store.list_backups().await? {
            if backup.timestamp < cutoff {
                self.store.remove_backup(&backup.path).await?;
                tracing::debug!(path = %backup.path.display(), "Removed old backup");
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, keep_days, "Cleaned up old backups");
        }
        Ok(removed)
    }

    // --- Persistence helpers ---

    async fn commit_configurations(
        &self,
        state: &mut ServiceState,
        next: ConfigurationMap,
    ) -> Result<(), ConfigError> {
        self.store.save_configurations(&next).await?;
        state.configurations = next;
        Ok(())
    }

    async fn commit_health(
        &self,
        state: &mut ServiceState,
        next: HealthMap,
    ) -> Result<(), ConfigError> {
        self.store.save_health(&next).await?;
        state.health = next;
        Ok(())
    }
}

/// What a health check found, applied to the record under the state lock.
enum CheckResult {
    Disabled,
    Failed(String),
    Probed(ProbeOutcome),
}

impl CheckResult {
    fn apply(self, record: &mut ProviderHealth) {
        match self {
            CheckResult::Disabled => record.record_disabled(),
            CheckResult::Failed(message) => record.record_failure(message, None),
            CheckResult::Probed(outcome) => outcome.apply(record),
        }
    }
}

fn replace_if_changed(slot: &mut Option<String>, value: String) -> bool {
    if slot.as_deref() == Some(value.as_str()) {
        return false;
    }
    *slot = Some(value);
    true
}

fn sorted<'a>(configs: impl Iterator<Item = &'a ProviderConfiguration>) -> Vec<ProviderConfiguration> {
    let mut list: Vec<ProviderConfiguration> = configs.cloned().collect();
    list.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.name().cmp(&b.name()))
    });
    list
}

/// Rule violations for a single configuration.
pub fn validate(config: &ProviderConfiguration) -> Vec<String> {
    let mut violations = Vec::new();

    if config.provider.requires_api_key() && !config.has_api_key() {
        violations.push(format!(
            "API key is required for {} (set {})",
            config.provider,
            config.provider.api_key_env_var()
        ));
    }

    if let Some(base_url) = &config.base_url {
        match url::Url::parse(base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => violations.push(format!(
                "base URL must use http or https, got '{}'",
                parsed.scheme()
            )),
            Err(err) => violations.push(format!("invalid base URL '{base_url}': {err}")),
        }
    }

    if let Some(model) = &config.default_model {
        if !config.models.is_empty() && !config.models.contains(model) {
            violations.push(format!("default model '{model}' is not in the model list"));
        }
    }

    violations
}
