//! Configuration store trait definition.
//!
//! The configuration service persists three documents (provider
//! configurations, health records, the active selection) plus timestamped
//! backup snapshots. sophia-infra implements this over JSON files;
//! `InMemoryStore` backs the service in tests and ephemeral setups.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sophia_types::error::ConfigError;
use sophia_types::provider::{
    ActiveSelection, BackupInfo, BackupSnapshot, ProviderConfiguration, ProviderHealth,
};

pub type ConfigurationMap = BTreeMap<String, ProviderConfiguration>;
pub type HealthMap = BTreeMap<String, ProviderHealth>;

/// Persistence port for the provider configuration service.
///
/// Every save replaces the whole document; readers never observe a
/// partially written one.
pub trait ConfigStore: Send + Sync {
    /// Missing documents load as empty maps.
    fn load_configurations(
        &self,
    ) -> impl Future<Output = Result<ConfigurationMap, ConfigError>> + Send;

    fn save_configurations(
        &self,
        configurations: &ConfigurationMap,
    ) -> impl Future<Output = Result<(), ConfigError>> + Send;

    fn load_health(&self) -> impl Future<Output = Result<HealthMap, ConfigError>> + Send;

    fn save_health(
        &self,
        health: &HealthMap,
    ) -> impl Future<Output = Result<(), ConfigError>> + Send;

    fn load_active(
        &self,
    ) -> impl Future<Output = Result<Option<ActiveSelection>, ConfigError>> + Send;

    /// `None` clears the stored selection.
    fn save_active(
        &self,
        active: Option<&ActiveSelection>,
    ) -> impl Future<Output = Result<(), ConfigError>> + Send;

    /// Persist a snapshot and return where it was written.
    fn write_backup(
        &self,
        snapshot: &BackupSnapshot,
    ) -> impl Future<Output = Result<BackupInfo, ConfigError>> + Send;

    fn read_backup(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<BackupSnapshot, ConfigError>> + Send;

    /// Known backups, newest first.
    fn list_backups(&self) -> impl Future<Output = Result<Vec<BackupInfo>, ConfigError>> + Send;

    fn remove_backup(&self, path: &Path) -> impl Future<Output = Result<(), ConfigError>> + Send;
}

#[derive(Debug, Default)]
struct Documents {
    configurations: ConfigurationMap,
    health: HealthMap,
    active: Option<ActiveSelection>,
    backups: Vec<(BackupInfo, BackupSnapshot)>,
}

/// Store that keeps every document in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: Mutex<Documents>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> std::sync::MutexGuard<'_, Documents> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConfigStore for InMemoryStore {
    async fn load_configurations(&self) -> Result<ConfigurationMap, ConfigError> {
        Ok(self.docs().configurations.clone())
    }

    async fn save_configurations(
        &self,
        configurations: &ConfigurationMap,
    ) -> Result<(), ConfigError> {
        self.docs().configurations = configurations.clone();
        Ok(())
    }

    async fn load_health(&self) -> Result<HealthMap, ConfigError> {
        Ok(self.docs().health.clone())
    }

    async fn save_health(&self, health: &HealthMap) -> Result<(), ConfigError> {
        self.docs().health = health.clone();
        Ok(())
    }

    async fn load_active(&self) -> Result<Option<ActiveSelection>, ConfigError> {
        Ok(self.docs().active.clone())
    }

    async fn save_active(&self, active: Option<&ActiveSelection>) -> Result<(), ConfigError> {
        self.docs().active = active.cloned();
        Ok(())
    }

    async fn write_backup(&self, snapshot: &BackupSnapshot) -> Result<BackupInfo, ConfigError> {
        let mut docs = self.docs();
        let info = BackupInfo {
            path: PathBuf::from(format!("memory://backup/{}", docs.backups.len())),
            timestamp: snapshot.timestamp,
            label: snapshot.label.clone(),
            size_bytes: 0,
        };
        docs.backups.push((info.clone(), snapshot.clone()));
        Ok(info)
    }

    async fn read_backup(&self, path: &Path) -> Result<BackupSnapshot, ConfigError> {
        self.docs()
            .backups
            .iter()
            .find(|(info, _)| info.path == path)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| ConfigError::BackupNotFound(path.display().to_string()))
    }

    async fn list_backups(&self) -> Result<Vec<BackupInfo>, ConfigError> {
        let mut infos: Vec<BackupInfo> =
            self.docs().backups.iter().map(|(info, _)| info.clone()).collect();
        infos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(infos)
    }

    async fn remove_backup(&self, path: &Path) -> Result<(), ConfigError> {
        let mut docs = self.docs();
        let before = docs.backups.len();
        docs.backups.retain(|(info, _)| info.path != path);
        if docs.backups.len() == before {
            return Err(ConfigError::BackupNotFound(path.display().to_string()));
        }
        Ok(())
    }
}
