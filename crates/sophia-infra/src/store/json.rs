//! JSON file implementation of [`ConfigStore`].
//!
//! Layout under the root directory:
//!
//! ```text
//! providers.json
//! health.json
//! active.json
//! backups/backup_20250101_120000_000000[_label].json
//! ```
//!
//! Every write goes to a sibling `.tmp` file that is then renamed over the
//! target, so a reader sees either the old document or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use sophia_core::service::store::{ConfigStore, ConfigurationMap, HealthMap};
use sophia_types::error::ConfigError;
use sophia_types::provider::{ActiveSelection, BackupInfo, BackupSnapshot};

const PROVIDERS_FILE: &str = "providers.json";
const HEALTH_FILE: &str = "health.json";
const ACTIVE_FILE: &str = "active.json";
const BACKUP_DIR: &str = "backups";
const BACKUP_PREFIX: &str = "backup_";
const BACKUP_EXT: &str = ".json";
/// `YYYYmmdd_HHMMSS_ffffff`
const STAMP_LEN: usize = 22;

/// Stores each document as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    async fn read_document<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, ConfigError> {
        let path = self.root.join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                ConfigError::Serialization(format!("{}: {e}", path.display()))
            })?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_document<T: Serialize>(&self, file: &str, value: &T) -> Result<(), ConfigError> {
        write_atomic(&self.root.join(file), value).await.map(|_| ())
    }

    /// Accept a full path or a bare file name inside the backup directory.
    fn resolve_backup(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
            path.to_path_buf()
        } else {
            self.backup_dir().join(path)
        }
    }
}

/// Serialize `value` into `path` via a temp file and rename. Returns bytes written.
async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<u64, ConfigError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(bytes.len() as u64)
}

/// Replace anything that is not alphanumeric, `-` or `_` so labels are file-name safe.
fn sanitize_label(label: &str) -> Option<String> {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

pub fn backup_file_name(timestamp: DateTime<Utc>, label: Option<&str>) -> String {
    let stamp = timestamp.format("%Y%m%d_%H%M%S_%6f");
    match label.and_then(sanitize_label) {
        Some(label) => format!("{BACKUP_PREFIX}{stamp}_{label}{BACKUP_EXT}"),
        None => format!("{BACKUP_PREFIX}{stamp}{BACKUP_EXT}"),
    }
}

/// Timestamp and label from a backup file name; `None` if it does not match.
pub fn parse_backup_file_name(name: &str) -> Option<(DateTime<Utc>, Option<String>)> {
    let rest = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_EXT)?;
    let stamp = rest.get(..STAMP_LEN)?;
    let (seconds, micros) = stamp.rsplit_once('_')?;
    let naive = NaiveDateTime::parse_from_str(seconds, "%Y%m%d_%H%M%S").ok()?;
    if micros.len() != 6 {
        return None;
    }
    let micros: i64 = micros.parse().ok()?;
    let timestamp = naive.and_utc() + TimeDelta::microseconds(micros);

    let label = match &rest[STAMP_LEN..] {
        "" => None,
        tail => Some(tail.strip_prefix('_')?.to_string()),
    };
    Some((timestamp, label))
}

impl ConfigStore for JsonFileStore {
    async fn load_configurations(&self) -> Result<ConfigurationMap, ConfigError> {
        Ok(self.read_document(PROVIDERS_FILE).await?.unwrap_or_default())
    }

    async fn save_configurations(&self, configurations: &ConfigurationMap) -> Result<(), ConfigError> {
        self.write_document(PROVIDERS_FILE, configurations).await
    }

    async fn load_health(&self) -> Result<HealthMap, ConfigError> {
        Ok(self.read_document(HEALTH_FILE).await?.unwrap_or_default())
    }

    async fn save_health(&self, health: &HealthMap) -> Result<(), ConfigError> {
        self.write_document(HEALTH_FILE, health).await
    }

    async fn load_active(&self) -> Result<Option<ActiveSelection>, ConfigError> {
        self.read_document(ACTIVE_FILE).await
    }

    async fn save_active(&self, active: Option<&ActiveSelection>) -> Result<(), ConfigError> {
        match active {
            Some(active) => self.write_document(ACTIVE_FILE, active).await,
            None => match tokio::fs::remove_file(self.root.join(ACTIVE_FILE)).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    async fn write_backup(&self, snapshot: &BackupSnapshot) -> Result<BackupInfo, ConfigError> {
        let name = backup_file_name(snapshot.timestamp, snapshot.label.as_deref());
        let path = self.backup_dir().join(&name);
        let size_bytes = write_atomic(&path, snapshot).await?;
        tracing::info!(path = %path.display(), "Wrote configuration backup");
        Ok(BackupInfo {
            path,
            timestamp: snapshot.timestamp,
            label: snapshot.label.as_deref().and_then(sanitize_label),
            size_bytes,
        })
    }

    async fn read_backup(&self, path: &Path) -> Result<BackupSnapshot, ConfigError> {
        let path = self.resolve_backup(path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ConfigError::Serialization(format!("{}: {e}", path.display()))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ConfigError::BackupNotFound(path.display().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_backups(&self) -> Result<Vec<BackupInfo>, ConfigError> {
        let dir = self.backup_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some((timestamp, label)) = file_name.to_str().and_then(parse_backup_file_name)
            else {
                continue;
            };
            let size_bytes = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                path: entry.path(),
                timestamp,
                label,
                size_bytes,
            });
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    async fn remove_backup(&self, path: &Path) -> Result<(), ConfigError> {
        let path = self.resolve_backup(path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ConfigError::BackupNotFound(path.display().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sophia_core::service::provider_config::ProviderConfigService;
    use sophia_types::provider::{ProviderConfiguration, ProviderHealth, ProviderKind};
    use tempfile::TempDir;

    use crate::llm::HttpProviderFactory;

    fn snapshot(timestamp: DateTime<Utc>, label: Option<&str>) -> BackupSnapshot {
        let mut configurations = ConfigurationMap::new();
        configurations.insert(
            "ollama".to_string(),
            ProviderConfiguration::new(ProviderKind::Ollama),
        );
        let mut health_status = HealthMap::new();
        health_status.insert("ollama".to_string(), ProviderHealth::new("ollama"));
        BackupSnapshot {
            timestamp,
            label: label.map(str::to_string),
            configurations,
            health_status,
        }
    }

    #[tokio::test]
    async fn test_missing_documents_load_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        assert!(store.load_configurations().await.unwrap().is_empty());
        assert!(store.load_health().await.unwrap().is_empty());
        assert!(store.load_active().await.unwrap().is_none());
        assert!(store.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configurations_persist_across_instances() {
        let tmp = TempDir::new().unwrap();
        let mut configurations = ConfigurationMap::new();
        configurations.insert(
            "anthropic".to_string(),
            ProviderConfiguration::new(ProviderKind::Anthropic)
                .with_api_key("sk-ant")
                .with_priority(3),
        );
        JsonFileStore::new(tmp.path())
            .save_configurations(&configurations)
            .await
            .unwrap();

        assert!(tmp.path().join(PROVIDERS_FILE).exists());
        assert!(!tmp.path().join("providers.json.tmp").exists());

        let loaded = JsonFileStore::new(tmp.path())
            .load_configurations()
            .await
            .unwrap();
        assert_eq!(loaded, configurations);
    }

    #[tokio::test]
    async fn test_malformed_document_is_serialization_error() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(HEALTH_FILE), "{not json")
            .await
            .unwrap();
        let err = JsonFileStore::new(tmp.path()).load_health().await.unwrap_err();
        assert!(matches!(err, ConfigError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_active_selection_save_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let active = ActiveSelection {
            provider: "gemini".to_string(),
            model: Some("gemini-1.5-pro".to_string()),
            selected_at: Utc::now(),
        };
        store.save_active(Some(&active)).await.unwrap();
        assert_eq!(store.load_active().await.unwrap(), Some(active));

        store.save_active(None).await.unwrap();
        assert!(store.load_active().await.unwrap().is_none());
        // Clearing twice is fine.
        store.save_active(None).await.unwrap();
    }

    #[test]
    fn test_backup_file_name_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap()
            + TimeDelta::microseconds(535_897);
        let name = backup_file_name(ts, Some("before upgrade!"));
        assert_eq!(name, "backup_20250314_150926_535897_before-upgrade-.json");
        let (parsed, label) = parse_backup_file_name(&name).unwrap();
        assert_eq!(parsed, ts);
        assert_eq!(label.as_deref(), Some("before-upgrade-"));

        let plain = backup_file_name(ts, None);
        assert_eq!(parse_backup_file_name(&plain), Some((ts, None)));
    }

    #[test]
    fn test_non_matching_names_are_rejected() {
        assert!(parse_backup_file_name("notes.txt").is_none());
        assert!(parse_backup_file_name("backup_2025.json").is_none());
        assert!(parse_backup_file_name("backup_20250314_150926_535897x.json").is_none());
        assert!(parse_backup_file_name("backup_20251399_150926_535897.json").is_none());
    }

    #[tokio::test]
    async fn test_backups_listed_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();

        store.write_backup(&snapshot(older, None)).await.unwrap();
        let written = store
            .write_backup(&snapshot(newer, Some("nightly")))
            .await
            .unwrap();
        tokio::fs::write(store.backup_dir().join("README.txt"), "ignore me")
            .await
            .unwrap();

        let backups = store.list_backups().await.unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].timestamp, newer);
        assert_eq!(backups[0].label.as_deref(), Some("nightly"));
        assert_eq!(backups[0].path, written.path);
        assert!(backups[0].size_bytes > 0);
        assert_eq!(backups[1].timestamp, older);
    }

    #[tokio::test]
    async fn test_read_backup_by_name_and_path() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let original = snapshot(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(), None);
        let info = store.write_backup(&original).await.unwrap();

        assert_eq!(store.read_backup(&info.path).await.unwrap(), original);
        let bare = PathBuf::from(info.path.file_name().unwrap());
        assert_eq!(store.read_backup(&bare).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_missing_backup_errors() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let missing = Path::new("backup_20250101_000000_000000.json");
        assert!(matches!(
            store.read_backup(missing).await,
            Err(ConfigError::BackupNotFound(_))
        ));
        assert!(matches!(
            store.remove_backup(missing).await,
            Err(ConfigError::BackupNotFound(_))
        ));
    }

    fn service_at(root: &Path) -> ProviderConfigService<JsonFileStore, HttpProviderFactory> {
        ProviderConfigService::new(JsonFileStore::new(root), HttpProviderFactory::new())
    }

    #[tokio::test]
    async fn test_backup_restores_into_fresh_service_on_disk() {
        let source_dir = TempDir::new().unwrap();
        let source = service_at(source_dir.path());
        source
            .create_configuration(
                ProviderConfiguration::new(ProviderKind::Ollama)
                    .with_priority(1)
                    .with_enabled(false),
            )
            .await
            .unwrap();
        source
            .create_configuration(ProviderConfiguration::new(ProviderKind::OpenAi).with_tag("primary"))
            .await
            .unwrap();
        // Disabled and key-less providers are recorded without a network call.
        source.check_all_providers_health().await.unwrap();
        let info = source.create_backup(Some("nightly")).await.unwrap();

        let target_dir = TempDir::new().unwrap();
        let target = service_at(target_dir.path());
        target.restore_backup(&info.path).await.unwrap();

        let expected_configs = source.store().load_configurations().await.unwrap();
        let expected_health = source.health_records().await;
        assert_eq!(expected_health.len(), 2);
        assert_eq!(target.store().load_configurations().await.unwrap(), expected_configs);
        assert_eq!(target.health_records().await, expected_health);

        let reopened = service_at(target_dir.path());
        reopened.load().await.unwrap();
        let reloaded: ConfigurationMap = reopened
            .list_configurations()
            .await
            .into_iter()
            .map(|c| (c.name(), c))
            .collect();
        assert_eq!(reloaded, expected_configs);
        assert_eq!(reopened.health_records().await, expected_health);
    }
}
