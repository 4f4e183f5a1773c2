//! Global configuration types for Sophia.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls
//! defaults for new provider configurations, health checks and backups.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the LLM access layer.
///
/// Loaded from `~/.sophia/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Timeout applied to providers created without an explicit one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Retry budget applied to providers created without an explicit one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Interval between checks in `provider watch`.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Backups older than this are removed by `backup cleanup`.
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,

    /// Number of providers asked when `ask --consensus` is given without a count.
    #[serde(default = "default_consensus")]
    pub consensus_default: usize,

    #[serde(default)]
    pub default_max_tokens: Option<u32>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_backup_retention_days() -> u32 {
    30
}

fn default_consensus() -> usize {
    2
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            health_check_interval_secs: default_health_check_interval_secs(),
            backup_retention_days: default_backup_retention_days(),
            consensus_default: default_consensus(),
            default_max_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.default_timeout_secs, 30);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.health_check_interval_secs, 60);
        assert_eq!(config.backup_retention_days, 30);
        assert_eq!(config.consensus_default, 2);
        assert!(config.default_max_tokens.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
default_timeout_secs = 90
health_check_interval_secs = 15
consensus_default = 3
default_max_tokens = 1024
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_timeout_secs, 90);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.health_check_interval_secs, 15);
        assert_eq!(config.consensus_default, 3);
        assert_eq!(config.default_max_tokens, Some(1024));
    }
}
