//! Provider configuration and health records.
//!
//! `ProviderConfiguration` and `ProviderHealth` are the two persisted
//! documents owned by the configuration service. Numeric settings are
//! range-checked newtypes so an out-of-range value can never be constructed
//! or deserialized.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Known LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Ollama,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::OpenRouter,
    ];

    /// Local backends run without credentials.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "llama3.2",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::Gemini => "gemini-1.5-flash",
            ProviderKind::OpenRouter => "openai/gpt-4o-mini",
        }
    }

    /// Environment variable read by environment sync for this vendor.
    ///
    /// Ollama has no key; its base URL variable is used instead.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "OLLAMA_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "gemini" => Ok(ProviderKind::Gemini),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            other => Err(format!("unknown provider: '{other}'")),
        }
    }
}

/// Per-call timeout in seconds, always within 1..=300.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TimeoutSecs(u64);

impl TimeoutSecs {
    pub const MIN: u64 = 1;
    pub const MAX: u64 = 300;

    pub fn new(secs: u64) -> Result<Self, ConfigError> {
        if !(Self::MIN..=Self::MAX).contains(&secs) {
            return Err(ConfigError::OutOfRange {
                field: "timeout",
                value: secs as i64,
                min: Self::MIN as i64,
                max: Self::MAX as i64,
            });
        }
        Ok(Self(secs))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl Default for TimeoutSecs {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<u64> for TimeoutSecs {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TimeoutSecs> for u64 {
    fn from(value: TimeoutSecs) -> Self {
        value.0
    }
}

/// Adapter-level retry budget for transient failures, always within 0..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MaxRetries(u32);

impl MaxRetries {
    pub const MAX: u32 = 10;

    pub fn new(retries: u32) -> Result<Self, ConfigError> {
        if retries > Self::MAX {
            return Err(ConfigError::OutOfRange {
                field: "max_retries",
                value: retries as i64,
                min: 0,
                max: Self::MAX as i64,
            });
        }
        Ok(Self(retries))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for MaxRetries {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u32> for MaxRetries {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MaxRetries> for u32 {
    fn from(value: MaxRetries) -> Self {
        value.0
    }
}

/// Persisted settings for one provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout: TimeoutSecs,
    #[serde(default)]
    pub max_retries: MaxRetries,
    /// Lower is tried first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub models: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> i32 {
    10
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfiguration {
    /// A configuration with defaults for the given vendor.
    pub fn new(provider: ProviderKind) -> Self {
        let now = Utc::now();
        Self {
            provider,
            api_key: None,
            base_url: None,
            timeout: TimeoutSecs::default(),
            max_retries: MaxRetries::default(),
            priority: default_priority(),
            enabled: true,
            default_model: None,
            models: BTreeSet::new(),
            tags: BTreeSet::new(),
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name under which this configuration is stored and registered.
    pub fn name(&self) -> String {
        self.provider.to_string()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Result<Self, ConfigError> {
        self.timeout = TimeoutSecs::new(secs)?;
        Ok(self)
    }

    pub fn with_max_retries(mut self, retries: u32) -> Result<Self, ConfigError> {
        self.max_retries = MaxRetries::new(retries)?;
        Ok(self)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.models.insert(model.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Base URL to use, falling back to the vendor default.
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Model to use when a request does not name one.
    pub fn effective_model(&self) -> &str {
        self.default_model
            .as_deref()
            .or_else(|| self.models.iter().next().map(|s| s.as_str()))
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// API keys never appear in Debug output.
impl fmt::Debug for ProviderConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfiguration")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("default_model", &self.default_model)
            .field("models", &self.models)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Reachability as believed by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unconfigured,
    Unavailable,
    Healthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unconfigured => write!(f, "unconfigured"),
            HealthStatus::Unavailable => write!(f, "unavailable"),
            HealthStatus::Healthy => write!(f, "healthy"),
        }
    }
}

/// Message recorded for providers that are disabled in configuration.
pub const DISABLED_MESSAGE: &str = "provider is disabled";

/// Rolling health record for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    /// Probe duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub total_checks: u64,
    #[serde(default)]
    pub total_failures: u64,
}

impl ProviderHealth {
    /// A record for a provider that has never been probed.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: HealthStatus::Unconfigured,
            last_check: Utc::now(),
            response_time: None,
            consecutive_failures: 0,
            last_success: None,
            error_message: None,
            total_checks: 0,
            total_failures: 0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Successful probe: Healthy, failure streak reset.
    pub fn record_success(&mut self, elapsed: Duration) {
        let now = Utc::now();
        self.status = HealthStatus::Healthy;
        self.last_check = now;
        self.last_success = Some(now);
        self.response_time = Some(elapsed.as_secs_f64());
        self.consecutive_failures = 0;
        self.error_message = None;
        self.total_checks += 1;
    }

    /// Failed probe: Unavailable, failure streak extended.
    pub fn record_failure(&mut self, message: impl Into<String>, elapsed: Option<Duration>) {
        self.status = HealthStatus::Unavailable;
        self.last_check = Utc::now();
        self.response_time = elapsed.map(|d| d.as_secs_f64());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.error_message = Some(message.into());
        self.total_checks += 1;
        self.total_failures += 1;
    }

    /// Disabled in configuration: reported Unavailable without a probe.
    pub fn record_disabled(&mut self) {
        self.record_failure(DISABLED_MESSAGE, None);
    }
}

/// The provider (and optional model) downstream consumers should prefer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSelection {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub selected_at: DateTime<Utc>,
}

/// Full snapshot written to the backups directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub configurations: std::collections::BTreeMap<String, ProviderConfiguration>,
    pub health_status: std::collections::BTreeMap<String, ProviderHealth>,
}

/// A backup file found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub path: std::path::PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub size_bytes: u64,
}
