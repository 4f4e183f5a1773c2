//! LLM request/response types for Sophia.
//!
//! These types model the provider-agnostic data shapes for chat completion:
//! conversation messages, generation requests, normalized responses, and the
//! error taxonomy shared by every vendor adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A request for one chat completion.
///
/// `model: None` means "the provider's configured default model".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    /// Model for every provider that has no entry in `model_overrides`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Per-provider model, keyed by provider name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_overrides: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            model_overrides: BTreeMap::new(),
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Use `model` only when `provider` serves the request.
    pub fn with_model_for(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.model_overrides.insert(provider.into(), model.into());
        self
    }

    /// The model requested from `provider`: its override, then the shared one.
    pub fn model_for_provider(&self, provider: &str) -> Option<&str> {
        self.model_overrides
            .get(provider)
            .or(self.model.as_ref())
            .map(String::as_str)
            .filter(|m| !m.trim().is_empty())
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Reject requests that can never be sent to a vendor.
    ///
    /// Role ordering is left to the caller; only emptiness is checked.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.messages.is_empty() {
            return Err(LlmError::Provider {
                message: "request contains no messages".to_string(),
            });
        }
        Ok(())
    }

    /// Concatenated content of all system messages, if any.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Why the provider stopped generating, normalized across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Safety,
    Error,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::Safety => write!(f, "safety"),
            FinishReason::Error => write!(f, "error"),
        }
    }
}

impl FromStr for FinishReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stop" => Ok(FinishReason::Stop),
            "length" => Ok(FinishReason::Length),
            "safety" => Ok(FinishReason::Safety),
            "error" => Ok(FinishReason::Error),
            other => Err(format!("invalid finish reason: '{other}'")),
        }
    }
}

/// A completed chat response from exactly one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    /// Registered name of the provider that produced this response.
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Response {
    pub fn new(
        content: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            provider: provider.into(),
            model: model.into(),
            usage_tokens: None,
            finish_reason: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_usage(mut self, usage_tokens: Option<u32>) -> Self {
        self.usage_tokens = usage_tokens;
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: Option<FinishReason>) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Coarse classification of an [`LlmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    RateLimit,
    Unavailable,
    Generic,
}

/// One provider's failure inside an aggregate error.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: LlmError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return " (no provider was available)".to_string();
    }
    let joined = failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    format!(" ({joined})")
}

/// Errors from LLM provider operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    #[error("rate limited by {provider} (retry after {retry_after:?})")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("provider {provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("response from {provider} blocked: {reason}")]
    ContentBlocked { provider: String, reason: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("provider '{0}' not found")]
    NotFound(String),

    #[error("no providers configured")]
    NoProviders,

    #[error("only {available} providers available, {required} required for consensus")]
    InsufficientProviders { available: usize, required: usize },

    #[error("all providers failed to generate response{}", format_failures(.failures))]
    AllFailed { failures: Vec<ProviderFailure> },

    #[error(
        "consensus failed: {} of {required} providers failed{}",
        .failures.len(),
        format_failures(.failures)
    )]
    ConsensusFailed {
        required: usize,
        failures: Vec<ProviderFailure>,
    },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Authentication { .. } => ErrorKind::Authentication,
            LlmError::RateLimited { .. } => ErrorKind::RateLimit,
            LlmError::Unavailable { .. } => ErrorKind::Unavailable,
            _ => ErrorKind::Generic,
        }
    }

    /// The vendor's retry hint, if this is a rate-limit error that carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether repeating the same call against the same provider may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Unavailable { .. })
    }

    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn authentication(provider: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Authentication {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// An adapter's self-reported status.
///
/// Independent of the persisted `ProviderHealth` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSelfReport {
    pub provider: String,
    pub kind: ProviderKind,
    pub initialized: bool,
    pub available: bool,
    pub models: Vec<String>,
    /// One of "healthy", "unhealthy", "uninitialized".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProviderSelfReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Aggregate health reported by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorHealth {
    /// "healthy" when at least one provider reports healthy.
    pub status: String,
    pub providers_total: usize,
    pub providers_healthy: usize,
    pub providers: Vec<ProviderSelfReport>,
}
