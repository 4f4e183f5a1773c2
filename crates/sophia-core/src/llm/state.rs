//! Lifecycle state shared by every vendor adapter.
//!
//! Adapters hold a `ProviderState` and delegate `is_available`,
//! `supported_models`, `health_status` and the state half of `cleanup` to it,
//! so all vendors report their lifecycle the same way.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use sophia_types::llm::{LlmError, ProviderSelfReport};
use sophia_types::provider::ProviderKind;

#[derive(Debug, Default)]
struct Inner {
    models: Vec<String>,
    last_error: Option<String>,
}

/// Initialized/unhealthy flags plus the discovered model list.
#[derive(Debug)]
pub struct ProviderState {
    name: String,
    kind: ProviderKind,
    initialized: AtomicBool,
    unhealthy: AtomicBool,
    inner: RwLock<Inner>,
}

impl ProviderState {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            initialized: AtomicBool::new(false),
            unhealthy: AtomicBool::new(false),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Record a successful `initialize` with the discovered models.
    pub fn mark_initialized(&self, models: Vec<String>) {
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.models = models;
            inner.last_error = None;
        }
        self.unhealthy.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Record a failed `initialize`; the provider stays unavailable.
    pub fn mark_failed(&self, error: &LlmError) {
        self.initialized.store(false, Ordering::SeqCst);
        self.record_error(error);
    }

    /// Take the provider out of rotation until the next successful `initialize`.
    pub fn mark_unhealthy(&self, error: &LlmError) {
        self.unhealthy.store(true, Ordering::SeqCst);
        self.record_error(error);
    }

    /// Remember the latest error without changing availability.
    pub fn record_error(&self, error: &LlmError) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.last_error = Some(error.to_string());
    }

    /// Observe a generation result: authentication failures mark the provider unhealthy.
    pub fn observe<T>(&self, result: &Result<T, LlmError>) {
        if let Err(err) = result {
            if matches!(err, LlmError::Authentication { .. }) {
                tracing::warn!(provider = %self.name, error = %err, "Marking provider unhealthy");
                self.mark_unhealthy(err);
            } else {
                self.record_error(err);
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        self.is_initialized() && !self.unhealthy.load(Ordering::SeqCst)
    }

    pub fn models(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .models
            .clone()
    }

    /// Back to the uninitialized state with no models.
    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.unhealthy.store(false, Ordering::SeqCst);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.models.clear();
    }

    pub fn report(&self) -> ProviderSelfReport {
        let initialized = self.is_initialized();
        let available = self.is_available();
        let status = if !initialized {
            "uninitialized"
        } else if available {
            "healthy"
        } else {
            "unhealthy"
        };
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        ProviderSelfReport {
            provider: self.name.clone(),
            kind: self.kind,
            initialized,
            available,
            models: inner.models.clone(),
            status: status.to_string(),
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_uninitialized() {
        let state = ProviderState::new("ollama", ProviderKind::Ollama);
        assert!(!state.is_available());
        let report = state.report();
        assert_eq!(report.status, "uninitialized");
        assert!(report.models.is_empty());
    }

    #[test]
    fn test_initialize_then_cleanup() {
        let state = ProviderState::new("ollama", ProviderKind::Ollama);
        state.mark_initialized(vec!["llama3.2".to_string()]);
        assert!(state.is_available());
        assert_eq!(state.models(), vec!["llama3.2".to_string()]);
        assert!(state.report().is_healthy());

        state.reset();
        assert!(!state.is_available());
        assert!(state.models().is_empty());
        assert_eq!(state.report().status, "uninitialized");
    }

    #[test]
    fn test_auth_failure_marks_unhealthy() {
        let state = ProviderState::new("openai", ProviderKind::OpenAi);
        state.mark_initialized(vec![]);

        let result: Result<(), LlmError> = Err(LlmError::unavailable("openai", "timeout"));
        state.observe(&result);
        assert!(state.is_available());

        let result: Result<(), LlmError> = Err(LlmError::authentication("openai", "bad key"));
        state.observe(&result);
        assert!(!state.is_available());
        let report = state.report();
        assert_eq!(report.status, "unhealthy");
        assert!(report.last_error.unwrap().contains("bad key"));

        state.mark_initialized(vec![]);
        assert!(state.is_available());
    }
}
