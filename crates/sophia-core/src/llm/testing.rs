//! Mock providers shared by the core test suites.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sophia_types::llm::{FinishReason, GenerationRequest, LlmError, ProviderSelfReport, Response};
use sophia_types::provider::{ProviderConfiguration, ProviderKind};

use super::box_provider::BoxLlmProvider;
use super::factory::ProviderFactory;
use super::provider::LlmProvider;
use super::state::ProviderState;

#[derive(Debug, Clone, Copy)]
pub enum MockError {
    Unavailable,
    Auth,
    RateLimited,
    Generic,
}

impl MockError {
    fn build(self, provider: &str) -> LlmError {
        match self {
            MockError::Unavailable => LlmError::unavailable(provider, "connection refused"),
            MockError::Auth => LlmError::authentication(provider, "invalid api key"),
            MockError::RateLimited => LlmError::RateLimited {
                provider: provider.to_string(),
                retry_after: Some(Duration::from_secs(2)),
            },
            MockError::Generic => LlmError::Provider {
                message: format!("{provider} returned malformed output"),
            },
        }
    }
}

pub struct MockProvider {
    state: ProviderState,
    init_error: Option<MockError>,
    reply_error: Option<MockError>,
    delay: Duration,
    init_delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn ok(name: &str) -> Self {
        Self {
            state: ProviderState::new(name, ProviderKind::Ollama),
            init_error: None,
            reply_error: None,
            delay: Duration::ZERO,
            init_delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str, error: MockError) -> Self {
        Self {
            reply_error: Some(error),
            ..Self::ok(name)
        }
    }

    pub fn unreachable(name: &str) -> Self {
        Self {
            init_error: Some(MockError::Unavailable),
            ..Self::ok(name)
        }
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.state = ProviderState::new(self.state.name().to_string(), kind);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Shared counter of `generate` calls, readable after the mock is boxed.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn boxed(self) -> BoxLlmProvider {
        BoxLlmProvider::new(self)
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn kind(&self) -> ProviderKind {
        self.state.kind()
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        match self.init_error {
            Some(error) => {
                let err = error.build(self.name());
                self.state.mark_failed(&err);
                Err(err)
            }
            None => {
                self.state.mark_initialized(vec!["mock-model".to_string()]);
                Ok(())
            }
        }
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    fn supported_models(&self) -> Vec<String> {
        self.state.models()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Response, LlmError> {
        request.validate()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = match self.reply_error {
            Some(error) => Err(error.build(self.name())),
            None => Ok(Response::new(
                format!("Hello from {}", self.name()),
                self.name(),
                request.model_for_provider(self.name()).unwrap_or("mock-model"),
            )
            .with_usage(Some(30))
            .with_finish_reason(Some(FinishReason::Stop))),
        };
        self.state.observe(&result);
        result
    }

    fn health_status(&self) -> ProviderSelfReport {
        self.state.report()
    }

    async fn cleanup(&self) {
        self.state.reset();
    }
}

/// Builds healthy mocks, except for names listed as unreachable.
#[derive(Debug, Default)]
pub struct MockFactory {
    unreachable: HashSet<String>,
    init_delay: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    /// Every built provider sleeps this long in `initialize`.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }
}

impl ProviderFactory for MockFactory {
    fn create(&self, config: &ProviderConfiguration) -> Result<BoxLlmProvider, LlmError> {
        let name = config.name();
        let mock = if self.unreachable.contains(&name) {
            MockProvider::unreachable(&name)
        } else {
            MockProvider::ok(&name)
        };
        Ok(mock
            .with_kind(config.provider)
            .with_init_delay(self.init_delay)
            .boxed())
    }
}
