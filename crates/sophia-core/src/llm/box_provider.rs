//! BoxLlmProvider -- object-safe dynamic dispatch wrapper for LlmProvider.
//!
//! 1. Define an object-safe `LlmProviderDyn` trait with boxed futures
//! 2. Blanket-impl `LlmProviderDyn` for all `T: LlmProvider`
//! 3. `BoxLlmProvider` wraps `Box<dyn LlmProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use sophia_types::llm::{GenerationRequest, LlmError, ProviderSelfReport, Response};
use sophia_types::provider::ProviderKind;

use super::provider::LlmProvider;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`LlmProvider`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn LlmProviderDyn`).
/// A blanket implementation is provided for all types implementing `LlmProvider`.
pub trait LlmProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn initialize_boxed(&self) -> BoxFuture<'_, Result<(), LlmError>>;

    fn is_available(&self) -> bool;

    fn supported_models(&self) -> Vec<String>;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Response, LlmError>>;

    fn health_status(&self) -> ProviderSelfReport;

    fn cleanup_boxed(&self) -> BoxFuture<'_, ()>;
}

/// Blanket implementation: any `LlmProvider` automatically implements `LlmProviderDyn`.
impl<T: LlmProvider> LlmProviderDyn for T {
    fn name(&self) -> &str {
        LlmProvider::name(self)
    }

    fn kind(&self) -> ProviderKind {
        LlmProvider::kind(self)
    }

    fn initialize_boxed(&self) -> BoxFuture<'_, Result<(), LlmError>> {
        Box::pin(self.initialize())
    }

    fn is_available(&self) -> bool {
        LlmProvider::is_available(self)
    }

    fn supported_models(&self) -> Vec<String> {
        LlmProvider::supported_models(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Response, LlmError>> {
        Box::pin(self.generate(request))
    }

    fn health_status(&self) -> ProviderSelfReport {
        LlmProvider::health_status(self)
    }

    fn cleanup_boxed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.cleanup())
    }
}

/// Type-erased LLM provider for runtime provider selection.
///
/// Since `LlmProvider` uses RPITIT, it cannot be used as a trait object directly.
/// `BoxLlmProvider` provides equivalent methods that delegate to the inner
/// `LlmProviderDyn` trait object.
pub struct BoxLlmProvider {
    inner: Box<dyn LlmProviderDyn + Send + Sync>,
}

impl BoxLlmProvider {
    /// Wrap a concrete `LlmProvider` in a type-erased box.
    pub fn new<T: LlmProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    pub async fn initialize(&self) -> Result<(), LlmError> {
        self.inner.initialize_boxed().await
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    pub fn supported_models(&self) -> Vec<String> {
        self.inner.supported_models()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<Response, LlmError> {
        self.inner.generate_boxed(request).await
    }

    pub fn health_status(&self) -> ProviderSelfReport {
        self.inner.health_status()
    }

    pub async fn cleanup(&self) {
        self.inner.cleanup_boxed().await
    }
}

impl std::fmt::Debug for BoxLlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxLlmProvider")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
