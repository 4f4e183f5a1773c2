//! LlmProvider trait definition.
//!
//! This is the core abstraction that every vendor adapter implements.
//! Uses RPITIT for the async lifecycle methods; `BoxLlmProvider` provides
//! the object-safe wrapper the registry stores.

use std::future::Future;

use sophia_types::llm::{GenerationRequest, LlmError, ProviderSelfReport, Response};
use sophia_types::provider::ProviderKind;

/// Trait for LLM provider backends (Ollama, OpenAI, Anthropic, ...).
///
/// Lifecycle: `initialize` authenticates and discovers models, `generate`
/// performs one chat completion, `cleanup` releases state so the provider
/// reports uninitialized again. All methods take `&self`; adapters keep
/// their mutable state in [`ProviderState`](super::state::ProviderState).
///
/// Implementations live in sophia-infra (e.g., `OllamaProvider`).
pub trait LlmProvider: Send + Sync {
    /// Registered provider name (e.g., "ollama", "openai").
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Authenticate and probe the vendor's model list.
    ///
    /// Fails with `Authentication` for missing or rejected credentials and
    /// `Unavailable` when the vendor cannot be reached.
    fn initialize(&self) -> impl Future<Output = Result<(), LlmError>> + Send;

    /// True only after a successful `initialize` and while not marked unhealthy.
    fn is_available(&self) -> bool;

    /// Models discovered during `initialize` (empty before it).
    fn supported_models(&self) -> Vec<String>;

    /// Send one chat completion and return the normalized response.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<Response, LlmError>> + Send;

    fn health_status(&self) -> ProviderSelfReport;

    /// Reset to the uninitialized state.
    fn cleanup(&self) -> impl Future<Output = ()> + Send;
}
