//! Provider registry for runtime provider lookup.
//!
//! An ordered, name-indexed registry of boxed LLM providers. Registration
//! order is the failover order, so entries live in a `Vec` rather than a map.

use std::time::Duration;

use sophia_types::llm::LlmError;

use super::box_provider::BoxLlmProvider;

/// Call timeout used when a provider is registered without one.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// One registered provider and its per-call timeout.
#[derive(Debug)]
pub struct RegisteredProvider {
    pub name: String,
    pub provider: BoxLlmProvider,
    pub timeout: Duration,
}

/// Registry of LLM providers, indexed by name, iterated in registration order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under the given name with the default timeout.
    ///
    /// If a provider with this name already exists, it is replaced in place.
    pub fn register(&mut self, name: impl Into<String>, provider: BoxLlmProvider) {
        self.register_with_timeout(name, provider, DEFAULT_PROVIDER_TIMEOUT);
    }

    pub fn register_with_timeout(
        &mut self,
        name: impl Into<String>,
        provider: BoxLlmProvider,
        timeout: Duration,
    ) {
        let name = name.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => {
                tracing::debug!(provider = %name, "Replacing registered provider");
                existing.provider = provider;
                existing.timeout = timeout;
            }
            None => {
                tracing::debug!(provider = %name, ?timeout, "Registering provider");
                self.entries.push(RegisteredProvider {
                    name,
                    provider,
                    timeout,
                });
            }
        }
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Result<&BoxLlmProvider, LlmError> {
        self.entry(name)
            .map(|e| &e.provider)
            .ok_or_else(|| LlmError::NotFound(name.to_string()))
    }

    pub fn entry(&self, name: &str) -> Option<&RegisteredProvider> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.entries.iter()
    }

    pub fn remove(&mut self, name: &str) -> Option<BoxLlmProvider> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index).provider)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockProvider;

    #[test]
    fn test_register_preserves_order() {
        let mut registry = ProviderRegistry::new();
        registry.register("ollama", BoxLlmProvider::new(MockProvider::ok("ollama")));
        registry.register("openai", BoxLlmProvider::new(MockProvider::ok("openai")));
        registry.register("gemini", BoxLlmProvider::new(MockProvider::ok("gemini")));
        assert_eq!(registry.names(), vec!["ollama", "openai", "gemini"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let mut registry = ProviderRegistry::new();
        registry.register("ollama", BoxLlmProvider::new(MockProvider::ok("ollama")));
        registry.register("openai", BoxLlmProvider::new(MockProvider::ok("openai")));
        registry.register_with_timeout(
            "ollama",
            BoxLlmProvider::new(MockProvider::ok("ollama")),
            Duration::from_secs(5),
        );
        assert_eq!(registry.names(), vec!["ollama", "openai"]);
        assert_eq!(
            registry.entry("ollama").unwrap().timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry.get("anthropic").unwrap_err();
        assert!(matches!(err, LlmError::NotFound(ref name) if name == "anthropic"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = ProviderRegistry::new();
        registry.register("ollama", BoxLlmProvider::new(MockProvider::ok("ollama")));
        registry.register("openai", BoxLlmProvider::new(MockProvider::ok("openai")));
        assert!(registry.remove("ollama").is_some());
        assert!(registry.remove("ollama").is_none());
        assert_eq!(registry.names(), vec!["openai"]);
        registry.clear();
        assert!(registry.is_empty());
    }
}
