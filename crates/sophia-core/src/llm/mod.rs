//! LLM provider abstractions for Sophia.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for dynamic dispatch
//! - `ProviderRegistry` / `ProviderFactory`: lookup and construction
//! - `MultiProviderOrchestrator`: failover and consensus routing
//! - `HealthMonitor`: probes feeding persisted health records

pub mod box_provider;
pub mod factory;
pub mod health;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
