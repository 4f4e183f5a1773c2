//! Multi-provider orchestrator.
//!
//! Routes a generation request across registered providers. Failover is
//! sequential: candidates are tried one at a time in order, unavailable ones
//! are skipped without a call, and any provider error moves on to the next
//! candidate. Consensus fans the same request out to several distinct
//! providers concurrently and succeeds only if every one of them does.

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::Instrument;

use sophia_types::llm::{
    GenerationRequest, LlmError, OrchestratorHealth, ProviderFailure, Response,
};

use super::box_provider::BoxLlmProvider;
use super::registry::{ProviderRegistry, RegisteredProvider};

/// Routes requests over an instance-owned [`ProviderRegistry`].
#[derive(Debug, Default)]
pub struct MultiProviderOrchestrator {
    registry: ProviderRegistry,
    initialized: bool,
}

impl MultiProviderOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registry(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            initialized: false,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: BoxLlmProvider) {
        self.registry.register(name, provider);
    }

    pub fn register_with_timeout(
        &mut self,
        name: impl Into<String>,
        provider: BoxLlmProvider,
        timeout: Duration,
    ) {
        self.registry.register_with_timeout(name, provider, timeout);
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Initialize every registered provider.
    ///
    /// A provider that fails to initialize is logged and stays unavailable;
    /// it never aborts the others. Returns one result per provider in
    /// registration order.
    pub async fn initialize(&mut self) -> Vec<(String, Result<(), LlmError>)> {
        let mut summary = Vec::with_capacity(self.registry.len());
        for entry in self.registry.entries() {
            let result = match tokio::time::timeout(entry.timeout, entry.provider.initialize()).await
            {
                Ok(result) => result,
                Err(_) => Err(timeout_error(entry)),
            };
            match &result {
                Ok(()) => tracing::info!(
                    provider = %entry.name,
                    models = entry.provider.supported_models().len(),
                    "Provider initialized"
                ),
                Err(err) => tracing::warn!(
                    provider = %entry.name,
                    error = %err,
                    "Provider failed to initialize, leaving it unavailable"
                ),
            }
            summary.push((entry.name.clone(), result));
        }
        self.initialized = true;
        summary
    }

    /// Candidate order: `preferred` first if registered, then registration order.
    fn candidates(&self, preferred: Option<&str>) -> Vec<&RegisteredProvider> {
        let mut candidates: Vec<&RegisteredProvider> = self.registry.entries().collect();
        if let Some(preferred) = preferred {
            match candidates.iter().position(|e| e.name == preferred) {
                Some(index) => {
                    let entry = candidates.remove(index);
                    candidates.insert(0, entry);
                }
                None => {
                    tracing::debug!(provider = %preferred, "Preferred provider not registered, using default order");
                }
            }
        }
        candidates
    }

    /// Generate one response with sequential failover.
    ///
    /// Fails with `NoProviders` when nothing is registered and with
    /// `AllFailed` (one entry per provider actually called) when every
    /// available candidate failed or none was available.
    pub async fn generate_response(
        &self,
        request: &GenerationRequest,
        preferred_provider: Option<&str>,
    ) -> Result<Response, LlmError> {
        if self.registry.is_empty() {
            return Err(LlmError::NoProviders);
        }
        request.validate()?;

        let span = tracing::info_span!(
            "gen_ai.generate",
            gen_ai.operation.name = "chat",
            gen_ai.request.model = ?request.model,
            gen_ai.request.max_tokens = ?request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = request.stream,
            gen_ai.provider.name = tracing::field::Empty,
        );

        async {
            let mut failures = Vec::new();
            for entry in self.candidates(preferred_provider) {
                if !entry.provider.is_available() {
                    tracing::debug!(provider = %entry.name, "Provider unavailable, skipping");
                    continue;
                }

                let start = Instant::now();
                match call_with_timeout(entry, request).await {
                    Ok(response) => {
                        tracing::Span::current().record("gen_ai.provider.name", entry.name.as_str());
                        if !failures.is_empty() {
                            tracing::info!(
                                provider = %entry.name,
                                failed = failures.len(),
                                "Failover succeeded"
                            );
                        }
                        let latency_ms = start.elapsed().as_millis() as u64;
                        return Ok(response.with_metadata("latency_ms", latency_ms));
                    }
                    Err(err) => {
                        tracing::warn!(
                            provider = %entry.name,
                            error = %err,
                            "Provider failed, trying next candidate"
                        );
                        failures.push(ProviderFailure {
                            provider: entry.name.clone(),
                            error: err,
                        });
                    }
                }
            }

            tracing::error!(failed = failures.len(), "All providers failed to generate response");
            Err(LlmError::AllFailed { failures })
        }
        .instrument(span)
        .await
    }

    /// Ask `consensus_count` distinct available providers concurrently.
    ///
    /// Returns exactly `consensus_count` responses in call order, or
    /// `ConsensusFailed` naming every call that failed. Fewer available
    /// providers than requested fails before any call.
    pub async fn generate_with_consensus(
        &self,
        request: &GenerationRequest,
        consensus_count: usize,
    ) -> Result<Vec<Response>, LlmError> {
        if consensus_count == 0 {
            return Err(LlmError::Provider {
                message: "consensus count must be at least 1".to_string(),
            });
        }
        if self.registry.is_empty() {
            return Err(LlmError::NoProviders);
        }
        request.validate()?;

        let available: Vec<&RegisteredProvider> = self
            .registry
            .entries()
            .filter(|e| e.provider.is_available())
            .collect();
        if available.len() < consensus_count {
            return Err(LlmError::InsufficientProviders {
                available: available.len(),
                required: consensus_count,
            });
        }

        let selected = &available[..consensus_count];
        let span = tracing::info_span!(
            "gen_ai.consensus",
            gen_ai.operation.name = "chat",
            gen_ai.request.model = ?request.model,
            consensus_count,
        );

        let results = join_all(selected.iter().map(|entry| call_with_timeout(entry, request)))
            .instrument(span)
            .await;

        let mut responses = Vec::with_capacity(consensus_count);
        let mut failures = Vec::new();
        for (entry, result) in selected.iter().zip(results) {
            match result {
                Ok(response) => responses.push(response),
                Err(err) => {
                    tracing::warn!(provider = %entry.name, error = %err, "Consensus call failed");
                    failures.push(ProviderFailure {
                        provider: entry.name.clone(),
                        error: err,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(responses)
        } else {
            Err(LlmError::ConsensusFailed {
                required: consensus_count,
                failures,
            })
        }
    }

    /// Aggregate of every provider's self-report.
    pub fn health_status(&self) -> OrchestratorHealth {
        let providers: Vec<_> = self
            .registry
            .entries()
            .map(|e| e.provider.health_status())
            .collect();
        let providers_healthy = providers.iter().filter(|p| p.is_healthy()).count();
        OrchestratorHealth {
            status: if providers_healthy > 0 {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            providers_total: providers.len(),
            providers_healthy,
            providers,
        }
    }

    /// Clean up every provider and empty the registry.
    pub async fn cleanup(&mut self) {
        for entry in self.registry.entries() {
            entry.provider.cleanup().await;
            tracing::debug!(provider = %entry.name, "Provider cleaned up");
        }
        self.registry.clear();
        self.initialized = false;
    }
}

async fn call_with_timeout(
    entry: &RegisteredProvider,
    request: &GenerationRequest,
) -> Result<Response, LlmError> {
    match tokio::time::timeout(entry.timeout, entry.provider.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(entry)),
    }
}

fn timeout_error(entry: &RegisteredProvider) -> LlmError {
    LlmError::unavailable(
        entry.name.clone(),
        format!("timed out after {}s", entry.timeout.as_secs_f64()),
    )
}
