//! Provider health probing.
//!
//! A probe initializes a freshly built provider under a timeout, reads its
//! availability and cleans it up again. The outcome feeds the pure
//! transitions on [`ProviderHealth`]; `run_periodic` repeats the check for
//! every configured provider until cancelled.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use sophia_types::provider::ProviderHealth;

use super::box_provider::BoxLlmProvider;
use super::factory::ProviderFactory;
use crate::service::provider_config::ProviderConfigService;
use crate::service::store::ConfigStore;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub available: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Fold this outcome into a health record.
    pub fn apply(&self, record: &mut ProviderHealth) {
        if self.available {
            record.record_success(self.elapsed);
        } else {
            let message = self
                .error
                .clone()
                .unwrap_or_else(|| "provider reported unavailable".to_string());
            record.record_failure(message, Some(self.elapsed));
        }
    }
}

/// Health checks for LLM providers.
pub struct HealthMonitor;

impl HealthMonitor {
    /// Initialize `provider` under `timeout`, inspect availability, then clean up.
    pub async fn probe(provider: &BoxLlmProvider, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let result = tokio::time::timeout(timeout, provider.initialize()).await;
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(())) => ProbeOutcome {
                available: provider.is_available(),
                elapsed,
                error: None,
            },
            Ok(Err(err)) => ProbeOutcome {
                available: false,
                elapsed,
                error: Some(err.to_string()),
            },
            Err(_) => ProbeOutcome {
                available: false,
                elapsed,
                error: Some(format!("health check timed out after {}s", timeout.as_secs_f64())),
            },
        };

        provider.cleanup().await;
        tracing::debug!(
            provider = %provider.name(),
            available = outcome.available,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Probed provider"
        );
        outcome
    }

    /// Re-check every configured provider each `interval` until `cancel` fires.
    ///
    /// The first round runs immediately. A failing round is logged and the
    /// loop keeps going.
    pub async fn run_periodic<S, F>(
        service: &ProviderConfigService<S, F>,
        interval: Duration,
        cancel: CancellationToken,
    ) where
        S: ConfigStore,
        F: ProviderFactory,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Starting periodic health checks");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match service.check_all_providers_health().await {
                        Ok(results) => {
                            let healthy = results.values().filter(|h| h.is_healthy()).count();
                            tracing::info!(healthy, total = results.len(), "Health check round complete");
                        }
                        Err(err) => tracing::error!(error = %err, "Health check round failed"),
                    }
                }
            }
        }

        tracing::info!("Periodic health checks stopped");
    }
}
