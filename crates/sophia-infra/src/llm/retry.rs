//! Bounded retry with exponential backoff for transient vendor failures.
//!
//! Only errors for which [`LlmError::is_transient`] holds are retried.
//! Authentication, rate-limit and request errors surface on the first
//! attempt so the orchestrator can fail over immediately.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use sophia_types::llm::LlmError;
use sophia_types::provider::ProviderKind;

/// Backoff schedule tuned to each vendor's published rate-limit behavior.
pub fn backoff_for(kind: ProviderKind) -> ExponentialBackoff {
    match kind {
        ProviderKind::OpenAi | ProviderKind::OpenRouter => openai_compat_backoff(),
        ProviderKind::Anthropic | ProviderKind::Gemini => hosted_backoff(),
        ProviderKind::Ollama => ollama_backoff(),
    }
}

fn openai_compat_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(1000))
        .with_max_interval(Duration::from_secs(60))
        .with_multiplier(2.0)
        .with_max_elapsed_time(Some(Duration::from_secs(300)))
        .build()
}

fn hosted_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(1000))
        .with_max_interval(Duration::from_secs(60))
        .with_multiplier(1.5)
        .with_max_elapsed_time(Some(Duration::from_secs(300)))
        .build()
}

fn ollama_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(30))
        .with_multiplier(1.5)
        .with_max_elapsed_time(Some(Duration::from_secs(180)))
        .build()
}

/// Run `op` until it succeeds, fails permanently, or `max_retries` extra
/// attempts are spent. Returns the value and the number of attempts made.
pub async fn with_retry<T, F, Fut>(
    provider: &str,
    max_retries: u32,
    mut backoff: ExponentialBackoff,
    mut op: F,
) -> Result<(T, u32), LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    backoff.reset();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => err,
        };

        if !err.is_transient() || attempt > max_retries {
            return Err(err);
        }
        let Some(delay) = backoff.next_backoff() else {
            return Err(err);
        };

        tracing::warn!(
            provider,
            attempt,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient provider error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
