//! `sophia ask`: one prompt through the orchestrator.
//!
//! Without `--consensus` the providers are tried in order (the preferred or
//! active one first) until one answers. With it, several providers answer the
//! same prompt concurrently and every answer is printed.

use anyhow::Result;
use clap::Args;
use console::style;
use tracing::Instrument;

use sophia_observe::genai_attrs::{generation_span, record_response, OP_CHAT, OP_CONSENSUS};
use sophia_types::llm::{GenerationRequest, LlmError, Message, Response};
use sophia_types::provider::ActiveSelection;

use super::output::{print_json, spinner};
use crate::state::AppState;

#[derive(Args)]
pub struct AskArgs {
    /// The prompt; multiple words are joined with spaces.
    #[arg(required = true)]
    pub prompt: Vec<String>,

    /// Provider to try first (defaults to the active provider).
    #[arg(long)]
    pub prefer: Option<String>,

    /// Ask N providers at once (N defaults to `consensus_default`).
    #[arg(long, num_args = 0..=1, value_name = "N")]
    pub consensus: Option<Option<usize>>,

    /// Model for the preferred provider, or for every provider when none is preferred.
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Use the vendor's streaming transport.
    #[arg(long)]
    pub stream: bool,

    /// System prompt sent before the user message.
    #[arg(long)]
    pub system: Option<String>,
}

/// The request to send and the provider to prefer.
///
/// The active selection supplies the preferred provider when `--prefer` is
/// absent, and its model only when that provider ends up preferred. A model
/// chosen for the preferred provider is never sent to failover candidates.
pub fn plan_request(
    args: &AskArgs,
    active: Option<&ActiveSelection>,
    default_max_tokens: Option<u32>,
) -> (GenerationRequest, Option<String>) {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = args.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(args.prompt.join(" ")));

    let preferred = args
        .prefer
        .clone()
        .or_else(|| active.map(|a| a.provider.clone()));
    let model = args.model.clone().or_else(|| {
        active
            .filter(|a| preferred.as_deref() == Some(a.provider.as_str()))
            .and_then(|a| a.model.clone())
    });

    let mut request = GenerationRequest::new(messages).with_stream(args.stream);
    match (preferred.as_deref(), model) {
        (Some(provider), Some(model)) => request = request.with_model_for(provider, model),
        (None, model) => request.model = model,
        (Some(_), None) => {}
    }
    request.max_tokens = args.max_tokens.or(default_max_tokens);
    request.temperature = args.temperature;
    (request, preferred)
}

pub async fn ask(state: &AppState, args: AskArgs, json: bool, quiet: bool) -> Result<()> {
    let active = state.service.active_provider().await;
    let (request, preferred) = plan_request(&args, active.as_ref(), state.global.default_max_tokens);

    let mut orchestrator = state.service.build_orchestrator().await;
    if orchestrator.registry().is_empty() {
        return Err(LlmError::NoProviders.into());
    }

    let sp = spinner("Connecting to providers...", json || quiet);
    for (name, result) in orchestrator.initialize().await {
        if let Err(err) = result {
            tracing::warn!(provider = %name, error = %err, "Provider not available");
        }
    }

    let result = match args.consensus {
        Some(count) => {
            let count = count.unwrap_or(state.global.consensus_default);
            sp.set_message(format!("Asking {count} providers..."));
            let span = generation_span(OP_CONSENSUS, None, request.model.as_deref(), request.max_tokens);
            orchestrator
                .generate_with_consensus(&request, count)
                .instrument(span)
                .await
        }
        None => {
            sp.set_message("Generating...");
            let requested_model = preferred
                .as_deref()
                .map_or(request.model.as_deref(), |p| request.model_for_provider(p));
            let span = generation_span(OP_CHAT, preferred.as_deref(), requested_model, request.max_tokens);
            let outcome = orchestrator
                .generate_response(&request, preferred.as_deref())
                .instrument(span.clone())
                .await;
            if let Ok(response) = &outcome {
                record_response(
                    &span,
                    &response.provider,
                    &response.model,
                    metadata_u64(response, "prompt_tokens"),
                    metadata_u64(response, "completion_tokens"),
                );
            }
            outcome.map(|r| vec![r])
        }
    };
    sp.finish_and_clear();
    orchestrator.cleanup().await;

    let responses = result?;
    if json {
        return match (args.consensus.is_some(), responses.as_slice()) {
            (false, [single]) => print_json(single),
            _ => print_json(&responses),
        };
    }

    let many = responses.len() > 1;
    for response in &responses {
        if many {
            println!(
                "{}",
                style(format!("── {} ({}) ──", response.provider, response.model)).cyan()
            );
        }
        println!("{}", response.content.trim_end());
        if !quiet {
            println!("{}", style(footer(response)).dim());
        }
        if many {
            println!();
        }
    }
    Ok(())
}

fn metadata_u64(response: &Response, key: &str) -> Option<u64> {
    response.metadata.get(key).and_then(|v| v.as_u64())
}

/// One-line summary under each answer.
fn footer(response: &Response) -> String {
    let mut parts = vec![format!("{} · {}", response.provider, response.model)];
    if let Some(tokens) = response.usage_tokens {
        parts.push(format!("{tokens} tokens"));
    }
    if let Some(ms) = metadata_u64(response, "latency_ms") {
        parts.push(format!("{ms} ms"));
    }
    if let Some(reason) = response.finish_reason {
        parts.push(format!("finish: {reason}"));
    }
    parts.join(" · ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sophia_types::llm::{FinishReason, MessageRole};

    fn args(prompt: &str) -> AskArgs {
        AskArgs {
            prompt: prompt.split(' ').map(str::to_string).collect(),
            prefer: None,
            consensus: None,
            model: None,
            max_tokens: None,
            temperature: None,
            stream: false,
            system: None,
        }
    }

    fn active(provider: &str, model: Option<&str>) -> ActiveSelection {
        ActiveSelection {
            provider: provider.to_string(),
            model: model.map(str::to_string),
            selected_at: Utc::now(),
        }
    }

    #[test]
    fn test_prompt_words_joined_and_system_first() {
        let mut a = args("explain borrow checking");
        a.system = Some("Be brief.".to_string());
        let (request, preferred) = plan_request(&a, None, None);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.messages[1].content, "explain borrow checking");
        assert!(preferred.is_none());
        assert!(!request.stream);
    }

    #[test]
    fn test_active_selection_supplies_provider_and_model() {
        let selection = active("anthropic", Some("claude-3-5-haiku-latest"));
        let (request, preferred) = plan_request(&args("hi"), Some(&selection), Some(512));
        assert_eq!(preferred.as_deref(), Some("anthropic"));
        assert_eq!(
            request.model_for_provider("anthropic"),
            Some("claude-3-5-haiku-latest")
        );
        assert_eq!(request.max_tokens, Some(512));
    }

    #[test]
    fn test_active_model_is_not_sent_to_fallback_providers() {
        let selection = active("anthropic", Some("claude-3-5-haiku-latest"));
        let (request, _) = plan_request(&args("hi"), Some(&selection), None);
        assert!(request.model.is_none());
        assert_eq!(request.model_for_provider("openai"), None);
        assert_eq!(request.model_for_provider("ollama"), None);
    }

    #[test]
    fn test_model_flag_scopes_to_preferred_provider() {
        let mut a = args("hi");
        a.prefer = Some("openai".to_string());
        a.model = Some("gpt-4o".to_string());
        let (request, _) = plan_request(&a, None, None);
        assert_eq!(request.model_for_provider("openai"), Some("gpt-4o"));
        assert_eq!(request.model_for_provider("gemini"), None);

        let mut shared = args("hi");
        shared.model = Some("llama3.1".to_string());
        let (request, preferred) = plan_request(&shared, None, None);
        assert!(preferred.is_none());
        assert_eq!(request.model_for_provider("ollama"), Some("llama3.1"));
    }

    #[test]
    fn test_prefer_overrides_active_and_drops_its_model() {
        let selection = active("anthropic", Some("claude-3-5-haiku-latest"));
        let mut a = args("hi");
        a.prefer = Some("gemini".to_string());
        a.max_tokens = Some(64);
        let (request, preferred) = plan_request(&a, Some(&selection), Some(512));
        assert_eq!(preferred.as_deref(), Some("gemini"));
        assert!(request.model.is_none());
        assert!(request.model_overrides.is_empty());
        assert_eq!(request.max_tokens, Some(64));
    }

    #[test]
    fn test_footer_lists_usage_and_latency() {
        let response = Response::new("hello", "openai", "gpt-4o-mini")
            .with_usage(Some(42))
            .with_finish_reason(Some(FinishReason::Stop))
            .with_metadata("latency_ms", 120u64);
        assert_eq!(
            footer(&response),
            "openai · gpt-4o-mini · 42 tokens · 120 ms · finish: stop"
        );
    }
}
