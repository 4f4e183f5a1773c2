//! OllamaProvider -- [`LlmProvider`] for a local or remote Ollama server.
//!
//! Talks to `/api/chat` (NDJSON when streaming) and probes `/api/tags` for
//! the installed models. No API key is involved.

use backoff::ExponentialBackoff;
use futures_util::{Stream, StreamExt};

use sophia_core::llm::provider::LlmProvider;
use sophia_core::llm::state::ProviderState;
use sophia_types::llm::{GenerationRequest, LlmError, ProviderSelfReport, Response};
use sophia_types::provider::ProviderKind;

use super::types::{
    OllamaChatRequest, OllamaChatResponse, OllamaMessage, OllamaOptions, OllamaTagsResponse,
    map_done_reason,
};
use crate::llm::http::{self, transport_error};
use crate::llm::retry::{backoff_for, with_retry};
use crate::llm::settings::AdapterSettings;
use crate::llm::streaming::ResponseParts;

pub struct OllamaProvider {
    client: reqwest::Client,
    settings: AdapterSettings,
    state: ProviderState,
    backoff: ExponentialBackoff,
}

impl OllamaProvider {
    pub fn new(settings: AdapterSettings) -> Result<Self, LlmError> {
        let client = http::build_client(settings.timeout)?;
        let state = ProviderState::new(settings.name.clone(), ProviderKind::Ollama);
        Ok(Self {
            client,
            backoff: backoff_for(ProviderKind::Ollama),
            settings,
            state,
        })
    }

    /// Replace the retry schedule (tests use a near-zero one).
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        http::join_url(&self.settings.base_url, path)
    }

    fn to_ollama_request(&self, request: &GenerationRequest, model: String) -> OllamaChatRequest {
        let options = OllamaOptions {
            temperature: request.temperature,
            num_predict: self.settings.max_tokens_for(request),
        };
        let has_options = options.temperature.is_some() || options.num_predict.is_some();
        OllamaChatRequest {
            model,
            messages: request
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: request.stream,
            options: has_options.then_some(options),
        }
    }

    async fn fetch_models(&self) -> Result<Vec<String>, LlmError> {
        let name = &self.settings.name;
        let response = http::send(name, self.client.get(self.url("/api/tags"))).await?;
        let tags: OllamaTagsResponse = http::read_json(name, response).await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat_once(&self, body: &OllamaChatRequest) -> Result<ResponseParts, LlmError> {
        let name = &self.settings.name;
        let response =
            http::send(name, self.client.post(self.url("/api/chat")).json(body)).await?;

        let mut parts = ResponseParts::default();
        if body.stream {
            let mut lines = std::pin::pin!(ndjson_lines(name.clone(), response));
            while let Some(line) = lines.next().await {
                absorb(name, &mut parts, line?)?;
            }
            parts.ensure_finished(name)?;
        } else {
            let body: OllamaChatResponse = http::read_json(name, response).await?;
            absorb(name, &mut parts, body)?;
        }
        Ok(parts)
    }
}

/// Fold one Ollama response object into the accumulated parts.
fn absorb(
    provider: &str,
    parts: &mut ResponseParts,
    chunk: OllamaChatResponse,
) -> Result<(), LlmError> {
    if let Some(error) = chunk.error {
        return Err(LlmError::Provider {
            message: format!("{provider}: {error}"),
        });
    }
    if let Some(model) = chunk.model {
        parts.model = Some(model);
    }
    if let Some(message) = chunk.message {
        parts.content.push_str(&message.content);
    }
    if chunk.done {
        parts.finished = true;
        parts.finish_reason = chunk.done_reason.as_deref().and_then(map_done_reason);
        parts.prompt_tokens = chunk.prompt_eval_count.or(parts.prompt_tokens);
        parts.completion_tokens = chunk.eval_count.or(parts.completion_tokens);
    }
    Ok(())
}

/// Split a newline-delimited JSON body into response objects.
fn ndjson_lines(
    provider: String,
    response: reqwest::Response,
) -> impl Stream<Item = Result<OllamaChatResponse, LlmError>> + Send {
    async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| transport_error(&provider, e))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(parsed) = parse_line(&provider, &line)? {
                    yield parsed;
                }
            }
        }
        if let Some(parsed) = parse_line(&provider, &buffer)? {
            yield parsed;
        }
    }
}

fn parse_line(provider: &str, line: &[u8]) -> Result<Option<OllamaChatResponse>, LlmError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(line).map(Some).map_err(|e| {
        LlmError::Deserialization(format!("{provider}: malformed stream line: {e}"))
    })
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        match self.fetch_models().await {
            Ok(models) => {
                if !models.iter().any(|m| model_matches(m, &self.settings.default_model)) {
                    tracing::warn!(
                        provider = %self.settings.name,
                        model = %self.settings.default_model,
                        "Default model is not installed on the Ollama server"
                    );
                }
                tracing::debug!(provider = %self.settings.name, models = models.len(), "Initialized");
                self.state.mark_initialized(models);
                Ok(())
            }
            Err(err) => {
                self.state.mark_failed(&err);
                Err(err)
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
        let model = self.settings.model_for(request);
        let body = self.to_ollama_request(request, model.clone());

        let result = with_retry(
            &self.settings.name,
            self.settings.max_retries,
            self.backoff.clone(),
            || self.chat_once(&body),
        )
        .await
        .and_then(|(parts, attempts)| {
            parts
                .into_response(&self.settings.name, &model, request.stream)
                .map(|r| r.with_metadata("attempts", attempts))
        });
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

/// Ollama tags carry an implicit `:latest` suffix.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted || installed.strip_suffix(":latest") == Some(wanted)
}
