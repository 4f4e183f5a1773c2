//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with the
//! `x-api-key` and `anthropic-version` headers. Supports both non-streaming
//! and SSE streaming modes; streamed events are folded into one response.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use backoff::ExponentialBackoff;
use secrecy::ExposeSecret;

use sophia_core::llm::provider::LlmProvider;
use sophia_core::llm::state::ProviderState;
use sophia_types::llm::{GenerationRequest, LlmError, MessageRole, ProviderSelfReport, Response};
use sophia_types::provider::ProviderKind;

use super::streaming::anthropic_chunks;
use super::types::{
    AnthropicContentBlock, AnthropicMessage, AnthropicModelList, AnthropicNonStreamResponse,
    AnthropicRequest, map_stop_reason,
};
use crate::llm::http;
use crate::llm::retry::{backoff_for, with_retry};
use crate::llm::settings::{AdapterSettings, FALLBACK_MAX_TOKENS};
use crate::llm::streaming::ResponseParts;

/// Anthropic Claude LLM provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    settings: AdapterSettings,
    state: ProviderState,
    backoff: ExponentialBackoff,
}

impl AnthropicProvider {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(settings: AdapterSettings) -> Result<Self, LlmError> {
        let client = http::build_client(settings.timeout)?;
        let state = ProviderState::new(settings.name.clone(), ProviderKind::Anthropic);
        Ok(Self {
            client,
            backoff: backoff_for(ProviderKind::Anthropic),
            settings,
            state,
        })
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        http::join_url(&self.settings.base_url, path)
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, LlmError> {
        let key = self.settings.require_key()?;
        Ok(builder
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", Self::API_VERSION))
    }

    /// Convert a [`GenerationRequest`] into an [`AnthropicRequest`].
    ///
    /// System messages leave the conversation and become the top-level
    /// `system` field.
    fn to_anthropic_request(&self, request: &GenerationRequest, model: String) -> AnthropicRequest {
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        AnthropicRequest {
            model,
            max_tokens: self
                .settings
                .max_tokens_for(request)
                .unwrap_or(FALLBACK_MAX_TOKENS),
            messages,
            system: request.system_prompt(),
            stream: request.stream,
            temperature: request.temperature,
        }
    }

    async fn fetch_models(&self) -> Result<Vec<String>, LlmError> {
        let name = &self.settings.name;
        let builder = self.authorized(self.client.get(self.url("/v1/models")))?;
        let response = http::send(name, builder).await?;
        let list: AnthropicModelList = http::read_json(name, response).await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn message_once(&self, body: &AnthropicRequest) -> Result<ResponseParts, LlmError> {
        let name = &self.settings.name;
        let builder = self.authorized(self.client.post(self.url("/v1/messages")).json(body))?;
        let response = http::send(name, builder).await?;

        if body.stream {
            return ResponseParts::collect(name, anthropic_chunks(name.clone(), response)).await;
        }

        let message: AnthropicNonStreamResponse = http::read_json(name, response).await?;
        let content = message
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(ResponseParts {
            content,
            model: Some(message.model),
            id: Some(message.id),
            finish_reason: message.stop_reason.as_deref().map(map_stop_reason),
            prompt_tokens: message.usage.input_tokens,
            completion_tokens: message.usage.output_tokens,
            block_reason: None,
            ..Default::default()
        })
    }
}

// AnthropicProvider does NOT derive Debug; it holds the API key.

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        match self.fetch_models().await {
            Ok(models) => {
                tracing::debug!(provider = %self.settings.name, models = models.len(), "Initialized");
                self.state.mark_initialized(models);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(provider = %self.settings.name, error = %err, "Initialization failed");
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
        let body = self.to_anthropic_request(request, model.clone());

        let result = with_retry(
            &self.settings.name,
            self.settings.max_retries,
            self.backoff.clone(),
            || self.message_once(&body),
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
