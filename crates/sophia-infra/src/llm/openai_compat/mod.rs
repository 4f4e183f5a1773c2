//! OpenAI-compatible LLM provider (OpenAI, OpenRouter).
//!
//! Implements [`LlmProvider`] for any service that speaks the OpenAI chat
//! completions protocol. Request and response bodies are the
//! [`async_openai`] chat types; transport goes through the shared reqwest
//! plumbing so status codes and `Retry-After` map onto the common error
//! taxonomy and retry stays under this crate's control.

pub mod config;
pub mod streaming;

use backoff::ExponentialBackoff;
use secrecy::ExposeSecret;
use serde::Deserialize;

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionStreamOptions,
    CreateChatCompletionRequest, CreateChatCompletionResponse,
};

use sophia_core::llm::provider::LlmProvider;
use sophia_core::llm::state::ProviderState;
use sophia_types::llm::{GenerationRequest, LlmError, MessageRole, ProviderSelfReport, Response};
use sophia_types::provider::ProviderKind;

use self::config::OpenAiCompatConfig;
use self::streaming::{map_finish_reason, openai_chunks};
use crate::llm::http;
use crate::llm::retry::{backoff_for, with_retry};
use crate::llm::settings::AdapterSettings;
use crate::llm::streaming::ResponseParts;

/// `GET /models` body.
#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Provider for OpenAI and OpenRouter.
///
/// The API key stays inside [`AdapterSettings`] as a `SecretString` and is
/// exposed only to set the bearer header.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    settings: AdapterSettings,
    compat: OpenAiCompatConfig,
    state: ProviderState,
    backoff: ExponentialBackoff,
}

impl OpenAiCompatibleProvider {
    pub fn new(settings: AdapterSettings, compat: OpenAiCompatConfig) -> Result<Self, LlmError> {
        let client = http::build_client(settings.timeout)?;
        let state = ProviderState::new(settings.name.clone(), settings.kind);
        Ok(Self {
            client,
            backoff: backoff_for(settings.kind),
            settings,
            compat,
            state,
        })
    }

    /// Create an OpenAI provider.
    pub fn openai(settings: AdapterSettings) -> Result<Self, LlmError> {
        Self::new(settings, config::openai_defaults())
    }

    /// Create an OpenRouter provider with attribution headers.
    pub fn openrouter(
        settings: AdapterSettings,
        compat: OpenAiCompatConfig,
    ) -> Result<Self, LlmError> {
        Self::new(settings, compat)
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        http::join_url(&self.settings.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, LlmError> {
        let key = self.settings.require_key()?;
        Ok(builder
            .bearer_auth(key.expose_secret())
            .headers(self.compat.extra_headers.clone()))
    }

    /// Build a [`CreateChatCompletionRequest`] from a [`GenerationRequest`].
    fn build_request(&self, request: &GenerationRequest, model: String) -> CreateChatCompletionRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| match msg.role {
                MessageRole::System => {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                        content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                        name: None,
                    })
                }
                MessageRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                        name: None,
                    })
                }
                MessageRole::Assistant => {
                    #[allow(deprecated)]
                    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                        content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                            msg.content.clone(),
                        )),
                        refusal: None,
                        name: None,
                        audio: None,
                        tool_calls: None,
                        function_call: None,
                    })
                }
            })
            .collect();

        let max_tokens = self.settings.max_tokens_for(request);
        let mut req = CreateChatCompletionRequest {
            model,
            messages,
            temperature: request.temperature,
            ..Default::default()
        };
        if self.compat.legacy_max_tokens {
            #[allow(deprecated)]
            {
                req.max_tokens = max_tokens;
            }
        } else {
            req.max_completion_tokens = max_tokens;
        }

        if request.stream {
            req.stream = Some(true);
            req.stream_options = Some(ChatCompletionStreamOptions {
                include_usage: Some(true),
                include_obfuscation: None,
            });
        }
        req
    }

    async fn fetch_models(&self) -> Result<Vec<String>, LlmError> {
        let name = &self.settings.name;
        let builder = self.authorized(self.client.get(self.url("/models")))?;
        let response = http::send(name, builder).await?;
        let list: ModelList = http::read_json(name, response).await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn complete_once(
        &self,
        body: &CreateChatCompletionRequest,
    ) -> Result<ResponseParts, LlmError> {
        let name = &self.settings.name;
        let builder = self.authorized(self.client.post(self.url("/chat/completions")).json(body))?;
        let response = http::send(name, builder).await?;

        if body.stream == Some(true) {
            return ResponseParts::collect(name, openai_chunks(name.clone(), response)).await;
        }

        let completion: CreateChatCompletionResponse = http::read_json(name, response).await?;
        let mut parts = ResponseParts {
            model: Some(completion.model),
            id: Some(completion.id),
            ..Default::default()
        };
        if let Some(usage) = completion.usage {
            parts.prompt_tokens = Some(usage.prompt_tokens);
            parts.completion_tokens = Some(usage.completion_tokens);
        }
        if let Some(choice) = completion.choices.into_iter().next() {
            parts.finish_reason = choice.finish_reason.as_ref().map(map_finish_reason);
            parts.content = choice.message.content.unwrap_or_default();
            if parts.content.trim().is_empty() {
                parts.block_reason = choice.message.refusal.map(|r| format!("refusal: {r}"));
            }
        }
        Ok(parts)
    }
}

// No Debug: the provider holds the API key.

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> ProviderKind {
        self.settings.kind
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
        let body = self.build_request(request, model.clone());

        let result = with_retry(
            &self.settings.name,
            self.settings.max_retries,
            self.backoff.clone(),
            || self.complete_once(&body),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use backoff::ExponentialBackoffBuilder;
    use serde_json::json;
    use sophia_types::llm::{FinishReason, Message};
    use sophia_types::provider::ProviderConfiguration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(kind: ProviderKind, server: &MockServer, key: Option<&str>) -> AdapterSettings {
        let mut config = ProviderConfiguration::new(kind)
            .with_base_url(format!("{}/v1", server.uri()))
            .with_max_retries(0)
            .unwrap();
        if let Some(key) = key {
            config = config.with_api_key(key);
        }
        AdapterSettings::from_config(&config)
    }

    fn openai(server: &MockServer) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::openai(settings(ProviderKind::OpenAi, server, Some("sk-test")))
            .unwrap()
            .with_backoff(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(Duration::from_millis(1))
                    .build(),
            )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(vec![
            Message::system("You are Epictetus."),
            Message::user("What is in my control?"),
        ])
    }

    fn completion(content: &str, finish: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000u32,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish
            }],
            "usage": {"prompt_tokens": 14, "completion_tokens": 6, "total_tokens": 20}
        })
    }

    #[tokio::test]
    async fn test_initialize_lists_models_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "gpt-4o-mini", "object": "model"}, {"id": "gpt-4o", "object": "model"}]
            })))
            .mount(&server)
            .await;

        let provider = openai(&server);
        provider.initialize().await.unwrap();
        assert!(provider.is_available());
        assert_eq!(provider.supported_models(), vec!["gpt-4o-mini", "gpt-4o"]);
        assert!(provider.health_status().is_healthy());
    }

    #[tokio::test]
    async fn test_initialize_without_key_is_authentication_error() {
        let server = MockServer::start().await;
        let provider =
            OpenAiCompatibleProvider::openai(settings(ProviderKind::OpenAi, &server, None)).unwrap();
        let err = provider.initialize().await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication { .. }));
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn test_initialize_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = openai(&server).initialize().await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication { .. }));
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_generate_non_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "max_completion_tokens": 50})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("Your judgments and your will.", "stop")),
            )
            .mount(&server)
            .await;

        let response = openai(&server)
            .generate(&request().with_max_tokens(50))
            .await
            .unwrap();
        assert_eq!(response.content, "Your judgments and your will.");
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.usage_tokens, Some(20));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.metadata["response_id"], json!("chatcmpl-1"));
    }

    #[tokio::test]
    async fn test_content_filter_without_text_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("", "content_filter")))
            .mount(&server)
            .await;

        let err = openai(&server).generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::ContentBlocked { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "20"))
            .expect(1)
            .mount(&server)
            .await;

        let err = openai(&server).generate(&request()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_auth_failure_during_generate_marks_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = openai(&server);
        provider.initialize().await.unwrap();
        assert!(provider.is_available());
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication { .. }));
        assert!(!provider.is_available());
        assert_eq!(provider.health_status().status, "unhealthy");
    }

    #[tokio::test]
    async fn test_generate_streaming_accumulates_sse() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Only \"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"your will.\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":3,\"total_tokens\":12}}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true, "stream_options": {"include_usage": true}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let response = openai(&server)
            .generate(&request().with_stream(true))
            .await
            .unwrap();
        assert_eq!(response.content, "Only your will.");
        assert_eq!(response.usage_tokens, Some(12));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.metadata["streamed"], json!(true));
    }

    #[tokio::test]
    async fn test_stream_cut_before_done_is_unavailable() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"id\":\"c2\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Some things are \"},\"finish_reason\":null}]}\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let err = openai(&server)
            .generate(&request().with_stream(true))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_openrouter_sends_attribution_and_legacy_max_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("x-title", config::DEFAULT_APP_TITLE))
            .and(body_partial_json(json!({"max_tokens": 64})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Amor fati.", "stop")))
            .mount(&server)
            .await;

        let provider_config = ProviderConfiguration::new(ProviderKind::OpenRouter);
        let provider = OpenAiCompatibleProvider::openrouter(
            settings(ProviderKind::OpenRouter, &server, Some("or-key")),
            config::openrouter_defaults(&provider_config),
        )
        .unwrap();
        let response = provider
            .generate(&request().with_max_tokens(64))
            .await
            .unwrap();
        assert_eq!(response.provider, "openrouter");
        assert_eq!(response.content, "Amor fati.");
    }
}
