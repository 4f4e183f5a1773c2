//! GeminiProvider -- [`LlmProvider`] for the Google Generative Language API.

use backoff::ExponentialBackoff;
use futures_util::StreamExt;
use secrecy::ExposeSecret;

use sophia_core::llm::provider::LlmProvider;
use sophia_core::llm::state::ProviderState;
use sophia_types::llm::{GenerationRequest, LlmError, MessageRole, ProviderSelfReport, Response};
use sophia_types::provider::ProviderKind;

use super::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, ModelListResponse,
};
use crate::llm::http;
use crate::llm::retry::{backoff_for, with_retry};
use crate::llm::settings::AdapterSettings;
use crate::llm::streaming::{ChunkStream, ResponseParts, sse_events};

pub struct GeminiProvider {
    client: reqwest::Client,
    settings: AdapterSettings,
    state: ProviderState,
    backoff: ExponentialBackoff,
}

impl GeminiProvider {
    pub fn new(settings: AdapterSettings) -> Result<Self, LlmError> {
        let client = http::build_client(settings.timeout)?;
        let state = ProviderState::new(settings.name.clone(), ProviderKind::Gemini);
        Ok(Self {
            client,
            backoff: backoff_for(ProviderKind::Gemini),
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
        Ok(builder.header("x-goog-api-key", key.expose_secret()))
    }

    /// Assistant turns use the `model` role; system text moves to
    /// `systemInstruction`.
    fn to_gemini_request(&self, request: &GenerationRequest) -> GenerateContentRequest {
        let contents = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                MessageRole::System => None,
                MessageRole::User => Some(Content::text(Some("user"), m.content.clone())),
                MessageRole::Assistant => Some(Content::text(Some("model"), m.content.clone())),
            })
            .collect();

        let config = GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: self.settings.max_tokens_for(request),
        };
        let has_config = config.temperature.is_some() || config.max_output_tokens.is_some();

        GenerateContentRequest {
            contents,
            system_instruction: request.system_prompt().map(|s| Content::text(None, s)),
            generation_config: has_config.then_some(config),
        }
    }

    async fn fetch_models(&self) -> Result<Vec<String>, LlmError> {
        let name = &self.settings.name;
        let builder = self.authorized(self.client.get(self.url("/v1beta/models")))?;
        let response = http::send(name, builder).await?;
        let list: ModelListResponse = http::read_json(name, response).await?;
        Ok(list.models.iter().map(|m| m.id().to_string()).collect())
    }

    async fn generate_once(
        &self,
        body: &GenerateContentRequest,
        model: &str,
        stream: bool,
    ) -> Result<ResponseParts, LlmError> {
        let name = &self.settings.name;
        let path = if stream {
            format!("/v1beta/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("/v1beta/models/{model}:generateContent")
        };
        let builder = self.authorized(self.client.post(self.url(&path)).json(body))?;
        let response = http::send(name, builder).await?;

        if stream {
            return ResponseParts::collect(name, gemini_chunks(name.clone(), response)).await;
        }

        let body: GenerateContentResponse = http::read_json(name, response).await?;
        let mut parts = ResponseParts::default();
        for chunk in body.into_chunks() {
            parts.apply(chunk);
        }
        Ok(parts)
    }
}

/// Map the `alt=sse` body to chunks; every frame is a full response object.
fn gemini_chunks(provider: String, response: reqwest::Response) -> ChunkStream {
    Box::pin(async_stream::try_stream! {
        let mut events = std::pin::pin!(sse_events(&provider, response));
        while let Some(event) = events.next().await {
            let event = event?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            let frame: GenerateContentResponse = serde_json::from_str(data).map_err(|e| {
                LlmError::Deserialization(format!("{provider}: malformed stream frame: {e}"))
            })?;
            for chunk in frame.into_chunks() {
                yield chunk;
            }
        }
    })
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
        let body = self.to_gemini_request(request);

        let result = with_retry(
            &self.settings.name,
            self.settings.max_retries,
            self.backoff.clone(),
            || self.generate_once(&body, &model, request.stream),
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
    use serde_json::json;
    use sophia_types::llm::{FinishReason, Message};
    use sophia_types::provider::ProviderConfiguration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_provider(server: &MockServer) -> GeminiProvider {
        let config = ProviderConfiguration::new(ProviderKind::Gemini)
            .with_api_key("AIza-test")
            .with_base_url(server.uri())
            .with_max_retries(0)
            .unwrap();
        GeminiProvider::new(AdapterSettings::from_config(&config)).unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(vec![
            Message::system("You are Zeno of Citium."),
            Message::user("What is the good?"),
            Message::assistant("Virtue."),
            Message::user("And the rest?"),
        ])
    }

    #[test]
    fn test_roles_are_mapped() {
        let config = ProviderConfiguration::new(ProviderKind::Gemini).with_api_key("k");
        let provider = GeminiProvider::new(AdapterSettings::from_config(&config)).unwrap();
        let body = provider.to_gemini_request(&request());
        let roles: Vec<_> = body
            .contents
            .iter()
            .map(|c| c.role.clone().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert!(body.system_instruction.is_some());
        assert!(body.generation_config.is_none());
    }

    #[tokio::test]
    async fn test_initialize_strips_model_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(header("x-goog-api-key", "AIza-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "models/gemini-1.5-flash"}, {"name": "models/gemini-1.5-pro"}]
            })))
            .mount(&server)
            .await;

        let provider = make_provider(&server);
        provider.initialize().await.unwrap();
        assert_eq!(
            provider.supported_models(),
            vec!["gemini-1.5-flash", "gemini-1.5-pro"]
        );
    }

    #[tokio::test]
    async fn test_generate_non_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "You are Zeno of Citium."}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Indifferent."}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 3, "totalTokenCount": 33},
                "modelVersion": "gemini-1.5-flash-002"
            })))
            .mount(&server)
            .await;

        let response = make_provider(&server).generate(&request()).await.unwrap();
        assert_eq!(response.content, "Indifferent.");
        assert_eq!(response.model, "gemini-1.5-flash-002");
        assert_eq!(response.usage_tokens, Some(33));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_generate_streaming() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Health, \"}]}}],\"usageMetadata\":{\"promptTokenCount\":30}}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"wealth: indifferent.\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":30,\"candidatesTokenCount\":5}}\r\n\r\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let response = make_provider(&server)
            .generate(&request().with_stream(true))
            .await
            .unwrap();
        assert_eq!(response.content, "Health, wealth: indifferent.");
        assert_eq!(response.usage_tokens, Some(35));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_stream_cut_before_finish_reason_is_unavailable() {
        let server = MockServer::start().await;
        let sse = "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Health, \"}]}}]}\r\n\r\n";
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let err = make_provider(&server)
            .generate(&request().with_stream(true))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_safety_finish_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"finishReason": "SAFETY"}]
            })))
            .mount(&server)
            .await;

        let err = make_provider(&server).generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::ContentBlocked { ref reason, .. } if reason == "SAFETY"));
    }

    #[tokio::test]
    async fn test_prompt_block_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}
            })))
            .mount(&server)
            .await;

        let err = make_provider(&server).generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("PROHIBITED_CONTENT"));
    }

    #[tokio::test]
    async fn test_forbidden_key_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "API key not valid.", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let provider = make_provider(&server);
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication { .. }));
        assert_eq!(provider.health_status().last_error.as_deref(), Some(err.to_string().as_str()));
    }
}
