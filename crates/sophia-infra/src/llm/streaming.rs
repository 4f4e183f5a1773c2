//! Vendor-neutral stream assembly.
//!
//! Each adapter maps its wire events to [`StreamChunk`]s; [`ResponseParts`]
//! folds them (or a single non-streamed body) into one [`Response`]. The
//! empty-output and blocked-output rules live here so every vendor applies
//! them identically.

use std::pin::Pin;

use eventsource_stream::{Event, Eventsource};
use futures_util::{Stream, StreamExt};

use sophia_types::llm::{FinishReason, LlmError, Response};

use super::http::transport_error;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// One decoded piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Model(String),
    Id(String),
    Finish(FinishReason),
    Usage {
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    /// The vendor refused to produce output.
    Blocked(String),
    /// The vendor's end-of-stream marker.
    Done,
}

/// Server-sent events from a successful streaming response.
pub fn sse_events(
    provider: &str,
    response: reqwest::Response,
) -> impl Stream<Item = Result<Event, LlmError>> + Send + 'static {
    let provider = provider.to_string();
    response.bytes_stream().eventsource().map(move |item| {
        item.map_err(|e| match e {
            eventsource_stream::EventStreamError::Transport(err) => transport_error(&provider, err),
            other => LlmError::Deserialization(format!("{provider}: malformed event stream: {other}")),
        })
    })
}

/// Accumulated pieces of a response.
#[derive(Debug, Default)]
pub struct ResponseParts {
    pub content: String,
    pub model: Option<String>,
    pub id: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub block_reason: Option<String>,
    /// Set once a finish reason or end-of-stream marker has been seen.
    pub finished: bool,
}

impl ResponseParts {
    pub fn apply(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Text(text) => self.content.push_str(&text),
            StreamChunk::Model(model) => self.model = Some(model),
            StreamChunk::Id(id) => self.id = Some(id),
            StreamChunk::Finish(reason) => {
                self.finish_reason = Some(reason);
                self.finished = true;
            }
            StreamChunk::Usage {
                prompt_tokens,
                completion_tokens,
            } => {
                // Vendors report cumulative counts; keep the latest non-empty value.
                if prompt_tokens.is_some() {
                    self.prompt_tokens = prompt_tokens;
                }
                if completion_tokens.is_some() {
                    self.completion_tokens = completion_tokens;
                }
            }
            StreamChunk::Blocked(reason) => self.block_reason = Some(reason),
            StreamChunk::Done => self.finished = true,
        }
    }

    /// Drain `stream` into a single set of parts.
    ///
    /// A stream that closes before its terminal marker is `Unavailable`, so
    /// the partial text is never returned as an answer.
    pub async fn collect(provider: &str, mut stream: ChunkStream) -> Result<Self, LlmError> {
        let mut parts = Self::default();
        while let Some(chunk) = stream.next().await {
            parts.apply(chunk?);
        }
        parts.ensure_finished(provider)?;
        Ok(parts)
    }

    /// Fail when a streamed body ended early. Blocked output is complete.
    pub fn ensure_finished(&self, provider: &str) -> Result<(), LlmError> {
        if self.finished || self.block_reason.is_some() {
            return Ok(());
        }
        Err(LlmError::unavailable(provider, "stream ended before completion"))
    }

    /// Total tokens, when the vendor reported any.
    pub fn usage_tokens(&self) -> Option<u32> {
        match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (prompt, completion) => {
                Some(prompt.unwrap_or(0).saturating_add(completion.unwrap_or(0)))
            }
        }
    }

    /// Build the normalized response.
    ///
    /// A block reason, or empty text with a safety finish, is
    /// `ContentBlocked`. Any other empty text is a provider error.
    pub fn into_response(
        self,
        provider: &str,
        requested_model: &str,
        streamed: bool,
    ) -> Result<Response, LlmError> {
        if let Some(reason) = self.block_reason {
            return Err(LlmError::ContentBlocked {
                provider: provider.to_string(),
                reason,
            });
        }
        if self.content.trim().is_empty() {
            if self.finish_reason == Some(FinishReason::Safety) {
                return Err(LlmError::ContentBlocked {
                    provider: provider.to_string(),
                    reason: "safety".to_string(),
                });
            }
            return Err(LlmError::Provider {
                message: format!("{provider} returned an empty response"),
            });
        }

        let usage = self.usage_tokens();
        let model = self.model.unwrap_or_else(|| requested_model.to_string());
        let mut response = Response::new(self.content, provider, model)
            .with_usage(usage)
            .with_finish_reason(self.finish_reason)
            .with_metadata("streamed", streamed);
        if let Some(prompt) = self.prompt_tokens {
            response = response.with_metadata("prompt_tokens", prompt);
        }
        if let Some(completion) = self.completion_tokens {
            response = response.with_metadata("completion_tokens", completion);
        }
        if let Some(id) = self.id {
            response = response.with_metadata("response_id", id);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(items: Vec<StreamChunk>) -> ChunkStream {
        Box::pin(futures_util::stream::iter(items.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn test_collect_concatenates_text_in_order() {
        let parts = ResponseParts::collect("openai", chunks(vec![
            StreamChunk::Model("gpt-4o-mini-2024".to_string()),
            StreamChunk::Text("Know ".to_string()),
            StreamChunk::Text("thyself".to_string()),
            StreamChunk::Usage {
                prompt_tokens: Some(12),
                completion_tokens: None,
            },
            StreamChunk::Usage {
                prompt_tokens: None,
                completion_tokens: Some(3),
            },
            StreamChunk::Finish(FinishReason::Stop),
        ]))
        .await
        .unwrap();

        let response = parts.into_response("openai", "gpt-4o-mini", true).unwrap();
        assert_eq!(response.content, "Know thyself");
        assert_eq!(response.model, "gpt-4o-mini-2024");
        assert_eq!(response.usage_tokens, Some(15));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.metadata["streamed"], serde_json::json!(true));
        assert_eq!(response.metadata["prompt_tokens"], serde_json::json!(12));
    }

    #[tokio::test]
    async fn test_stream_error_aborts_collection() {
        let stream: ChunkStream = Box::pin(futures_util::stream::iter(vec![
            Ok(StreamChunk::Text("partial".to_string())),
            Err(LlmError::unavailable("anthropic", "overloaded")),
        ]));
        let err = ResponseParts::collect("anthropic", stream).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stream_without_terminal_marker_is_unavailable() {
        let err = ResponseParts::collect(
            "ollama",
            chunks(vec![StreamChunk::Text("The unexamined ".to_string())]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable { .. }));
        assert!(err.to_string().contains("stream ended before completion"));
    }

    #[tokio::test]
    async fn test_done_marker_completes_stream_without_finish_reason() {
        let parts = ResponseParts::collect(
            "anthropic",
            chunks(vec![StreamChunk::Text("life".to_string()), StreamChunk::Done]),
        )
        .await
        .unwrap();
        let response = parts.into_response("anthropic", "claude", true).unwrap();
        assert_eq!(response.content, "life");
        assert_eq!(response.finish_reason, None);
    }

    #[test]
    fn test_usage_total_saturates() {
        let parts = ResponseParts {
            prompt_tokens: Some(u32::MAX),
            completion_tokens: Some(7),
            ..Default::default()
        };
        assert_eq!(parts.usage_tokens(), Some(u32::MAX));
    }

    #[test]
    fn test_empty_output_is_an_error() {
        let parts = ResponseParts {
            content: "   ".to_string(),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        };
        let err = parts.into_response("ollama", "llama3.2", false).unwrap_err();
        assert!(matches!(err, LlmError::Provider { .. }));
        assert!(err.to_string().contains("empty response"));
    }

    #[test]
    fn test_safety_stop_without_text_is_blocked() {
        let parts = ResponseParts {
            finish_reason: Some(FinishReason::Safety),
            ..Default::default()
        };
        let err = parts.into_response("gemini", "gemini-1.5-flash", false).unwrap_err();
        assert!(matches!(err, LlmError::ContentBlocked { ref reason, .. } if reason == "safety"));
    }

    #[test]
    fn test_block_reason_wins_over_text() {
        let mut parts = ResponseParts::default();
        parts.apply(StreamChunk::Text("partial".to_string()));
        parts.apply(StreamChunk::Blocked("PROHIBITED_CONTENT".to_string()));
        let err = parts.into_response("gemini", "gemini-1.5-flash", true).unwrap_err();
        assert!(err.to_string().contains("PROHIBITED_CONTENT"));
    }

    #[test]
    fn test_usage_absent_when_unreported() {
        let parts = ResponseParts {
            content: "ok".to_string(),
            ..Default::default()
        };
        let response = parts.into_response("ollama", "llama3.2", false).unwrap();
        assert_eq!(response.usage_tokens, None);
        assert_eq!(response.model, "llama3.2");
    }
}
