//! OpenAI chat-completions SSE stream to [`StreamChunk`] adapter.
//!
//! Each `data:` frame carries a `CreateChatCompletionStreamResponse`; the
//! literal `[DONE]` ends the stream. With `stream_options.include_usage`
//! the last frame before `[DONE]` has an empty `choices` array and the usage.

use futures_util::StreamExt;

use async_openai::types::chat::{CreateChatCompletionStreamResponse, FinishReason};

use sophia_types::llm::{self, LlmError};

use crate::llm::streaming::{ChunkStream, StreamChunk, sse_events};

/// Sentinel `data:` payload that closes the stream.
const DONE_MARKER: &str = "[DONE]";

pub fn map_finish_reason(reason: &FinishReason) -> llm::FinishReason {
    match reason {
        FinishReason::Stop => llm::FinishReason::Stop,
        FinishReason::Length => llm::FinishReason::Length,
        FinishReason::ContentFilter => llm::FinishReason::Safety,
        FinishReason::ToolCalls | FinishReason::FunctionCall => llm::FinishReason::Stop,
    }
}

/// Map the SSE body of a streaming chat completion to chunks.
pub fn openai_chunks(provider: String, response: reqwest::Response) -> ChunkStream {
    Box::pin(async_stream::try_stream! {
        let mut events = std::pin::pin!(sse_events(&provider, response));

        while let Some(event) = events.next().await {
            let event = event?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_MARKER {
                yield StreamChunk::Done;
                break;
            }

            let chunk = parse_frame(&provider, data)?;
            yield StreamChunk::Id(chunk.id.clone());
            yield StreamChunk::Model(chunk.model.clone());

            if let Some(usage) = chunk.usage.as_ref() {
                yield StreamChunk::Usage {
                    prompt_tokens: Some(usage.prompt_tokens),
                    completion_tokens: Some(usage.completion_tokens),
                };
            }

            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        yield StreamChunk::Text(text);
                    }
                }
                if let Some(reason) = choice.finish_reason.as_ref() {
                    yield StreamChunk::Finish(map_finish_reason(reason));
                }
            }
        }
    })
}

/// Parse one frame. Vendors report mid-stream failures as `{"error": {..}}`.
fn parse_frame(provider: &str, data: &str) -> Result<CreateChatCompletionStreamResponse, LlmError> {
    match serde_json::from_str::<CreateChatCompletionStreamResponse>(data) {
        Ok(chunk) => Ok(chunk),
        Err(parse_err) => {
            let value: serde_json::Value = serde_json::from_str(data).map_err(|_| {
                LlmError::Deserialization(format!("{provider}: malformed stream frame: {parse_err}"))
            })?;
            match value.get("error") {
                Some(error) => {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    Err(LlmError::Provider {
                        message: format!("{provider} stream error: {message}"),
                    })
                }
                None => Err(LlmError::Deserialization(format!(
                    "{provider}: malformed stream frame: {parse_err}"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_filter_maps_to_safety() {
        assert_eq!(
            map_finish_reason(&FinishReason::ContentFilter),
            llm::FinishReason::Safety
        );
        assert_eq!(map_finish_reason(&FinishReason::Length), llm::FinishReason::Length);
    }

    #[test]
    fn test_error_frame_is_provider_error() {
        let err = parse_frame(
            "openrouter",
            r#"{"error":{"code":502,"message":"upstream provider went away"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LlmError::Provider { .. }));
        assert!(err.to_string().contains("upstream provider went away"));
    }

    #[test]
    fn test_garbage_frame_is_deserialization_error() {
        let err = parse_frame("openai", "not json").unwrap_err();
        assert!(matches!(err, LlmError::Deserialization(_)));
    }
}
