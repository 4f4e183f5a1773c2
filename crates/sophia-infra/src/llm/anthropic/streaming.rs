//! SSE stream decoding for the Anthropic Messages API.
//!
//! Event order:
//! 1. `message_start` -- message id, model and input usage
//! 2. per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` -- stop_reason and cumulative output usage
//! 4. `message_stop` -- final event
//!
//! `ping` may appear anywhere; `error` may appear mid-stream.

use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use sophia_types::llm::LlmError;

use super::types::{
    AnthropicDelta, ContentBlockDeltaPayload, ErrorPayload, MessageDeltaPayload,
    MessageStartPayload, map_stop_reason,
};
use crate::llm::streaming::{ChunkStream, StreamChunk, sse_events};

/// Map the SSE body of a streaming Messages call to chunks.
pub fn anthropic_chunks(provider: String, response: reqwest::Response) -> ChunkStream {
    Box::pin(async_stream::try_stream! {
        let mut events = std::pin::pin!(sse_events(&provider, response));

        while let Some(event) = events.next().await {
            let event = event?;
            match event.event.as_str() {
                "message_start" => {
                    let payload: MessageStartPayload = decode(&provider, &event.data)?;
                    yield StreamChunk::Id(payload.message.id);
                    yield StreamChunk::Model(payload.message.model);
                    if let Some(usage) = payload.message.usage {
                        yield StreamChunk::Usage {
                            prompt_tokens: usage.input_tokens,
                            completion_tokens: usage.output_tokens,
                        };
                    }
                }
                "content_block_delta" => {
                    let payload: ContentBlockDeltaPayload = decode(&provider, &event.data)?;
                    if let AnthropicDelta::TextDelta { text } = payload.delta {
                        yield StreamChunk::Text(text);
                    }
                }
                "message_delta" => {
                    let payload: MessageDeltaPayload = decode(&provider, &event.data)?;
                    if let Some(reason) = payload.delta.stop_reason.as_deref() {
                        yield StreamChunk::Finish(map_stop_reason(reason));
                    }
                    if let Some(usage) = payload.usage {
                        yield StreamChunk::Usage {
                            prompt_tokens: usage.input_tokens,
                            completion_tokens: usage.output_tokens,
                        };
                    }
                }
                "message_stop" => {
                    yield StreamChunk::Done;
                    break;
                }
                "error" => {
                    let payload: ErrorPayload = decode(&provider, &event.data)?;
                    Err::<(), LlmError>(stream_error(&provider, payload))?;
                }
                // ping, content_block_start, content_block_stop
                _ => {}
            }
        }
    })
}

fn decode<T: DeserializeOwned>(provider: &str, data: &str) -> Result<T, LlmError> {
    serde_json::from_str(data)
        .map_err(|e| LlmError::Deserialization(format!("{provider}: malformed stream event: {e}")))
}

/// `overloaded_error` is worth retrying; anything else is not.
pub fn stream_error(provider: &str, payload: ErrorPayload) -> LlmError {
    match payload.error.error_type.as_str() {
        "overloaded_error" | "api_error" => LlmError::unavailable(provider, payload.error.message),
        "authentication_error" | "permission_error" => {
            LlmError::authentication(provider, payload.error.message)
        }
        "rate_limit_error" => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        },
        other => LlmError::Provider {
            message: format!("{provider} stream error ({other}): {}", payload.error.message),
        },
    }
}
