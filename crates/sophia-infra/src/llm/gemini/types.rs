//! Gemini `generateContent` wire types.
//!
//! Field names are camelCase on the wire. Streaming (`alt=sse`) sends one
//! `GenerateContentResponse` per `data:` frame.

use serde::{Deserialize, Serialize};

use sophia_types::llm::FinishReason;

use crate::llm::streaming::StreamChunk;

/// Finish reasons that mean the candidate was withheld.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`; absent on `systemInstruction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u32>,
    #[serde(default)]
    pub candidates_token_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    /// Resource name, e.g. `models/gemini-1.5-flash`.
    pub name: String,
}

impl ModelInfo {
    pub fn id(&self) -> &str {
        self.name.strip_prefix("models/").unwrap_or(&self.name)
    }
}

pub fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        r if BLOCKED_FINISH_REASONS.contains(&r) => FinishReason::Safety,
        _ => FinishReason::Error,
    }
}

impl GenerateContentResponse {
    /// Decompose one response (or stream frame) into chunks.
    ///
    /// Only the first candidate is read.
    pub fn into_chunks(self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if let Some(id) = self.response_id {
            chunks.push(StreamChunk::Id(id));
        }
        if let Some(model) = self.model_version {
            chunks.push(StreamChunk::Model(model));
        }
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            chunks.push(StreamChunk::Blocked(reason));
        }
        if let Some(usage) = self.usage_metadata {
            chunks.push(StreamChunk::Usage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
            });
        }
        if let Some(candidate) = self.candidates.into_iter().next() {
            let text: String = candidate
                .content
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default();
            if !text.is_empty() {
                chunks.push(StreamChunk::Text(text));
            }
            if let Some(reason) = candidate.finish_reason {
                if BLOCKED_FINISH_REASONS.contains(&reason.as_str()) {
                    chunks.push(StreamChunk::Blocked(reason.clone()));
                }
                chunks.push(StreamChunk::Finish(map_finish_reason(&reason)));
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = GenerateContentRequest {
            contents: vec![Content::text(Some("user"), "Hello")],
            system_instruction: Some(Content::text(None, "Be brief.")),
            generation_config: Some(GenerationConfig {
                temperature: None,
                max_output_tokens: Some(100),
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
        assert!(json["generationConfig"].get("temperature").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
    }

    #[test]
    fn test_prompt_block_becomes_blocked_chunk() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"promptFeedback":{"blockReason":"SAFETY"},"usageMetadata":{"promptTokenCount":7}}"#,
        )
        .unwrap();
        let chunks = response.into_chunks();
        assert!(chunks.contains(&StreamChunk::Blocked("SAFETY".to_string())));
    }

    #[test]
    fn test_finish_reasons() {
        assert_eq!(map_finish_reason("STOP"), FinishReason::Stop);
        assert_eq!(map_finish_reason("MAX_TOKENS"), FinishReason::Length);
        assert_eq!(map_finish_reason("RECITATION"), FinishReason::Safety);
        assert_eq!(map_finish_reason("OTHER"), FinishReason::Error);
    }

    #[test]
    fn test_model_id_strips_resource_prefix() {
        let info = ModelInfo {
            name: "models/gemini-1.5-flash".to_string(),
        };
        assert_eq!(info.id(), "gemini-1.5-flash");
    }
}
