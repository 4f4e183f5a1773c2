//! OpenTelemetry GenAI Semantic Convention attribute constants.
//!
//! Span naming convention: `"{operation} {provider}"` (e.g. `"chat openrouter"`).

/// The name of the operation being performed.
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The name of the GenAI provider (e.g., "anthropic").
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

/// The model ID requested.
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

/// The maximum number of output tokens requested.
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// The model that actually produced the response.
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";

pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

/// Single-provider chat generation.
pub const OP_CHAT: &str = "chat";

/// Fan-out generation across several providers.
pub const OP_CONSENSUS: &str = "consensus";

/// Span for one generation call. Response fields start empty and are filled
/// with [`record_response`].
pub fn generation_span(
    operation: &str,
    provider: Option<&str>,
    model: Option<&str>,
    max_tokens: Option<u32>,
) -> tracing::Span {
    tracing::info_span!(
        "gen_ai",
        otel.name = %format!("{operation} {}", provider.unwrap_or("auto")),
        { GEN_AI_OPERATION_NAME } = operation,
        { GEN_AI_PROVIDER_NAME } = provider,
        { GEN_AI_REQUEST_MODEL } = model,
        { GEN_AI_REQUEST_MAX_TOKENS } = max_tokens,
        { GEN_AI_RESPONSE_MODEL } = tracing::field::Empty,
        { GEN_AI_USAGE_INPUT_TOKENS } = tracing::field::Empty,
        { GEN_AI_USAGE_OUTPUT_TOKENS } = tracing::field::Empty,
    )
}

/// Record the provider, model and token usage of a finished generation.
pub fn record_response(
    span: &tracing::Span,
    provider: &str,
    model: &str,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
) {
    span.record(GEN_AI_PROVIDER_NAME, provider);
    span.record(GEN_AI_RESPONSE_MODEL, model);
    if let Some(tokens) = input_tokens {
        span.record(GEN_AI_USAGE_INPUT_TOKENS, tokens);
    }
    if let Some(tokens) = output_tokens {
        span.record(GEN_AI_USAGE_OUTPUT_TOKENS, tokens);
    }
}
