//! Shared HTTP plumbing for the vendor adapters.
//!
//! Every adapter sends through a `reqwest::Client` built here and funnels
//! non-2xx responses through [`status_error`], so the error taxonomy is the
//! same regardless of vendor.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};

use sophia_types::llm::LlmError;

/// Longest slice of an error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

/// Build the client an adapter uses for all of its calls.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("sophia/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LlmError::Provider {
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Join a base URL and an absolute path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// `Retry-After` as whole seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success status to the shared error taxonomy.
pub fn status_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> LlmError {
    let detail = error_detail(body);
    match status.as_u16() {
        401 | 403 => LlmError::authentication(provider, detail),
        429 => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        408 | 529 => LlmError::unavailable(provider, format!("HTTP {status}: {detail}")),
        code if code >= 500 => LlmError::unavailable(provider, format!("HTTP {status}: {detail}")),
        _ => LlmError::Provider {
            message: format!("{provider} returned HTTP {status}: {detail}"),
        },
    }
}

/// Connection-level failures are always worth another attempt.
pub fn transport_error(provider: &str, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::unavailable(provider, format!("request timed out: {err}"))
    } else if err.is_decode() {
        LlmError::Deserialization(format!("{provider}: {err}"))
    } else {
        LlmError::unavailable(provider, format!("request failed: {err}"))
    }
}

/// Send `request` and turn any non-2xx status into an [`LlmError`].
pub async fn send(provider: &str, request: RequestBuilder) -> Result<reqwest::Response, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(provider, status = status.as_u16(), "Provider returned error status");
    Err(status_error(provider, status, retry_after, &body))
}

/// Decode a JSON body, mapping failures to [`LlmError::Deserialization`].
pub async fn read_json<T: serde::de::DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, LlmError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LlmError::Deserialization(format!("{provider}: failed to parse response: {e}")))
}

/// Pull a human-readable message out of a vendor error body.
///
/// Vendors wrap it as `{"error": {"message": ..}}`, `{"error": ".."}` or
/// plain text.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = value.get("error");
        if let Some(message) = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return message.to_string();
        }
        if let Some(message) = error.and_then(|e| e.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use sophia_types::llm::ErrorKind;

    #[test]
    fn test_status_mapping() {
        let auth = status_error("openai", StatusCode::UNAUTHORIZED, None, "");
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        let forbidden = status_error("openai", StatusCode::FORBIDDEN, None, "");
        assert_eq!(forbidden.kind(), ErrorKind::Authentication);

        let limited = status_error(
            "gemini",
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(12)),
            "",
        );
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(12)));

        for code in [408u16, 500, 502, 503, 529] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                status_error("anthropic", status, None, "").kind(),
                ErrorKind::Unavailable,
                "status {code}"
            );
        }

        let bad = status_error("anthropic", StatusCode::BAD_REQUEST, None, "bad model");
        assert!(matches!(bad, LlmError::Provider { .. }));
        assert!(bad.to_string().contains("bad model"));
    }

    #[test]
    fn test_error_detail_shapes() {
        assert_eq!(
            error_detail(r#"{"error":{"message":"invalid x-api-key","type":"authentication_error"}}"#),
            "invalid x-api-key"
        );
        assert_eq!(error_detail(r#"{"error":"model not found"}"#), "model not found");
        assert_eq!(error_detail("  upstream down \n"), "upstream down");
        assert_eq!(error_detail(""), "no response body");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:11434/", "/api/chat"),
            "http://localhost:11434/api/chat"
        );
        assert_eq!(
            join_url("https://api.openai.com/v1", "models"),
            "https://api.openai.com/v1/models"
        );
    }
}
