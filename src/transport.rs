//! HTTP delivery: one POST per attempt against the fixed write endpoint.
//!
//! Delivery outcomes are always [`SendResult`] values; a refused connection,
//! a timeout, or a non-2xx response is data, not a fault. The blocking client
//! is built lazily so that async-only callers never construct it.

use std::sync::OnceLock;

use reqwest::header;
use reqwest::StatusCode;
use serde::Deserialize;

/// Result of one delivery. A successful result carries no further state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    success: bool,
    error_text: Option<String>,
}

impl SendResult {
    // The canonical success value carries no per-call state, so one constant
    // serves every successful delivery.
    pub(crate) const SUCCESS: SendResult = SendResult {
        success: true,
        error_text: None,
    };

    pub(crate) fn failure(error_text: impl Into<String>) -> Self {
        SendResult {
            success: false,
            error_text: Some(error_text.into()),
        }
    }

    /// Whether the server accepted the write.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Human-readable error text; `None` on success.
    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }
}

/// Shape of the InfluxDB JSON error body, e.g.
/// `{"code":"invalid","message":"unable to parse ..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug)]
pub(crate) struct HttpTransport {
    write_url: reqwest::Url,
    token: Option<String>,
    blocking: OnceLock<reqwest::blocking::Client>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub(crate) fn new(write_url: reqwest::Url, token: Option<String>) -> Self {
        HttpTransport {
            write_url,
            token,
            blocking: OnceLock::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Posts a line-protocol body and blocks until the outcome is known.
    pub(crate) fn send(&self, body: &str) -> SendResult {
        let client = self
            .blocking
            .get_or_init(reqwest::blocking::Client::new);
        let mut request = client
            .post(self.write_url.clone())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_string());
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        match request.send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return SendResult::SUCCESS;
                }
                let body = response.text().unwrap_or_default();
                SendResult::failure(error_message(status, &body))
            }
            Err(err) => SendResult::failure(err.to_string()),
        }
    }

    /// Non-blocking variant of [`HttpTransport::send`] with identical
    /// semantics; the caller supplies the async runtime.
    pub(crate) async fn send_async(&self, body: &str) -> SendResult {
        let mut request = self
            .client
            .post(self.write_url.clone())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_string());
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return SendResult::SUCCESS;
                }
                let body = response.text().await.unwrap_or_default();
                SendResult::failure(error_message(status, &body))
            }
            Err(err) => SendResult::failure(err.to_string()),
        }
    }
}

/// Extracts a human-readable error from a non-2xx response: the JSON
/// `message` field when present (top-level first, then anywhere in the
/// document), falling back to the HTTP status text.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message {
            return message;
        }
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = find_message(&value) {
            return message.to_string();
        }
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_u16().to_string())
}

// Depth-first scan for the first string-valued "message" property.
fn find_message(value: &serde_json::Value) -> Option<&str> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(message)) = map.get("message") {
                return Some(message);
            }
            map.values().find_map(find_message)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_message),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_result_has_no_error_text() {
        assert!(SendResult::SUCCESS.is_success());
        assert!(SendResult::SUCCESS.error_text().is_none());
    }

    #[test]
    fn failure_result_carries_text() {
        let result = SendResult::failure("boom");
        assert!(!result.is_success());
        assert_eq!(result.error_text(), Some("boom"));
    }

    #[test]
    fn error_message_prefers_top_level_message() {
        let body = r#"{"code":"invalid","message":"unable to parse line"}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "unable to parse line"
        );
    }

    #[test]
    fn error_message_finds_nested_message() {
        let body = r#"{"error":{"details":[{"message":"bucket not found"}]}}"#;
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, body),
            "bucket not found"
        );
    }

    #[test]
    fn error_message_falls_back_to_status_text() {
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, "not json at all"),
            "Internal Server Error"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, r#"{"code":"oops"}"#),
            "Bad Gateway"
        );
    }
}
