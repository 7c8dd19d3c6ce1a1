//!
//! Protocol conversion between client wire formats and the backend schema.
//!
//! Each client protocol has a converter owning the request mapping
//! (client -> backend), the unary response mapping (backend -> client) and a
//! [`StreamTranslator`] for streamed responses. The backend schema lives in
//! [`gemini`]; the tool-call id codec in [`signature`].
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod anthropic;
pub mod collector;
pub mod gemini;
pub mod models;
pub mod openai;
pub mod schema;
pub mod signature;

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::{Value, json};

use crate::converter::gemini::GenerateContentResponse;
use crate::sse::SseFrame;

pub use anthropic::AnthropicConverter;
pub use collector::StreamCollector;
pub use models::{ModelFeature, ModelSpec};
pub use openai::OpenAiConverter;

/* --- types ----------------------------------------------------------------------------------- */

/// Wire protocol spoken by the calling client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProtocol {
    OpenAi,
    Anthropic,
    /// Backend schema, forwarded without translation
    Gemini,
}

///
/// Incremental backend -> client stream translation.
///
/// Implementations keep whatever per-stream state their protocol needs and
/// guarantee exactly one terminal event: once `on_error` or `finish` has
/// produced it, every later call returns nothing.
pub trait StreamTranslator: Send {
    /// Frames for one backend chunk
    fn on_chunk(&mut self, chunk: &GenerateContentResponse) -> Vec<SseFrame>;

    /// Terminal error frames for a failure reported after the stream started
    fn on_error(&mut self, status: u16, body: &str) -> Vec<SseFrame>;

    /// Terminal frames for a stream that ended normally
    fn finish(&mut self) -> Vec<SseFrame>;

    /// Keep-alive frame that leaves the client-visible content untouched
    fn heartbeat(&self) -> SseFrame;
}

/// Backend-native stream forwarded chunk by chunk
#[derive(Debug, Default)]
pub struct GeminiPassthrough {
    finished: bool,
}

/* --- start of code -------------------------------------------------------------------------- */

impl ClientProtocol {
    ///
    /// Render an error in this protocol's error schema.
    ///
    /// # Arguments
    ///  * `status` - HTTP status the error is returned with
    ///  * `message` - human-readable description
    ///
    /// # Returns
    ///  * JSON error body
    pub fn error_body(&self, status: u16, message: &str) -> Value {
        match self {
            ClientProtocol::OpenAi => json!({
                "error": {
                    "message": message,
                    "type": openai_error_type(status),
                    "code": status
                }
            }),
            ClientProtocol::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": anthropic_error_type(status),
                    "message": message
                }
            }),
            ClientProtocol::Gemini => json!({
                "error": {
                    "code": status,
                    "message": message,
                    "status": gemini_status_name(status)
                }
            }),
        }
    }

    ///
    /// Render a backend error body for this protocol.
    ///
    /// Gemini clients get the body verbatim when it is JSON; other protocols get
    /// the backend's message wrapped in their own schema.
    pub fn backend_error_body(&self, status: u16, body: &str) -> Value {
        if *self == ClientProtocol::Gemini {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                return value;
            }
        }
        self.error_body(status, &backend_error_message(body))
    }
}

///
/// Pull the human-readable message out of a backend error body.
///
/// # Returns
///  * `error.message` when present, otherwise the trimmed raw body
pub fn backend_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() { "Backend request failed".to_string() } else { trimmed.to_string() }
        })
}

fn openai_error_type(status: u16) -> &'static str {
    match status {
        400 | 404 | 422 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        429 => "rate_limit_error",
        503 => "service_unavailable",
        _ => "internal_error",
    }
}

fn anthropic_error_type(status: u16) -> &'static str {
    match status {
        400 | 422 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        503 | 529 => "overloaded_error",
        _ => "api_error",
    }
}

fn gemini_status_name(status: u16) -> &'static str {
    match status {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        _ => "INTERNAL",
    }
}

/// Current time in seconds, for `created` fields
pub(crate) fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

impl StreamTranslator for GeminiPassthrough {
    fn on_chunk(&mut self, chunk: &GenerateContentResponse) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        vec![SseFrame::json(None, chunk)]
    }

    fn on_error(&mut self, status: u16, body: &str) -> Vec<SseFrame> {
        if std::mem::replace(&mut self.finished, true) {
            return Vec::new();
        }
        vec![SseFrame::json(None, &ClientProtocol::Gemini.backend_error_body(status, body))]
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        // the native stream has no terminator beyond closing the connection
        self.finished = true;
        Vec::new()
    }

    fn heartbeat(&self) -> SseFrame {
        SseFrame::json(
            None,
            &json!({"candidates": [{"content": {"role": "model", "parts": [{"text": ""}]}, "index": 0}]}),
        )
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_bodies_per_protocol() {
        let body = r#"{"error":{"code":429,"message":"Quota exhausted","status":"RESOURCE_EXHAUSTED"}}"#;

        let openai = ClientProtocol::OpenAi.backend_error_body(429, body);
        assert_eq!(openai["error"]["message"], "Quota exhausted");
        assert_eq!(openai["error"]["type"], "rate_limit_error");
        assert_eq!(openai["error"]["code"], 429);

        let anthropic = ClientProtocol::Anthropic.backend_error_body(429, body);
        assert_eq!(anthropic["type"], "error");
        assert_eq!(anthropic["error"]["type"], "rate_limit_error");

        let gemini = ClientProtocol::Gemini.backend_error_body(429, body);
        assert_eq!(gemini, serde_json::from_str::<Value>(body).unwrap());
    }

    #[test]
    fn test_backend_error_message_falls_back_to_body() {
        assert_eq!(backend_error_message("upstream exploded"), "upstream exploded");
        assert_eq!(backend_error_message(""), "Backend request failed");
    }

    #[test]
    fn test_passthrough_single_terminal() {
        let mut translator = GeminiPassthrough::default();
        assert_eq!(translator.on_chunk(&GenerateContentResponse::default()).len(), 1);
        assert_eq!(translator.on_error(500, "{}").len(), 1);
        assert!(translator.on_error(500, "{}").is_empty());
        assert!(translator.on_chunk(&GenerateContentResponse::default()).is_empty());
    }
}
