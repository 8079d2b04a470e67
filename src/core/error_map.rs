//! The closed error taxonomy surfaced to clients (spec §7), and its rendering
//! into both a non-streaming JSON body and a streaming `error` SSE event.
//!
//! Kept as a dedicated `thiserror` enum rather than folded into [`crate::error::AppError`]
//! because the Anthropic wire contract requires a *stable, closed* set of
//! `type` strings — an `anyhow`-wrapped catch-all would leak internal detail
//! into the kind field.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("upstream authentication failed")]
    Authentication,
    #[error("upstream denied the request")]
    Permission,
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("rate limited by upstream")]
    RateLimit,
    #[error("upstream overloaded")]
    Overloaded,
    #[error("upstream error: {0}")]
    Api(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

impl BridgeError {
    /// The stable `error.type` string in the Anthropic error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidRequest(_) => "invalid_request_error",
            BridgeError::Authentication => "authentication_error",
            BridgeError::Permission => "permission_error",
            BridgeError::NotFound(_) => "not_found_error",
            BridgeError::RateLimit => "rate_limit_error",
            BridgeError::Overloaded => "overloaded_error",
            BridgeError::Api(_) => "api_error",
            BridgeError::Timeout => "timeout_error",
            BridgeError::Cancelled => "cancelled",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            BridgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::Authentication => StatusCode::UNAUTHORIZED,
            BridgeError::Permission => StatusCode::FORBIDDEN,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            BridgeError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Api(_) => StatusCode::BAD_GATEWAY,
            BridgeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Cancelled => StatusCode::OK,
        }
    }

    /// Construct the appropriate variant from an upstream HTTP status code.
    pub fn from_upstream_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => BridgeError::Authentication,
            403 => BridgeError::Permission,
            404 => BridgeError::NotFound(body.to_string()),
            429 => BridgeError::RateLimit,
            503 => BridgeError::Overloaded,
            _ => BridgeError::Api(format!("upstream returned HTTP {status}: {body}")),
        }
    }

    /// The Anthropic-shaped `{"type":"error","error":{...}}` JSON envelope.
    pub fn to_envelope(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        })
    }

    /// Render as a single `event: error` SSE frame, used only when the stream
    /// failed before `message_start` was ever sent.
    pub fn to_sse_event(&self) -> String {
        format!("event: error\ndata: {}\n\n", self.to_envelope())
    }
}

impl IntoResponse for BridgeError {
    /// Non-streaming error response: the Anthropic error envelope at the
    /// status code that best matches the upstream failure.
    fn into_response(self) -> Response {
        (self.http_status(), Json(self.to_envelope())).into_response()
    }
}
