//! Client-facing API (client port) — the Anthropic-wire-compatible surface.
//!
//! This is intentionally a thin layer: all translation and upstream-call
//! orchestration lives in [`crate::router`]. Handlers translate HTTP concerns
//! (status codes, streaming bodies, JSON envelopes) into calls to the router
//! and back.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::{
    core::{
        cancellation::{CancelOnDisconnect, Cancellation},
        error_map::BridgeError,
        model::AnthropicRequest,
        token_counter::TokenCounter,
    },
    router::{handle_messages, handle_messages_stream, RouterState},
};

/// Build the client-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/status", get(crate::api::status::status))
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

fn parse_request(body: &[u8]) -> Result<AnthropicRequest, BridgeError> {
    serde_json::from_slice(body).map_err(|e| BridgeError::InvalidRequest(format!("malformed request body: {e}")))
}

/// `POST /v1/messages` — streaming or non-streaming depending on `"stream"`.
pub async fn messages(State(state): State<Arc<RouterState>>, body: axum::body::Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(err) => return err.into_response(),
    };

    let cancellation = Cancellation::new();

    if request.stream {
        let disconnect_signal = cancellation.clone();
        let stream = handle_messages_stream(Arc::clone(&state), request, cancellation).await;
        let body_stream = CancelOnDisconnect::new(stream, disconnect_signal).map(|frame| Ok::<_, std::io::Error>(frame));
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(body_stream))
            .expect("building a streaming response never fails")
    } else {
        match handle_messages(&state, request, cancellation).await {
            Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
            Err(err) => err.into_response(),
        }
    }
}

/// `POST /v1/messages/count_tokens` — estimates input tokens without calling
/// any upstream backend (spec §10.7).
pub async fn count_tokens(State(state): State<Arc<RouterState>>, body: axum::body::Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(err) => return err.into_response(),
    };

    let input_tokens = state.token_counter.estimate(&request.messages);
    (StatusCode::OK, Json(json!({ "input_tokens": input_tokens }))).into_response()
}

/// `GET /v1/models` — enumerates configured routes as Anthropic-style model
/// entries.
pub async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();
    let data: Vec<Value> = config
        .routes
        .iter()
        .map(|r| {
            json!({
                "id": r.prefix,
                "type": "model",
                "display_name": r.prefix,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data, "has_more": false }))
}
