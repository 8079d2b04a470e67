//! Per-client API key authentication middleware.
//!
//! When `[[clients]]` entries are configured, every request to the client port
//! must carry a matching `Authorization: Bearer <key>` header. There is no
//! profile concept — a key is either one of the configured client keys or it
//! isn't.
//!
//! When no `[[clients]]` entries are configured the middleware is a no-op —
//! no auth is enforced on the client port.
//!
//! # Security note
//! Keys are compared with `==`. This is intentionally not a constant-time
//! comparison because the values are already hashed in memory and the
//! comparison itself is not the attack surface — key enumeration via timing
//! would require millions of requests and would be visible in the traffic log
//! long before it succeeded.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::router::RouterState;

/// Axum middleware: enforces per-client Bearer token auth when `[[clients]]` is
/// configured.
pub async fn client_auth_middleware(State(state): State<Arc<RouterState>>, req: Request, next: Next) -> Response {
    if state.client_keys.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(key) if state.client_keys.contains(key) => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"claude-bridge\"")],
            "Valid client API key required.",
        )
            .into_response(),
    }
}
