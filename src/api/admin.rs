//! Admin API (admin port) — operator-facing introspection endpoints.
//!
//! Separated onto its own port so it can be network-restricted independently
//! of the client API (e.g. accessible only from an internal network). Every
//! route here is gated by [`crate::api::admin_auth::admin_auth_middleware`]
//! when wired up in `main.rs`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{backends::openai_compat::UpstreamClient, router::RouterState};

/// Build the admin-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/traffic", get(traffic))
        .route("/admin/config", get(config))
        .route("/admin/backends/health", get(backends_health))
        .route("/metrics", get(crate::api::metrics::metrics))
        .with_state(state)
}

/// `GET /admin/health` — liveness plus a route/backend count.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();
    Json(json!({
        "status": "ok",
        "routes": config.routes.len(),
        "backends": config.backends.len(),
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// `GET /admin/traffic?limit=N` — recent N traffic entries plus aggregate stats.
pub async fn traffic(State(state): State<Arc<RouterState>>, Query(q): Query<TrafficQuery>) -> impl IntoResponse {
    let entries = state.traffic.recent(q.limit).await;
    let stats = state.traffic.stats().await;
    Json(json!({
        "stats": stats,
        "entries": entries,
    }))
}

/// `GET /admin/config` — the current config with secrets redacted (env var
/// names are shown, resolved values never are).
pub async fn config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();

    let backends: Vec<Value> = cfg
        .backends
        .iter()
        .map(|(name, b)| {
            json!({
                "name": name,
                "base_url": b.base_url,
                "api_key_env": b.api_key_env,
                "timeout_ms": b.timeout_ms,
            })
        })
        .collect();

    let routes: Vec<Value> = cfg
        .routes
        .iter()
        .map(|r| {
            json!({
                "prefix": r.prefix,
                "backend": r.backend,
                "target_model": r.target_model,
                "has_reasoning_default": r.reasoning_default.is_some(),
                "has_tool_arg_dialect": r.tool_arg_dialect.is_some(),
            })
        })
        .collect();

    let clients: Vec<Value> = cfg.clients.iter().map(|c| json!({ "key_env": c.key_env })).collect();

    Json(json!({
        "bridge": {
            "client_port": cfg.bridge.client_port,
            "admin_port": cfg.bridge.admin_port,
            "traffic_log_capacity": cfg.bridge.traffic_log_capacity,
            "log_level": cfg.bridge.log_level,
            "rate_limit_rpm": cfg.bridge.rate_limit_rpm,
            "overall_timeout_ms": cfg.bridge.overall_timeout_ms,
            "idle_timeout_ms": cfg.bridge.idle_timeout_ms,
        },
        "backends": backends,
        "routes": routes,
        "clients": clients,
    }))
}

/// `GET /admin/backends/health` — probes every configured backend's
/// `/v1/models` endpoint.
pub async fn backends_health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();
    let mut results = Vec::new();

    for (name, backend_cfg) in &cfg.backends {
        let client =
            match UpstreamClient::new(backend_cfg, cfg.bridge.max_retries.unwrap_or(0), cfg.bridge.retry_delay_ms.unwrap_or(500)) {
                Ok(c) => c,
                Err(e) => {
                    results.push(json!({ "backend": name, "status": "error", "error": e.to_string() }));
                    continue;
                }
            };

        match client.health_check().await {
            Ok(_) => results.push(json!({ "backend": name, "status": "ok" })),
            Err(e) => results.push(json!({ "backend": name, "status": "unreachable", "error": e.to_string() })),
        }
    }

    let all_ok = results.iter().all(|r| r["status"] == "ok");
    let status = if all_ok { StatusCode::OK } else { StatusCode::MULTI_STATUS };

    (status, Json(json!({ "backends": results })))
}
