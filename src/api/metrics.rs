//! Prometheus-compatible `/metrics` endpoint.
//!
//! All metrics are derived from the in-memory ring-buffer window. Because the
//! buffer has a fixed capacity, values represent a **sliding window** of recent
//! requests rather than lifetime counters. Use `TYPE gauge` throughout for
//! semantic accuracy — values may decrease as old entries rotate out.
//!
//! Metric families:
//! - `bridge_window_size`          — entries currently in the ring buffer
//! - `bridge_requests`             — per-route/backend/outcome request counts
//! - `bridge_latency_ms_sum`       — sum of latencies per route/backend (for avg)
//! - `bridge_latency_ms_count`     — denominator matching the sum above
//! - `bridge_cancellations_total`  — requests the client cancelled mid-stream
//! - `bridge_errors_total`         — requests that returned an error

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::router::RouterState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let entries = state.traffic.recent(usize::MAX).await;

    let window_size = entries.len();
    let mut cancelled: u64 = 0;
    let mut errors: u64 = 0;

    // (route, backend, success) → count
    let mut request_counts: HashMap<(String, String, bool), u64> = HashMap::new();
    // (route, backend) → (latency_sum_ms, count)
    let mut latency: HashMap<(String, String), (u64, u64)> = HashMap::new();

    for e in &entries {
        if e.cancelled {
            cancelled += 1;
        }
        if !e.success {
            errors += 1;
        }

        *request_counts.entry((e.route.clone(), e.backend.clone(), e.success)).or_default() += 1;

        let lat = latency.entry((e.route.clone(), e.backend.clone())).or_default();
        lat.0 += e.latency_ms;
        lat.1 += 1;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP bridge_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE bridge_window_size gauge\n");
    out.push_str(&format!("bridge_window_size {window_size}\n\n"));

    out.push_str(
        "# HELP bridge_requests Request count in the current window, labelled by route, backend, and outcome.\n",
    );
    out.push_str("# TYPE bridge_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((route, backend, success), count) in req_rows {
        let success_str = if *success { "true" } else { "false" };
        out.push_str(&format!(
            "bridge_requests{{route=\"{route}\",backend=\"{backend}\",success=\"{success_str}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str(
        "# HELP bridge_latency_ms_sum Sum of request latency (ms) in the current window, grouped by route and backend.\n",
    );
    out.push_str("# TYPE bridge_latency_ms_sum gauge\n");
    out.push_str("# HELP bridge_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE bridge_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((route, backend), (sum, count)) in lat_rows {
        out.push_str(&format!("bridge_latency_ms_sum{{route=\"{route}\",backend=\"{backend}\"}} {sum}\n"));
        out.push_str(&format!("bridge_latency_ms_count{{route=\"{route}\",backend=\"{backend}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP bridge_cancellations_total Requests the client cancelled mid-stream in the current window.\n");
    out.push_str("# TYPE bridge_cancellations_total gauge\n");
    out.push_str(&format!("bridge_cancellations_total {cancelled}\n\n"));

    out.push_str("# HELP bridge_errors_total Requests that returned an error in the current window.\n");
    out.push_str("# TYPE bridge_errors_total gauge\n");
    out.push_str(&format!("bridge_errors_total {errors}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], out)
}
