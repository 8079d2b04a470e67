//! In-memory traffic log exposed through the admin API.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest entry
//! is evicted to make room for the newest. This gives a bounded, O(1) memory
//! footprint regardless of request volume.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push] uses
/// a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    /// Create a new log with the given capacity.
    ///
    /// `capacity` is the maximum number of entries retained. Older entries are
    /// silently dropped once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a completed request.
    ///
    /// This is a best-effort, non-blocking operation: if the mutex is contended
    /// the entry is dropped rather than blocking the request path.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Compute aggregate statistics over all buffered entries.
    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| !e.success).count();
        let cancelled_count = entries.iter().filter(|e| e.cancelled).count();

        let mut route_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in entries.iter() {
            *route_counts.entry(entry.route.clone()).or_default() += 1;
        }

        TrafficStats { total_requests: total, error_count, cancelled_count, avg_latency_ms, route_counts }
    }
}

/// A single request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    /// Unique request ID (mirrors the `X-Request-Id` response header when set).
    pub id: String,
    /// Timestamp of the request.
    pub timestamp: DateTime<Utc>,
    /// Model string as sent by the client, suffix and all.
    pub requested_model: Option<String>,
    /// Route prefix that matched (`RouteConfig::prefix`).
    pub route: String,
    /// Backend the request was forwarded to.
    pub backend: String,
    /// Upstream model name actually sent.
    pub target_model: String,
    /// Whether reasoning/thinking was requested for this call.
    pub reasoning_requested: bool,
    /// Whether the client requested a streaming response.
    pub stream: bool,
    /// Whether the client cancelled the request before it completed.
    pub cancelled: bool,
    /// End-to-end latency in milliseconds.
    pub latency_ms: u64,
    /// Whether the call completed without error.
    pub success: bool,
    /// Stable error taxonomy string (`BridgeError::kind()`) when `success` is `false`.
    pub error: Option<String>,
}

impl TrafficEntry {
    pub fn new(route: String, backend: String, target_model: String, latency_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            requested_model: None,
            route,
            backend,
            target_model,
            reasoning_requested: false,
            stream: false,
            cancelled: false,
            latency_ms,
            success,
            error: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_requested_model(mut self, model: &str) -> Self {
        self.requested_model = Some(model.to_string());
        self
    }

    pub fn with_reasoning_requested(mut self, requested: bool) -> Self {
        self.reasoning_requested = requested;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn mark_cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.success = false;
        self.error = Some(err.to_string());
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    /// Number of requests that returned an error.
    pub error_count: usize,
    /// Number of requests the client cancelled mid-stream.
    pub cancelled_count: usize,
    pub avg_latency_ms: f64,
    pub route_counts: std::collections::HashMap<String, usize>,
}
