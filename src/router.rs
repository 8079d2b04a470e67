//! Shared application state plus the request/response and streaming
//! orchestration that ties the HTTP layer (`api::client`) to the core
//! converters (`core::request`, `core::response`, `core::stream`) and the
//! upstream transport (`backends::openai_compat`).
//!
//! `RouterState` holds the hot-reloadable [`Config`] behind a read-write lock
//! so `config_watcher` (in `main.rs`) can swap in a freshly parsed config
//! without interrupting in-flight requests — any request already holding an
//! `Arc<Config>` snapshot keeps running against it.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use futures_util::{stream, Stream, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::{
    api::rate_limit::RateLimiter,
    backends::openai_compat::{SseFrame, UpstreamClient},
    config::Config,
    core::{
        cancellation::Cancellation,
        error_map::BridgeError,
        model::{AnthropicRequest, AnthropicResponse, ReasoningConfig},
        request, response,
        router::{resolve, Resolution},
        stream::StreamMachine,
        token_counter::{HeuristicCounter, TokenCounter},
    },
    traffic::{TrafficEntry, TrafficLog},
};

/// Shared, cloneable (via `Arc`) state handed to every Axum handler.
pub struct RouterState {
    config_lock: RwLock<Arc<Config>>,
    pub config_path: PathBuf,
    pub traffic: Arc<TrafficLog>,
    pub started_at: Instant,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub admin_token: Option<String>,
    /// Valid `[[clients]]` API keys, resolved from `key_env` at startup.
    /// Empty means client auth is disabled.
    pub client_keys: HashSet<String>,
    pub token_counter: Arc<dyn TokenCounter>,
}

impl RouterState {
    pub fn new(config: Arc<Config>, config_path: PathBuf, traffic: Arc<TrafficLog>) -> Self {
        let rate_limiter = config.bridge.rate_limit_rpm.map(|rpm| Arc::new(RateLimiter::new(rpm)));
        let admin_token = config.bridge.admin_token_env.as_deref().and_then(|var| std::env::var(var).ok());
        let client_keys = resolve_client_keys(&config);

        Self {
            config_lock: RwLock::new(config),
            config_path,
            traffic,
            started_at: Instant::now(),
            rate_limiter,
            admin_token,
            client_keys,
            token_counter: Arc::new(HeuristicCounter),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }

    /// Swap in a freshly loaded config. `client_keys` is resolved only at
    /// startup — rotating a `[[clients]]` key requires a process restart in
    /// this teacher's operational model.
    pub fn replace_config(&self, new: Arc<Config>) {
        *self.config_lock.write().expect("config lock poisoned") = new;
    }
}

fn resolve_client_keys(config: &Config) -> HashSet<String> {
    config
        .clients
        .iter()
        .filter_map(|c| {
            let key = std::env::var(&c.key_env).ok();
            if key.is_none() {
                warn!(key_env = %c.key_env, "configured client key_env is not set; this key will never authenticate");
            }
            key
        })
        .collect()
}

fn elapsed_ms(t0: Instant) -> u64 {
    t0.elapsed().as_millis() as u64
}

/// True when the resolved reasoning config asked that thinking output be
/// suppressed entirely (spec §4.5: `delta.reasoning`/`delta.thinking` is
/// "Suppressed entirely when `exclude=true`"; spec §4.4: `usage.thinking_tokens`
/// is omitted under the same condition).
fn exclude_thinking(resolution: &Resolution) -> bool {
    matches!(resolution.reasoning, Some(ReasoningConfig::OpenAiEffort { exclude: true, .. }))
}

fn upstream_client(config: &Config, backend_name: &str) -> Result<UpstreamClient, BridgeError> {
    let backend_cfg = config
        .backends
        .get(backend_name)
        .ok_or_else(|| BridgeError::Api(format!("backend `{backend_name}` is not configured")))?;
    UpstreamClient::new(backend_cfg, config.bridge.max_retries.unwrap_or(0), config.bridge.retry_delay_ms.unwrap_or(500))
        .map_err(|e| BridgeError::Api(e.to_string()))
}

/// Non-streaming `/v1/messages` orchestration (spec §4.4).
///
/// Records a [`TrafficEntry`] for both success and failure before returning.
pub async fn handle_messages(
    state: &RouterState,
    request: AnthropicRequest,
    cancellation: Cancellation,
) -> Result<AnthropicResponse, BridgeError> {
    let t0 = Instant::now();
    let requested_model = request.model.clone();
    let config = state.config();

    let resolution = match resolve(&config, &requested_model) {
        Some(r) => r,
        None => {
            let err = BridgeError::NotFound(requested_model.clone());
            let entry = TrafficEntry::new("unresolved".into(), "unresolved".into(), "unresolved".into(), elapsed_ms(t0), false)
                .with_requested_model(&requested_model)
                .with_error(err.kind());
            state.traffic.push(entry);
            return Err(err);
        }
    };

    let route = resolution.route_prefix.to_string();
    let backend = resolution.backend.to_string();
    let target_model = resolution.target_model.to_string();
    let reasoning_requested = resolution.reasoning.is_some();
    let overall_timeout = Duration::from_millis(config.bridge.overall_timeout_ms);

    let outcome = tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(BridgeError::Cancelled),
        result = tokio::time::timeout(overall_timeout, run_non_streaming(&config, &resolution, &request)) => {
            result.unwrap_or(Err(BridgeError::Timeout))
        }
    };

    let elapsed = elapsed_ms(t0);
    let mut entry = TrafficEntry::new(route, backend, target_model, elapsed, outcome.is_ok())
        .with_requested_model(&requested_model)
        .with_reasoning_requested(reasoning_requested);
    if let Err(ref err) = outcome {
        entry = entry.with_error(err.kind());
        if matches!(err, BridgeError::Cancelled) {
            entry = entry.mark_cancelled();
        }
    }
    state.traffic.push(entry);

    outcome
}

async fn run_non_streaming(
    config: &Config,
    resolution: &Resolution<'_>,
    request: &AnthropicRequest,
) -> Result<AnthropicResponse, BridgeError> {
    let openai_req = request::convert(request, resolution)?;
    let client = upstream_client(config, resolution.backend)?;
    let upstream = client.chat_completions(&openai_req).await?;
    Ok(response::convert(upstream, &request.model, exclude_thinking(resolution)))
}

/// Tracking state carried through the `stream::unfold` loop in
/// [`handle_messages_stream`].
struct StreamState {
    machine: StreamMachine,
    frames: std::pin::Pin<Box<dyn Stream<Item = Result<SseFrame, BridgeError>> + Send>>,
    cancellation: Cancellation,
    queue: std::collections::VecDeque<String>,
    traffic: Arc<TrafficLog>,
    entry: Option<TrafficEntry>,
    t0: Instant,
    recorded: bool,
    /// Per-chunk idle deadline (spec §4.6): reset on every frame received.
    idle_timeout: Duration,
    /// Whole-request budget, tracked from `t0`.
    overall_deadline: Instant,
}

/// Streaming `/v1/messages` orchestration (spec §4.5, §4.6).
///
/// Unlike [`handle_messages`], failures here never become an HTTP error
/// status: once the caller has committed to a `text/event-stream` response,
/// every failure — including route resolution failures — is rendered as SSE
/// frames inside the body (a single `error` event if `message_start` was
/// never sent, otherwise the ordinary terminal sequence).
pub async fn handle_messages_stream(
    state: Arc<RouterState>,
    request: AnthropicRequest,
    cancellation: Cancellation,
) -> impl Stream<Item = String> + Send + 'static {
    let t0 = Instant::now();
    let requested_model = request.model.clone();
    let message_id = format!("msg_{}", Uuid::new_v4().simple());
    let config = state.config();

    let setup = async {
        let resolution = resolve(&config, &requested_model).ok_or_else(|| BridgeError::NotFound(requested_model.clone()))?;
        let route = resolution.route_prefix.to_string();
        let backend = resolution.backend.to_string();
        let target_model = resolution.target_model.to_string();
        let reasoning_requested = resolution.reasoning.is_some();

        let openai_req = request::convert(&request, &resolution)?;
        let client = upstream_client(&config, resolution.backend)?;
        let frames = client.chat_completions_stream_events(&openai_req).await?;

        let machine = StreamMachine::new(
            message_id.clone(),
            requested_model.clone(),
            resolution.tool_arg_dialect,
            exclude_thinking(&resolution),
        );

        let entry = TrafficEntry::new(route, backend, target_model, 0, true)
            .with_requested_model(&requested_model)
            .with_reasoning_requested(reasoning_requested)
            .with_stream(true);

        Ok::<_, BridgeError>((machine, frames, entry))
    };

    match setup.await {
        Ok((machine, frames, entry)) => {
            let initial = StreamState {
                machine,
                frames,
                cancellation,
                queue: std::collections::VecDeque::new(),
                traffic: Arc::clone(&state.traffic),
                entry: Some(entry),
                t0,
                recorded: false,
                idle_timeout: Duration::from_millis(config.bridge.idle_timeout_ms),
                overall_deadline: t0 + Duration::from_millis(config.bridge.overall_timeout_ms),
            };
            stream::unfold(initial, drive_stream).left_stream()
        }
        Err(err) => {
            let entry = TrafficEntry::new("unresolved".into(), "unresolved".into(), "unresolved".into(), elapsed_ms(t0), false)
                .with_requested_model(&requested_model)
                .with_stream(true)
                .with_error(err.kind());
            state.traffic.push(entry);
            stream::once(async move { err.to_sse_event() }).right_stream()
        }
    }
}

async fn drive_stream(mut st: StreamState) -> Option<(String, StreamState)> {
    loop {
        if let Some(frame) = st.queue.pop_front() {
            return Some((frame, st));
        }

        if st.machine.is_finished() {
            finalize(&mut st, false, None);
            return None;
        }

        let now = Instant::now();
        if now >= st.overall_deadline {
            let events = st.machine.on_error(&BridgeError::Timeout);
            st.queue.extend(events.iter().map(|e| e.render()));
            finalize(&mut st, false, Some(BridgeError::Timeout.kind()));
            if st.queue.is_empty() {
                return None;
            }
            continue;
        }
        let wait = st.idle_timeout.min(st.overall_deadline - now);

        tokio::select! {
            biased;
            _ = st.cancellation.cancelled() => {
                let events = st.machine.on_cancel();
                st.queue.extend(events.iter().map(|e| e.render()));
                finalize(&mut st, true, None);
                if st.queue.is_empty() {
                    return None;
                }
                continue;
            }
            outcome = tokio::time::timeout(wait, st.frames.next()) => {
                let mut error_kind = None;
                let events = match outcome {
                    Ok(Some(Ok(SseFrame::Chunk(chunk)))) => st.machine.on_chunk(chunk),
                    Ok(Some(Ok(SseFrame::Done))) => st.machine.on_done(),
                    Ok(Some(Err(err))) => {
                        error_kind = Some(err.kind());
                        st.machine.on_error(&err)
                    }
                    Ok(None) if !st.machine.is_finished() => st.machine.on_done(),
                    Ok(None) => vec![],
                    Err(_elapsed) => {
                        error_kind = Some(BridgeError::Timeout.kind());
                        st.machine.on_error(&BridgeError::Timeout)
                    }
                };
                st.queue.extend(events.iter().map(|e| e.render()));
                if st.machine.is_finished() {
                    finalize(&mut st, false, error_kind);
                }
            }
        }
    }
}

fn finalize(st: &mut StreamState, cancelled: bool, error_kind: Option<&'static str>) {
    if st.recorded {
        return;
    }
    st.recorded = true;
    if let Some(mut entry) = st.entry.take() {
        entry.latency_ms = elapsed_ms(st.t0);
        if cancelled {
            entry = entry.mark_cancelled();
        }
        if let Some(kind) = error_kind {
            entry = entry.with_error(kind);
        }
        st.traffic.push(entry);
    }
}
