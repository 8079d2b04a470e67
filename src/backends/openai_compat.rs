//! The one upstream HTTP adapter: every backend speaks OpenAI
//! chat-completions, so there is no per-provider dispatch here — just a
//! buffered client (with the configured timeout) and a streaming client with
//! no `reqwest`-level request timeout, since the body arrives incrementally.
//! The idle-chunk deadline and the whole-request budget (`idle_timeout_ms`,
//! `overall_timeout_ms`) are enforced one layer up, in `router::drive_stream`
//! and `router::handle_messages`, since only the caller knows how much of the
//! budget earlier chunks already spent.
//!
//! Retries a transient upstream failure up to `max_retries` times with
//! doubling backoff (capped at 2s), but only before any response byte has
//! reached the client (spec §7's propagation policy) — which this adapter
//! satisfies simply by retrying only the connect-and-headers phase; nothing
//! is forwarded downstream until this returns.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::{header, Client};
use tracing::warn;

use crate::config::BackendConfig;
use crate::core::error_map::BridgeError;
use crate::core::model::{OpenAiChunk, OpenAiRequest, OpenAiResponse};

use super::SseStream;

/// One decoded frame from an upstream `text/event-stream` body.
pub enum SseFrame {
    Chunk(OpenAiChunk),
    Done,
}

pub struct UpstreamClient {
    client: Client,
    stream_client: Client,
    base_url: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl UpstreamClient {
    pub fn new(cfg: &BackendConfig, max_retries: u32, retry_delay_ms: u64) -> anyhow::Result<Self> {
        let base_url = cfg.base_url.trim_end_matches('/').to_string();

        let mut headers = header::HeaderMap::new();
        if let Some(key) = cfg.api_key() {
            let value = format!("Bearer {key}");
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&value)
                    .expect("API key contains invalid Authorization header characters"),
            );
        }

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        let stream_client = Client::builder().default_headers(headers).build()?;

        Ok(Self { client, stream_client, base_url, max_retries, retry_delay_ms: retry_delay_ms.max(1) })
    }

    /// `POST /v1/chat/completions`, parsed into a typed response.
    pub async fn chat_completions(&self, request: &OpenAiRequest) -> Result<OpenAiResponse, BridgeError> {
        self.with_retries(|| async {
            let url = format!("{}/v1/chat/completions", self.base_url);
            let response = self.client.post(&url).json(request).send().await.map_err(map_transport_error)?;
            let status = response.status();
            let text = response.text().await.map_err(map_transport_error)?;

            if !status.is_success() {
                return Err(BridgeError::from_upstream_status(status, &text));
            }

            serde_json::from_str(&text)
                .map_err(|e| BridgeError::Api(format!("malformed upstream response: {e}")))
        })
        .await
    }

    /// `POST /v1/chat/completions` with `stream: true`, returning the raw SSE
    /// byte stream for the caller to drive through `core::stream`.
    pub async fn chat_completions_stream(&self, request: &OpenAiRequest) -> Result<SseStream, BridgeError> {
        self.with_retries(|| async {
            let url = format!("{}/v1/chat/completions", self.base_url);
            let response =
                self.stream_client.post(&url).json(request).send().await.map_err(map_transport_error)?;
            let status = response.status();

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BridgeError::from_upstream_status(status, &body));
            }

            let stream = futures_util::StreamExt::map(response.bytes_stream(), |chunk| {
                chunk.map_err(|e| BridgeError::Api(e.to_string()))
            });
            Ok(Box::pin(stream) as SseStream)
        })
        .await
    }

    /// Like [`Self::chat_completions_stream`], but decodes the upstream SSE
    /// framing (`data: {...}\n\n` / `data: [DONE]\n\n`) into typed
    /// [`SseFrame`]s, ready for [`crate::core::stream::StreamMachine`].
    pub async fn chat_completions_stream_events(
        &self,
        request: &OpenAiRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<SseFrame, BridgeError>> + Send>>, BridgeError> {
        let bytes_stream = self.chat_completions_stream(request).await?;
        Ok(Box::pin(decode_sse(bytes_stream)))
    }

    /// Probe the backend with `GET /v1/models`.
    pub async fn health_check(&self) -> Result<(), BridgeError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::from_upstream_status(status, &body));
        }
        Ok(())
    }

    async fn with_retries<T, F, Fut>(&self, mut attempt: F) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let mut delay_ms = self.retry_delay_ms;
        let mut last_err = None;

        for attempt_no in 0..=self.max_retries {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt_no < self.max_retries && is_retryable(&err) => {
                    warn!(attempt = attempt_no, delay_ms, error = %err, "retrying upstream call");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(2_000);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.expect("loop always runs at least once"))
    }
}

struct DecodeState {
    inner: SseStream,
    buf: Vec<u8>,
    queue: VecDeque<SseFrame>,
}

/// Buffers raw upstream bytes and yields one [`SseFrame`] per complete
/// `\n\n`-terminated SSE frame. The byte buffer (not a `String`) is what's
/// searched for the frame boundary, so a multi-byte UTF-8 character split
/// across two upstream reads is never decoded until the back half arrives.
fn decode_sse(inner: SseStream) -> impl Stream<Item = Result<SseFrame, BridgeError>> + Send {
    futures_util::stream::unfold(
        DecodeState { inner, buf: Vec::new(), queue: VecDeque::new() },
        |mut state| async move {
            loop {
                if let Some(frame) = state.queue.pop_front() {
                    return Some((Ok(frame), state));
                }

                match state.inner.next().await {
                    Some(Ok(bytes)) => {
                        state.buf.extend_from_slice(&bytes);
                        while let Some(pos) = find_double_newline(&state.buf) {
                            let frame_bytes: Vec<u8> = state.buf.drain(..pos + 2).collect();
                            let frame_text = String::from_utf8_lossy(&frame_bytes);
                            if let Some(frame) = parse_sse_frame(&frame_text) {
                                state.queue.push_back(frame);
                            }
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => return None,
                }
            }
        },
    )
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_sse_frame(frame_text: &str) -> Option<SseFrame> {
    for line in frame_text.lines() {
        let Some(data) = line.strip_prefix("data:") else { continue };
        let data = data.trim();
        if data == "[DONE]" {
            return Some(SseFrame::Done);
        }
        if data.is_empty() {
            continue;
        }
        return match serde_json::from_str::<OpenAiChunk>(data) {
            Ok(chunk) => Some(SseFrame::Chunk(chunk)),
            Err(e) => {
                warn!(error = %e, "dropping malformed upstream SSE chunk");
                None
            }
        };
    }
    None
}

fn is_retryable(err: &BridgeError) -> bool {
    matches!(err, BridgeError::Overloaded | BridgeError::Timeout)
}

fn map_transport_error(err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout
    } else if err.is_connect() {
        BridgeError::Overloaded
    } else {
        BridgeError::Api(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::OpenAiMessage;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg_for(server: &MockServer) -> BackendConfig {
        BackendConfig { base_url: server.uri(), api_key_env: None, timeout_ms: 5_000 }
    }

    fn sample_request() -> OpenAiRequest {
        OpenAiRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![OpenAiMessage {
                role: "user".into(),
                content: Some(crate::core::model::OpenAiMessageContent::Text("hi".into())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            }],
            max_tokens: Some(16),
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: vec![],
            stream: false,
            tools: vec![],
            tool_choice: None,
            extra_body: None,
        }
    }

    #[tokio::test]
    async fn chat_completions_returns_parsed_response_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{ "index": 0, "message": { "content": "hi there" }, "finish_reason": "stop" }],
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&cfg_for(&server), 0, 10).unwrap();
        let response = client.chat_completions(&sample_request()).await.unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn chat_completions_maps_429_to_rate_limit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&cfg_for(&server), 0, 10).unwrap();
        let err = client.chat_completions(&sample_request()).await.unwrap_err();
        assert_eq!(err.kind(), "rate_limit_error");
    }

    #[tokio::test]
    async fn transient_503_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-2",
                "choices": [{ "index": 0, "message": { "content": "recovered" }, "finish_reason": "stop" }],
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&cfg_for(&server), 2, 1).unwrap();
        let response = client.chat_completions(&sample_request()).await.unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn health_check_errors_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&cfg_for(&server), 0, 10).unwrap();
        let err = client.health_check().await.unwrap_err();
        assert_eq!(err.kind(), "overloaded_error");
    }

    #[tokio::test]
    async fn stream_events_decodes_sse_frames_and_done_sentinel() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&cfg_for(&server), 0, 10).unwrap();
        let mut events = client.chat_completions_stream_events(&sample_request()).await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert!(matches!(first, SseFrame::Chunk(c) if c.choices[0].delta.content.as_deref() == Some("hi")));

        let second = events.next().await.unwrap().unwrap();
        assert!(matches!(second, SseFrame::Done));

        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_events_splits_a_frame_spanning_two_byte_chunks() {
        // Simulate the upstream splitting one SSE frame across two TCP segments
        // by just feeding decode_sse two separately-yielded chunks directly.
        use bytes::Bytes;

        let chunks: Vec<Result<Bytes, BridgeError>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"index\":0,\"delta\":")),
            Ok(Bytes::from_static(b"{\"content\":\"hi\"}}]}\n\n")),
        ];
        let inner: super::super::SseStream = Box::pin(futures_util::stream::iter(chunks));
        let mut events = Box::pin(super::decode_sse(inner));

        let first = events.next().await.unwrap().unwrap();
        assert!(matches!(first, SseFrame::Chunk(c) if c.choices[0].delta.content.as_deref() == Some("hi")));
        assert!(events.next().await.is_none());
    }
}
