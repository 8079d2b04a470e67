//! Upstream HTTP adapter.
//!
//! Every backend this bridge talks to speaks the OpenAI chat-completions
//! dialect — including Ollama's own OpenAI-compat endpoint — so there is a
//! single adapter rather than the provider-dispatch enum a multi-protocol
//! gateway would need.

mod openai_compat;

pub use openai_compat::UpstreamClient;

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::core::error_map::BridgeError;

/// A `Send`-able, heap-allocated SSE byte stream from the upstream backend.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<Bytes, BridgeError>> + Send>>;
