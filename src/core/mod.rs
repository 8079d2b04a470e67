//! The protocol translation core: wire types, routing, and the
//! Anthropic ↔ OpenAI converters (spec §4).

pub mod cancellation;
pub mod error_map;
pub mod model;
pub mod reasoning;
pub mod request;
pub mod response;
pub mod router;
pub mod stream;
pub mod suffix;
pub mod token_counter;
