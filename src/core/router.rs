//! The concrete `ModelRouter` collaborator (spec §6.1): resolves a requested
//! model string to a target backend, target model name, reasoning defaults,
//! and tool-argument dialect table, by combining `core::suffix`,
//! `core::reasoning`, and the configured route table.

use std::collections::HashMap;

use crate::config::{Config, RouteConfig};

use super::model::ReasoningConfig;
use super::reasoning::{self, ModelFamily};
use super::suffix;

/// The outcome of routing a single requested model string.
pub struct Resolution<'a> {
    pub route_prefix: &'a str,
    pub backend: &'a str,
    pub target_model: &'a str,
    pub reasoning: Option<ReasoningConfig>,
    pub family: ModelFamily,
    pub tool_arg_dialect: Option<&'a HashMap<String, HashMap<String, String>>>,
}

/// Resolve `requested_model` (as sent by the client, suffix and all) against
/// `config`'s route table.
///
/// Returns `None` when no route prefix matches — the caller maps this to
/// `BridgeError::NotFound`.
pub fn resolve<'a>(config: &'a Config, requested_model: &str) -> Option<Resolution<'a>> {
    let (base_model, parsed_suffix) = suffix::parse(requested_model);
    let route: &'a RouteConfig = config.resolve_route(base_model)?;

    let route_default: Option<ReasoningConfig> = route.reasoning_default.as_ref().map(Into::into);
    let reasoning = reasoning::resolve(base_model, parsed_suffix.as_ref(), route_default.as_ref());
    let family = reasoning::classify(base_model);

    Some(Resolution {
        route_prefix: route.prefix.as_str(),
        backend: route.backend.as_str(),
        target_model: route.target_model.as_str(),
        reasoning,
        family,
        tool_arg_dialect: route.tool_arg_dialect.as_ref(),
    })
}
