//! Configuration types for the bridge.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults.
//!
//! # Example
//! ```toml
//! [bridge]
//! client_port = 8080
//!
//! [backends.openai]
//! base_url = "https://api.openai.com"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [[routes]]
//! prefix  = "claude-3-5-sonnet"
//! backend = "openai"
//! target_model = "gpt-4o"
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::model::{Effort, ReasoningConfig};

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bridge: BridgeConfig,

    /// Named upstream backends.
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    /// Model-prefix → backend/target-model route table. This is the
    /// configuration-driven `ModelRouter` collaborator.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Per-client API key → nothing beyond "is this a valid key" — the bridge
    /// has no per-client profile concept, unlike routing-tier gateways.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for route in &self.routes {
            anyhow::ensure!(
                self.backends.contains_key(&route.backend),
                "route `{}` references unknown backend `{}`",
                route.prefix,
                route.backend
            );
            if let Some(dialect) = &route.tool_arg_dialect {
                anyhow::ensure!(
                    !dialect.is_empty(),
                    "route `{}` declares an empty tool_arg_dialect table — omit it instead",
                    route.prefix
                );
            }
        }

        anyhow::ensure!(
            self.bridge.client_port != self.bridge.admin_port,
            "client_port and admin_port must differ"
        );

        Ok(())
    }

    /// Resolve a base model name (suffix already stripped by `core::suffix`)
    /// to its route, matching on the longest configured prefix.
    pub fn resolve_route(&self, base_model: &str) -> Option<&RouteConfig> {
        self.routes
            .iter()
            .filter(|r| base_model.starts_with(r.prefix.as_str()))
            .max_by_key(|r| r.prefix.len())
    }
}

/// Core bridge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Port for the Anthropic-facing client API (default: 8080).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Port for the admin API (default: 8081).
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Number of recent requests to keep in the in-memory traffic log.
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    /// Log level override (also controlled by `RUST_LOG`).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Maximum requests per minute per client IP. Unset disables rate limiting.
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,

    /// Env var holding the admin API bearer token. Unset disables admin auth.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Retries for a transient upstream failure, only before the first
    /// response byte has been forwarded (spec §7). 0 disables retries.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Initial retry delay in milliseconds, doubled per attempt, capped at 2000ms.
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    /// Overall per-request time budget in milliseconds.
    #[serde(default = "defaults::overall_timeout_ms")]
    pub overall_timeout_ms: u64,

    /// Per-chunk idle deadline while streaming, in milliseconds.
    #[serde(default = "defaults::idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// A named upstream backend. The bridge only ever speaks the OpenAI
/// chat-completions dialect to upstreams (including Ollama's OpenAI-compat
/// endpoint) — see `backends::openai_compat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL, without a trailing `/v1`.
    pub base_url: String,

    /// Env var holding the API key. Unset for keyless local backends.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request timeout in milliseconds (default: 30 000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

impl BackendConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

/// Maps a requested-model prefix to a backend + target model + reasoning
/// defaults + optional tool-argument dialect rewrite table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Matched against the client-requested base model with `starts_with`;
    /// the longest matching prefix wins.
    pub prefix: String,
    pub backend: String,
    pub target_model: String,

    #[serde(default)]
    pub reasoning_default: Option<ReasoningDefault>,

    /// Known-tool-name → upstream-dialect-argument-key rewrite table, e.g.
    /// `{"Bash" = {"command" = "prompt"}}` (spec §4.3 step 7 / §4.5).
    #[serde(default)]
    pub tool_arg_dialect: Option<HashMap<String, HashMap<String, String>>>,
}

/// TOML-friendly mirror of [`ReasoningConfig`] for the route table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReasoningDefault {
    OpenaiEffort {
        effort: EffortToml,
        #[serde(default)]
        exclude: bool,
    },
    AnthropicThinking {
        budget: u32,
    },
    GeminiThinking {
        budget: u32,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortToml {
    Low,
    Medium,
    High,
}

impl From<&ReasoningDefault> for ReasoningConfig {
    fn from(value: &ReasoningDefault) -> Self {
        match value {
            ReasoningDefault::OpenaiEffort { effort, exclude } => ReasoningConfig::OpenAiEffort {
                effort: match effort {
                    EffortToml::Low => Effort::Low,
                    EffortToml::Medium => Effort::Medium,
                    EffortToml::High => Effort::High,
                },
                exclude: *exclude,
            },
            ReasoningDefault::AnthropicThinking { budget } => {
                ReasoningConfig::AnthropicThinking { budget: *budget }
            }
            ReasoningDefault::GeminiThinking { budget } => {
                ReasoningConfig::GeminiThinking { budget: *budget }
            }
        }
    }
}

/// A per-client API key binding. The key's value lives in the environment,
/// never in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub key_env: String,
}

mod defaults {
    pub fn client_port() -> u16 {
        8080
    }
    pub fn admin_port() -> u16 {
        8081
    }
    pub fn traffic_log_capacity() -> usize {
        500
    }
    pub fn timeout_ms() -> u64 {
        30_000
    }
    pub fn overall_timeout_ms() -> u64 {
        120_000
    }
    pub fn idle_timeout_ms() -> u64 {
        30_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [bridge]
            client_port = 8080
            admin_port = 8081

            [backends.openai]
            base_url = "https://api.openai.com"

            [[routes]]
            prefix = "claude-3-5-sonnet"
            backend = "openai"
            target_model = "gpt-4o"

            [[routes]]
            prefix = "claude"
            backend = "openai"
            target_model = "gpt-4o-mini"
            "#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn validation_rejects_route_with_unknown_backend() {
        let mut config = minimal_config();
        config.routes.push(RouteConfig {
            prefix: "bad".into(),
            backend: "nonexistent".into(),
            target_model: "x".into(),
            reasoning_default: None,
            tool_arg_dialect: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_equal_ports() {
        let mut config = minimal_config();
        config.bridge.admin_port = config.bridge.client_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_route_picks_longest_matching_prefix() {
        let config = minimal_config();
        let route = config.resolve_route("claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(route.target_model, "gpt-4o");
    }

    #[test]
    fn resolve_route_falls_back_to_shorter_prefix() {
        let config = minimal_config();
        let route = config.resolve_route("claude-3-opus-unusual").unwrap();
        assert_eq!(route.target_model, "gpt-4o-mini");
    }

    #[test]
    fn resolve_route_returns_none_for_unmatched_model() {
        let config = minimal_config();
        assert!(config.resolve_route("llama-3-70b").is_none());
    }

    #[test]
    fn bridge_defaults_are_applied() {
        let config: Config = toml::from_str(
            r#"
            [bridge]
            [backends.x]
            base_url = "http://x"
            "#,
        )
        .expect("should parse");
        assert_eq!(config.bridge.client_port, 8080);
        assert_eq!(config.bridge.admin_port, 8081);
        assert_eq!(config.bridge.traffic_log_capacity, 500);
        assert_eq!(config.bridge.overall_timeout_ms, 120_000);
    }
}
