//! Reasoning/thinking parameter validation (spec §4.2).
//!
//! Determines a model's reasoning family from its base name, reconciles the
//! parsed suffix (if any) with the route's configured default, and clamps the
//! result into the family's accepted range. Clamping is always logged with
//! both the original and final value.

use tracing::warn;

use super::model::{Effort, ReasoningConfig};
use super::suffix::{EffortWord, Suffix};

/// Reference ceiling used only to classify an OpenAI-family integer suffix
/// into low/medium/high — see DESIGN.md's Open Question decision.
const OPENAI_EFFORT_REFERENCE_MAX: u32 = 100_000;

const ANTHROPIC_BUDGET_MIN: u32 = 1024;
const ANTHROPIC_BUDGET_MAX: u32 = 32_000;
const GEMINI_BUDGET_MIN: u32 = 0;
const GEMINI_BUDGET_MAX: u32 = 24_576;

const ANCHOR_LOW: u32 = 2048;
const ANCHOR_MEDIUM: u32 = 8096;
const ANCHOR_HIGH: u32 = 24_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    OpenAiReasoning,
    AnthropicThinking,
    GeminiThinking,
    None,
}

/// Classify a base model name (suffix already stripped) into a reasoning family.
pub fn classify(base_model: &str) -> ModelFamily {
    if base_model.starts_with("o1")
        || base_model.starts_with("o3")
        || base_model.starts_with("o4-mini")
        || base_model.starts_with("gpt-5")
    {
        ModelFamily::OpenAiReasoning
    } else if base_model.starts_with("claude-3-7")
        || base_model.starts_with("claude-4")
        || base_model.starts_with("claude-opus-4")
        || base_model.starts_with("claude-sonnet-4")
    {
        ModelFamily::AnthropicThinking
    } else if base_model.starts_with("gemini-2.5-flash") || base_model.starts_with("gemini-3") {
        ModelFamily::GeminiThinking
    } else {
        ModelFamily::None
    }
}

/// Resolve the final [`ReasoningConfig`] for a request.
///
/// `suffix` takes precedence over `route_default` when both are present.
/// Returns `None` when the model family doesn't support reasoning, or when
/// neither a suffix nor a route default supplies one.
pub fn resolve(
    base_model: &str,
    suffix: Option<&Suffix>,
    route_default: Option<&ReasoningConfig>,
) -> Option<ReasoningConfig> {
    let family = classify(base_model);

    if family == ModelFamily::None {
        if let Some(Suffix::Unknown(s)) = suffix {
            warn!(model = base_model, suffix = %s, "unrecognized reasoning suffix — dropping");
        } else if suffix.is_some() {
            warn!(model = base_model, "reasoning suffix supplied for a non-reasoning model — dropping");
        }
        return None;
    }

    if let Some(Suffix::Unknown(s)) = suffix {
        warn!(model = base_model, suffix = %s, "unrecognized reasoning suffix — falling back to route default");
        return route_default.cloned().map(|c| clamp(family, c));
    }

    let from_suffix = suffix.and_then(|s| from_suffix(family, s));
    let chosen = from_suffix.or_else(|| route_default.cloned());
    chosen.map(|c| clamp(family, c))
}

fn from_suffix(family: ModelFamily, suffix: &Suffix) -> Option<ReasoningConfig> {
    match (family, suffix) {
        (ModelFamily::OpenAiReasoning, Suffix::Effort(e)) => Some(ReasoningConfig::OpenAiEffort {
            effort: to_effort(*e),
            exclude: false,
        }),
        (ModelFamily::OpenAiReasoning, Suffix::Budget(n)) => {
            Some(ReasoningConfig::OpenAiEffort { effort: effort_from_budget(*n), exclude: false })
        }
        (ModelFamily::AnthropicThinking, Suffix::Budget(n)) => {
            Some(ReasoningConfig::AnthropicThinking { budget: *n })
        }
        (ModelFamily::AnthropicThinking, Suffix::Effort(e)) => {
            Some(ReasoningConfig::AnthropicThinking { budget: anchor(*e) })
        }
        (ModelFamily::GeminiThinking, Suffix::Budget(n)) => {
            Some(ReasoningConfig::GeminiThinking { budget: *n })
        }
        (ModelFamily::GeminiThinking, Suffix::Effort(e)) => {
            Some(ReasoningConfig::GeminiThinking { budget: anchor(*e) })
        }
        (ModelFamily::None, _) => None,
        (_, Suffix::Unknown(_)) => None,
    }
}

fn to_effort(word: EffortWord) -> Effort {
    match word {
        EffortWord::Low => Effort::Low,
        EffortWord::Medium => Effort::Medium,
        EffortWord::High => Effort::High,
    }
}

fn anchor(word: EffortWord) -> u32 {
    match word {
        EffortWord::Low => ANCHOR_LOW,
        EffortWord::Medium => ANCHOR_MEDIUM,
        EffortWord::High => ANCHOR_HIGH,
    }
}

fn effort_from_budget(budget: u32) -> Effort {
    let pct = budget as f64 / OPENAI_EFFORT_REFERENCE_MAX as f64;
    if pct <= 0.25 {
        Effort::Low
    } else if pct <= 0.60 {
        Effort::Medium
    } else {
        Effort::High
    }
}

/// Clamp a resolved config into its family's accepted range, logging any change.
fn clamp(family: ModelFamily, config: ReasoningConfig) -> ReasoningConfig {
    match (family, config) {
        (ModelFamily::AnthropicThinking, ReasoningConfig::AnthropicThinking { budget }) => {
            let clamped = budget.clamp(ANTHROPIC_BUDGET_MIN, ANTHROPIC_BUDGET_MAX);
            if clamped != budget {
                warn!(original = budget, clamped, "anthropic thinking budget clamped");
            }
            ReasoningConfig::AnthropicThinking { budget: clamped }
        }
        (ModelFamily::GeminiThinking, ReasoningConfig::GeminiThinking { budget }) => {
            let clamped = budget.clamp(GEMINI_BUDGET_MIN, GEMINI_BUDGET_MAX);
            if clamped != budget {
                warn!(original = budget, clamped, "gemini thinking budget clamped");
            }
            ReasoningConfig::GeminiThinking { budget: clamped }
        }
        (_, other) => other,
    }
}

/// Whether this family places the request's token ceiling under
/// `max_completion_tokens` instead of `max_tokens` (spec §4.3 step 5).
pub fn uses_max_completion_tokens(family: ModelFamily) -> bool {
    family == ModelFamily::OpenAiReasoning
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_families() {
        assert_eq!(classify("o4-mini"), ModelFamily::OpenAiReasoning);
        assert_eq!(classify("gpt-5"), ModelFamily::OpenAiReasoning);
        assert_eq!(classify("claude-opus-4-20250522"), ModelFamily::AnthropicThinking);
        assert_eq!(classify("claude-3-7-sonnet"), ModelFamily::AnthropicThinking);
        assert_eq!(classify("gemini-2.5-flash"), ModelFamily::GeminiThinking);
        assert_eq!(classify("llama-3-70b"), ModelFamily::None);
    }

    #[test]
    fn anthropic_budget_clamps_below_minimum() {
        let resolved = resolve("claude-opus-4-x", Some(&Suffix::Budget(0)), None);
        assert_eq!(resolved, Some(ReasoningConfig::AnthropicThinking { budget: 1024 }));
    }

    #[test]
    fn gemini_budget_clamps_negative_equivalent_to_zero() {
        // Suffix parsing never yields negative, but a route default might; simulate via clamp directly.
        let resolved = clamp(ModelFamily::GeminiThinking, ReasoningConfig::GeminiThinking { budget: 0 });
        assert_eq!(resolved, ReasoningConfig::GeminiThinking { budget: 0 });
    }

    #[test]
    fn unknown_suffix_on_reasoning_model_falls_back_to_default() {
        let default = ReasoningConfig::AnthropicThinking { budget: 4096 };
        let resolved = resolve(
            "claude-opus-4-x",
            Some(&Suffix::Unknown("banana".into())),
            Some(&default),
        );
        assert_eq!(resolved, Some(ReasoningConfig::AnthropicThinking { budget: 4096 }));
    }

    #[test]
    fn non_reasoning_model_drops_any_suffix() {
        let resolved = resolve("llama-3-70b", Some(&Suffix::Budget(4096)), None);
        assert_eq!(resolved, None);
    }

    #[test]
    fn suffix_overrides_route_default() {
        let default = ReasoningConfig::AnthropicThinking { budget: 4096 };
        let resolved = resolve(
            "claude-opus-4-x",
            Some(&Suffix::Budget(16_000)),
            Some(&default),
        );
        assert_eq!(resolved, Some(ReasoningConfig::AnthropicThinking { budget: 16_000 }));
    }

    #[test]
    fn openai_effort_keyword_maps_directly() {
        let resolved = resolve("o4-mini", Some(&Suffix::Effort(EffortWord::High)), None);
        assert_eq!(
            resolved,
            Some(ReasoningConfig::OpenAiEffort { effort: Effort::High, exclude: false })
        );
    }

    #[test]
    fn validate_is_idempotent() {
        let once = resolve("claude-opus-4-x", Some(&Suffix::Budget(500)), None);
        let ReasoningConfig::AnthropicThinking { budget } = once.clone().unwrap() else {
            panic!("expected anthropic variant")
        };
        let twice = clamp(ModelFamily::AnthropicThinking, ReasoningConfig::AnthropicThinking { budget });
        assert_eq!(once.unwrap(), twice);
    }
}
