//! Model name suffix parsing (spec §4.1).
//!
//! `claude-opus-4:high` → base `claude-opus-4`, suffix `Effort(High)`.
//! `gpt-5:32k` → base `gpt-5`, suffix `Budget(32768)`.
//! `o4-mini:12000` → base `o4-mini`, suffix `Budget(12000)`.
//! Never fails — an unrecognized suffix comes back as `Suffix::Unknown` so the
//! caller can log and drop it rather than rejecting the whole request.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suffix {
    Effort(EffortWord),
    Budget(u32),
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffortWord {
    Low,
    Medium,
    High,
}

/// Split `model_string` into `(base_model, suffix)`.
///
/// Splits at the *last* `:` — model names themselves never contain a colon
/// in this bridge's supported families, so this is unambiguous.
pub fn parse(model_string: &str) -> (&str, Option<Suffix>) {
    let Some((base, raw_suffix)) = model_string.rsplit_once(':') else {
        return (model_string, None);
    };

    if raw_suffix.is_empty() {
        return (model_string, None);
    }

    let suffix = match raw_suffix {
        "low" => Suffix::Effort(EffortWord::Low),
        "medium" => Suffix::Effort(EffortWord::Medium),
        "high" => Suffix::Effort(EffortWord::High),
        s if s.ends_with('k') && s[..s.len() - 1].chars().all(|c| c.is_ascii_digit()) && !s[..s.len() - 1].is_empty() => {
            match s[..s.len() - 1].parse::<u32>() {
                Ok(n) => Suffix::Budget(n.saturating_mul(1024)),
                Err(_) => Suffix::Unknown(raw_suffix.to_string()),
            }
        }
        s if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => match s.parse::<u32>() {
            Ok(n) => Suffix::Budget(n),
            Err(_) => Suffix::Unknown(raw_suffix.to_string()),
        },
        other => Suffix::Unknown(other.to_string()),
    };

    (base, Some(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_suffix_passes_through() {
        let (base, suffix) = parse("claude-opus-4");
        assert_eq!(base, "claude-opus-4");
        assert!(suffix.is_none());
    }

    #[test]
    fn effort_keywords_parse() {
        assert_eq!(parse("o4-mini:low").1, Some(Suffix::Effort(EffortWord::Low)));
        assert_eq!(parse("o4-mini:medium").1, Some(Suffix::Effort(EffortWord::Medium)));
        assert_eq!(parse("o4-mini:high").1, Some(Suffix::Effort(EffortWord::High)));
    }

    #[test]
    fn k_notation_multiplies_by_1024() {
        let (base, suffix) = parse("claude-opus-4:32k");
        assert_eq!(base, "claude-opus-4");
        assert_eq!(suffix, Some(Suffix::Budget(32 * 1024)));
    }

    #[test]
    fn raw_integer_passes_through_unscaled() {
        let (_, suffix) = parse("gemini-2.5-flash:12000");
        assert_eq!(suffix, Some(Suffix::Budget(12000)));
    }

    #[test]
    fn unknown_suffix_is_preserved_not_dropped() {
        let (base, suffix) = parse("claude-3-opus:banana");
        assert_eq!(base, "claude-3-opus");
        assert_eq!(suffix, Some(Suffix::Unknown("banana".to_string())));
    }

    #[test]
    fn trailing_colon_with_empty_suffix_is_treated_as_no_suffix() {
        let (base, suffix) = parse("claude-opus-4:");
        assert_eq!(base, "claude-opus-4:");
        assert!(suffix.is_none());
    }

    #[test]
    fn parse_is_idempotent_over_format_roundtrip() {
        for (suffix, expected_str) in [
            (Suffix::Effort(EffortWord::Low), "low"),
            (Suffix::Effort(EffortWord::Medium), "medium"),
            (Suffix::Effort(EffortWord::High), "high"),
        ] {
            let model = format!("base-model:{expected_str}");
            let (base, parsed) = parse(&model);
            assert_eq!(base, "base-model");
            assert_eq!(parsed, Some(suffix));
        }

        let (base, parsed) = parse("base-model:4k");
        assert_eq!(base, "base-model");
        assert_eq!(parsed, Some(Suffix::Budget(4096)));

        let (base, parsed) = parse("base-model:500");
        assert_eq!(base, "base-model");
        assert_eq!(parsed, Some(Suffix::Budget(500)));
    }
}
