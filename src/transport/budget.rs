use std::sync::LazyLock;

use regex_lite::Regex;

use crate::config::GenerationConfig;
use crate::protocol::workers_ai::ErrorEnvelope;

pub(crate) const OVER_BUDGET_ERROR_CODE: i64 = 5021;
pub(crate) const FALLBACK_TOKEN_REDUCTION: u32 = 32;

static PARENTHESIZED_INT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((\d+)\)").ok());

/// Recovery policy for the "requested tokens exceed the context window" error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetPolicy {
    pub error_code: i64,
    pub fallback_reduction: u32,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            error_code: OVER_BUDGET_ERROR_CODE,
            fallback_reduction: FALLBACK_TOKEN_REDUCTION,
        }
    }
}

impl From<&GenerationConfig> for BudgetPolicy {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            error_code: config.over_budget_error_code,
            fallback_reduction: config.fallback_token_reduction,
        }
    }
}

impl BudgetPolicy {
    #[inline]
    #[must_use]
    pub fn is_over_budget(&self, envelope: &ErrorEnvelope) -> bool {
        envelope.first_code() == Some(self.error_code)
    }

    /// Compute the reduced `max_tokens` for the single retry.
    ///
    /// The message carries `(<estimated input + requested max>)` followed by
    /// `(<model context limit>)`. The ceiling shrinks by the overage; when
    /// the numbers cannot be found it shrinks by `fallback_reduction`. The
    /// result is never below 1.
    #[must_use]
    pub fn adjusted_ceiling(&self, original: u32, message: &str) -> u32 {
        let numbers = parenthesized_numbers(message);
        let reduction = match numbers.as_slice() {
            [requested, limit, ..] => requested.saturating_sub(*limit),
            _ => {
                tracing::warn!(
                    error_message = message,
                    fallback = self.fallback_reduction,
                    "could not read token counts from over-budget error, using fallback reduction"
                );
                u64::from(self.fallback_reduction)
            }
        };
        let adjusted = u64::from(original).saturating_sub(reduction).max(1);
        u32::try_from(adjusted).unwrap_or(original)
    }
}

/// Every `(<digits>)` group in order; groups that overflow `u64` are skipped.
#[must_use]
pub fn parenthesized_numbers(message: &str) -> Vec<u64> {
    let Some(pattern) = PARENTHESIZED_INT.as_ref() else {
        return Vec::new();
    };
    pattern
        .captures_iter(message)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::workers_ai::parse_error_envelope;

    const MESSAGE: &str = "AiError: Bad input: Requested tokens (4104) exceed context window of (4096)";

    #[test]
    fn test_overage_reduces_ceiling() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.adjusted_ceiling(4096, MESSAGE), 4088);
    }

    #[test]
    fn test_no_overage_keeps_ceiling() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.adjusted_ceiling(4096, "(4000) (4096)"), 4096);
    }

    #[test]
    fn test_fallback_when_numbers_missing() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.adjusted_ceiling(4096, "context exceeded"), 4064);
        assert_eq!(policy.adjusted_ceiling(4096, "only (9000)"), 4064);
    }

    #[test]
    fn test_ceiling_never_below_one() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.adjusted_ceiling(10, "(99999) (4096)"), 1);
        assert_eq!(policy.adjusted_ceiling(16, "nothing"), 1);
    }

    #[test]
    fn test_extra_numbers_use_first_two() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.adjusted_ceiling(4096, "(5000) (4096) (12)"), 4096 - 904);
    }

    #[test]
    fn test_parenthesized_numbers_ignores_non_digits() {
        assert_eq!(parenthesized_numbers("a (12) (x) (3.5) (7)"), vec![12, 7]);
    }

    #[test]
    fn test_is_over_budget_matches_configured_code() {
        let policy = BudgetPolicy {
            error_code: 7000,
            fallback_reduction: 8,
        };
        let envelope = parse_error_envelope(r#"{"errors":[{"code":7000,"message":"x"}]}"#);
        assert!(policy.is_over_budget(&envelope));
        assert!(!BudgetPolicy::default().is_over_budget(&envelope));
    }

    #[test]
    fn test_loosely_typed_envelope_still_recovers() {
        let policy = BudgetPolicy::default();
        let raw = r#"{"errors":[{"code":"5021","message":["(4104)","(4096)"]}]}"#;
        let envelope = parse_error_envelope(raw);
        assert!(policy.is_over_budget(&envelope));
        assert_eq!(
            policy.adjusted_ceiling(4096, &envelope.first_message(raw)),
            4088
        );
    }
}
