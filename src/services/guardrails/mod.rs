// ============================================
// Guardrail Validator
// ============================================
//
// Pure, side-effect-free validation enforced on all output before it reaches
// a caller. Every scoring path routes scores, uncertainties, and explanation
// text through these functions.

use crate::config::GuardrailConfig;
use crate::error::{EngineError, Result};
use crate::models::{AttentionScore, FeedbackType, InvestorCriteria};

/// Reject non-finite scores, clamp the rest into [0, 100].
pub fn validate_score(score: f32) -> Result<f32> {
    if !score.is_finite() {
        return Err(EngineError::InvalidScore(format!(
            "non-finite score: {score}"
        )));
    }
    Ok(score.clamp(0.0, 100.0))
}

/// Uncertainty must already be inside [0, 1]; out-of-range values are rejected,
/// never coerced.
pub fn validate_uncertainty(value: f32) -> Result<f32> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EngineError::InvalidUncertainty(format!(
            "uncertainty {value} outside [0, 1]"
        )));
    }
    Ok(value)
}

/// Parse a raw feedback-type string against the closed enum.
pub fn validate_feedback_type(raw: &str) -> Result<FeedbackType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "keep" => Ok(FeedbackType::Keep),
        "pass" => Ok(FeedbackType::Pass),
        "bid" => Ok(FeedbackType::Bid),
        "watch" => Ok(FeedbackType::Watch),
        "ignore" => Ok(FeedbackType::Ignore),
        other => Err(EngineError::InvalidFeedbackType(other.to_string())),
    }
}

/// Satisfaction ratings are bounded 1-5; anything else rejects the feedback.
pub fn validate_satisfaction(satisfaction: Option<u8>) -> Result<Option<u8>> {
    match satisfaction {
        Some(s) if !(1..=5).contains(&s) => Err(EngineError::InvalidSatisfaction(format!(
            "{s} outside 1-5"
        ))),
        other => Ok(other),
    }
}

/// Strip markup, truncate to the configured maximum length, and drop any
/// string containing forbidden financial-promise language.
pub fn sanitize_explanations(explanations: Vec<String>, config: &GuardrailConfig) -> Vec<String> {
    explanations
        .into_iter()
        .filter_map(|raw| {
            let stripped = strip_markup(&raw);
            let trimmed = stripped.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lowered = trimmed.to_lowercase();
            if config
                .forbidden_phrases
                .iter()
                .any(|phrase| lowered.contains(&phrase.to_lowercase()))
            {
                return None;
            }
            Some(trimmed.chars().take(config.max_explanation_len).collect())
        })
        .collect()
}

/// Criteria invariants: every declared min <= max, weights non-negative,
/// risk tolerance inside [0, 1].
pub fn validate_criteria(criteria: &InvestorCriteria) -> Result<()> {
    check_bound("price", criteria.min_price, criteria.max_price)?;
    check_bound(
        "square_feet",
        criteria.min_square_feet,
        criteria.max_square_feet,
    )?;
    if !(0.0..=1.0).contains(&criteria.risk_tolerance) {
        return Err(EngineError::InvalidCriteria(format!(
            "risk tolerance {} outside [0, 1]",
            criteria.risk_tolerance
        )));
    }
    let weights = criteria.resolved_weights();
    for weight in weights.as_slice() {
        if !weight.is_finite() || weight < 0.0 {
            return Err(EngineError::InvalidCriteria(format!(
                "negative importance weight: {weight}"
            )));
        }
    }
    Ok(())
}

/// Whole-batch guardrail: every item in bounds and the batch sorted by score
/// descending (exploration items are annotated, never boosted).
pub fn validate_batch(items: &[AttentionScore]) -> Result<()> {
    for item in items {
        validate_score(item.score)?;
        validate_uncertainty(item.uncertainty)?;
    }
    for pair in items.windows(2) {
        if pair[0].score < pair[1].score {
            return Err(EngineError::InvalidScore(
                "batch not sorted by score descending".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_bound(name: &str, min: Option<f32>, max: Option<f32>) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(EngineError::InvalidCriteria(format!(
                "{name}: min {min} > max {max}"
            )));
        }
    }
    Ok(())
}

/// Remove anything between `<` and `>`. Character-level scan, no regex.
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
