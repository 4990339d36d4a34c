// ============================================
// Rule-Based Scorer
// ============================================
//
// Deterministic baseline with zero training dependency. Serves every investor
// with no feedback history and backstops the personalized model whenever it
// is unavailable or fails validation.
//
// Decomposition (component maxima sum to 100 before the risk penalty):
//   valuation spread 0-25, price efficiency 0-20, cash flow 0-15,
//   location 0-10, condition 0-10, market trend 0-10, risk penalty -20-0.

use crate::config::{GuardrailConfig, ScoringConfig};
use crate::error::Result;
use crate::models::{
    InvestorCriteria, PropertyFeatures, RiskFlag, ScoreComponent, ScoreContribution,
};
use crate::services::guardrails;
use tracing::debug;

/// Model version string attached to rule-scored batches.
pub const RULES_MODEL_VERSION: &str = "rules";

/// Full output of one rule-based evaluation.
#[derive(Debug, Clone)]
pub struct RuleScore {
    /// 0-100, already clamped and validated.
    pub total: f32,
    pub contributions: Vec<ScoreContribution>,
    pub risk_flags: Vec<RiskFlag>,
    /// Top three contributions rendered through fixed templates, sanitized.
    pub explanations: Vec<String>,
}

pub struct RuleBasedScorer {
    config: ScoringConfig,
    guardrails: GuardrailConfig,
}

impl RuleBasedScorer {
    pub fn new(config: ScoringConfig, guardrails: GuardrailConfig) -> Self {
        Self { config, guardrails }
    }

    /// Score one property. Deterministic: identical inputs produce identical
    /// scores and identical explanation strings.
    pub fn score(
        &self,
        features: &PropertyFeatures,
        criteria: &InvestorCriteria,
    ) -> Result<RuleScore> {
        let cfg = &self.config;
        let weights = criteria.resolved_weights();

        let spread = features.valuation_spread();
        let valuation = capped(
            (spread / cfg.spread_saturation).clamp(0.0, 1.0) * cfg.valuation_max,
            weights.valuation,
            cfg.valuation_max,
        );

        let ratio = features.price_to_value_ratio();
        let efficiency_span = (1.0 - cfg.price_ratio_full_at).max(f32::EPSILON);
        let price_efficiency = capped(
            ((1.0 - ratio) / efficiency_span).clamp(0.0, 1.0) * cfg.price_efficiency_max,
            weights.price_efficiency,
            cfg.price_efficiency_max,
        );

        // Negative cash flow never subtracts from this sub-score.
        let cash_flow = capped(
            (features.monthly_cash_flow / cfg.cash_flow_full_at).clamp(0.0, 1.0)
                * cfg.cash_flow_max,
            weights.cash_flow,
            cfg.cash_flow_max,
        );

        let walkability = (features.walk_score + features.transit_score) / 200.0;
        let climate_bonus = if features.flood_zone { 0.0 } else { 2.0 };
        let location = capped(
            walkability * (cfg.location_max - 2.0) + climate_bonus,
            weights.location,
            cfg.location_max,
        );

        let age_factor = 1.0 - (features.age_years() / 80.0).clamp(0.0, 1.0);
        let documentation_factor = (features.photo_count as f32 / 10.0).clamp(0.0, 1.0);
        let condition = capped(
            cfg.condition_max * (0.7 * age_factor + 0.3 * documentation_factor),
            weights.condition,
            cfg.condition_max,
        );

        let momentum = (features.six_month_price_trend + features.rental_trend) / 2.0;
        let market_trend = capped(
            (momentum / cfg.trend_full_at).clamp(0.0, 1.0) * cfg.market_trend_max,
            weights.market_trend,
            cfg.market_trend_max,
        );

        let risk_flags = self.risk_flags(features);
        // Tolerant investors (risk_tolerance -> 1) absorb smaller penalties;
        // the default 0.5 tolerance leaves the configured per-flag penalty
        // unscaled. Capped so the penalty never exceeds its floor.
        let tolerance_scale = 1.5 - criteria.risk_tolerance;
        let risk_penalty = -(risk_flags.len() as f32
            * cfg.risk_penalty_per_flag
            * tolerance_scale)
            .min(cfg.max_risk_penalty);

        let mut contributions = vec![
            ScoreContribution {
                component: ScoreComponent::ValuationSpread,
                points: valuation,
            },
            ScoreContribution {
                component: ScoreComponent::PriceEfficiency,
                points: price_efficiency,
            },
            ScoreContribution {
                component: ScoreComponent::CashFlow,
                points: cash_flow,
            },
            ScoreContribution {
                component: ScoreComponent::Location,
                points: location,
            },
            ScoreContribution {
                component: ScoreComponent::Condition,
                points: condition,
            },
            ScoreContribution {
                component: ScoreComponent::MarketTrend,
                points: market_trend,
            },
        ];
        if !risk_flags.is_empty() {
            contributions.push(ScoreContribution {
                component: ScoreComponent::RiskPenalty,
                points: risk_penalty,
            });
        }

        let raw_total: f32 = contributions.iter().map(|c| c.points).sum();
        let total = guardrails::validate_score(raw_total)?;

        let explanations = self.explanations(features, &contributions, &risk_flags);

        debug!(
            property_id = %features.property_id,
            total = total,
            flags = risk_flags.len(),
            "Rule-based score computed"
        );

        Ok(RuleScore {
            total,
            contributions,
            risk_flags,
            explanations,
        })
    }

    /// Match risk flags in a fixed order so output is reproducible.
    pub fn risk_flags(&self, features: &PropertyFeatures) -> Vec<RiskFlag> {
        let cfg = &self.config;
        let mut flags = Vec::new();
        if features.flood_zone {
            flags.push(RiskFlag::FloodRiskHigh);
        }
        if features.six_month_price_trend < cfg.declining_trend_threshold {
            flags.push(RiskFlag::DecliningPriceHistory);
        }
        if features.tax_burden_ratio > cfg.high_tax_ratio {
            flags.push(RiskFlag::HighTaxBurden);
        }
        if features.structural_concerns {
            flags.push(RiskFlag::StructuralConcerns);
        }
        if features.days_on_market > cfg.illiquid_days_on_market {
            flags.push(RiskFlag::IlliquidMarket);
        }
        flags
    }

    /// Top three contributions by absolute magnitude, rendered through fixed
    /// templates. Stable sort keeps component order on ties.
    fn explanations(
        &self,
        features: &PropertyFeatures,
        contributions: &[ScoreContribution],
        risk_flags: &[RiskFlag],
    ) -> Vec<String> {
        let mut ranked: Vec<&ScoreContribution> = contributions.iter().collect();
        ranked.sort_by(|a, b| {
            b.points
                .abs()
                .partial_cmp(&a.points.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let rendered = ranked
            .into_iter()
            .take(3)
            .map(|c| self.render(features, c, risk_flags))
            .collect();
        guardrails::sanitize_explanations(rendered, &self.guardrails)
    }

    fn render(
        &self,
        features: &PropertyFeatures,
        contribution: &ScoreContribution,
        risk_flags: &[RiskFlag],
    ) -> String {
        let points = contribution.points;
        match contribution.component {
            ScoreComponent::ValuationSpread => format!(
                "Estimated value sits {:.0}% above the asking price, adding {:.1} points",
                features.valuation_spread() * 100.0,
                points
            ),
            ScoreComponent::PriceEfficiency => format!(
                "Acquisition price is {:.0}% of estimated value, adding {:.1} points",
                features.price_to_value_ratio() * 100.0,
                points
            ),
            ScoreComponent::CashFlow => format!(
                "Projected monthly cash flow of ${:.0} adds {:.1} points",
                features.monthly_cash_flow.max(0.0),
                points
            ),
            ScoreComponent::Location => format!(
                "Walk and transit access averages {:.0}/100, adding {:.1} points",
                (features.walk_score + features.transit_score) / 2.0,
                points
            ),
            ScoreComponent::Condition => format!(
                "Built in {} with {} photos on file, adding {:.1} points",
                features.year_built, features.photo_count, points
            ),
            ScoreComponent::MarketTrend => format!(
                "Six-month area momentum of {:.1}% adds {:.1} points",
                (features.six_month_price_trend + features.rental_trend) / 2.0 * 100.0,
                points
            ),
            ScoreComponent::RiskPenalty => {
                let names: Vec<&str> = risk_flags.iter().map(|f| f.as_str()).collect();
                format!(
                    "{} matched risk flags subtract {:.1} points: {}",
                    risk_flags.len(),
                    -points,
                    names.join(", ")
                )
            }
        }
    }
}

/// Apply the criteria importance multiplier, floor at zero, cap at the
/// component maximum so weighted components keep the 100-point ceiling.
fn capped(raw: f32, weight: f32, max: f32) -> f32 {
    (raw * weight).clamp(0.0, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightPreset;
    use chrono::Utc;
    use uuid::Uuid;

    fn scorer() -> RuleBasedScorer {
        RuleBasedScorer::new(ScoringConfig::default(), GuardrailConfig::default())
    }

    fn strong_property() -> PropertyFeatures {
        PropertyFeatures {
            property_id: Uuid::new_v4(),
            county: "travis".to_string(),
            asking_price: 150_000.0,
            estimated_value: 240_000.0,
            square_feet: 1_800.0,
            monthly_cash_flow: 900.0,
            walk_score: 85.0,
            transit_score: 75.0,
            year_built: 2015,
            photo_count: 15,
            six_month_price_trend: 0.08,
            rental_trend: 0.05,
            tax_burden_ratio: 0.015,
            flood_zone: false,
            structural_concerns: false,
            days_on_market: 30.0,
            snapshot_at: Utc::now(),
        }
    }

    fn risky_property() -> PropertyFeatures {
        PropertyFeatures {
            flood_zone: true,
            six_month_price_trend: -0.08,
            rental_trend: -0.02,
            tax_burden_ratio: 0.045,
            structural_concerns: true,
            days_on_market: 240.0,
            ..strong_property()
        }
    }

    #[test]
    fn scores_stay_in_bounds() {
        let scorer = scorer();
        let criteria = InvestorCriteria::default();

        let strong = scorer.score(&strong_property(), &criteria).expect("score");
        assert!(strong.total > 60.0 && strong.total <= 100.0);

        let risky = scorer.score(&risky_property(), &criteria).expect("score");
        assert!((0.0..=100.0).contains(&risky.total));
        assert!(risky.total < strong.total);
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = scorer();
        let criteria = InvestorCriteria::default();
        let property = strong_property();

        let a = scorer.score(&property, &criteria).expect("score");
        let b = scorer.score(&property, &criteria).expect("score");
        assert_eq!(a.total, b.total);
        assert_eq!(a.explanations, b.explanations);
    }

    #[test]
    fn flood_and_decline_raise_flags_and_penalty() {
        let scorer = scorer();
        let property = PropertyFeatures {
            flood_zone: true,
            six_month_price_trend: -0.06,
            ..strong_property()
        };
        let result = scorer
            .score(&property, &InvestorCriteria::default())
            .expect("score");

        assert!(result.risk_flags.contains(&RiskFlag::FloodRiskHigh));
        assert!(result
            .risk_flags
            .contains(&RiskFlag::DecliningPriceHistory));
        let flag_names: Vec<&str> = result.risk_flags.iter().map(|f| f.as_str()).collect();
        assert!(flag_names.contains(&"flood_risk_high"));

        let penalty = result
            .contributions
            .iter()
            .find(|c| c.component == ScoreComponent::RiskPenalty)
            .expect("penalty contribution");
        assert!(penalty.points < 0.0);
    }

    #[test]
    fn penalty_never_exceeds_floor() {
        let scorer = scorer();
        let criteria = InvestorCriteria {
            risk_tolerance: 0.0,
            ..Default::default()
        };
        let result = scorer.score(&risky_property(), &criteria).expect("score");
        let penalty = result
            .contributions
            .iter()
            .find(|c| c.component == ScoreComponent::RiskPenalty)
            .expect("penalty contribution");
        assert!(penalty.points >= -ScoringConfig::default().max_risk_penalty);
    }

    #[test]
    fn negative_cash_flow_contributes_zero() {
        let scorer = scorer();
        let property = PropertyFeatures {
            monthly_cash_flow: -500.0,
            ..strong_property()
        };
        let result = scorer
            .score(&property, &InvestorCriteria::default())
            .expect("score");
        let cash = result
            .contributions
            .iter()
            .find(|c| c.component == ScoreComponent::CashFlow)
            .expect("cash flow contribution");
        assert_eq!(cash.points, 0.0);
    }

    #[test]
    fn preset_weights_shift_component_points() {
        let scorer = scorer();
        let property = strong_property();

        let balanced = scorer
            .score(&property, &InvestorCriteria::default())
            .expect("score");
        let cash_focused = scorer
            .score(
                &property,
                &InvestorCriteria {
                    preset: Some(WeightPreset::CashFlowFocused),
                    ..Default::default()
                },
            )
            .expect("score");

        let cash_points = |r: &RuleScore| {
            r.contributions
                .iter()
                .find(|c| c.component == ScoreComponent::CashFlow)
                .map(|c| c.points)
                .unwrap_or(0.0)
        };
        assert!(cash_points(&cash_focused) > cash_points(&balanced));
    }

    #[test]
    fn explanations_limited_to_top_three() {
        let scorer = scorer();
        let result = scorer
            .score(&strong_property(), &InvestorCriteria::default())
            .expect("score");
        assert!(!result.explanations.is_empty());
        assert!(result.explanations.len() <= 3);
    }
}
