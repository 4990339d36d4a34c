use serde::{Deserialize, Serialize};
use std::env;

/// Engine configuration, threaded explicitly into every component constructor.
///
/// Never read from ambient globals: tests construct it directly, deployments
/// call [`EngineConfig::from_env`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub training: TrainingConfig,
    pub exploration: ExplorationConfig,
    pub guardrails: GuardrailConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = EngineConfig::default();

        config.training.min_samples = env::var("ENGINE_MIN_TRAINING_SAMPLES")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .expect("ENGINE_MIN_TRAINING_SAMPLES must be a valid usize");
        config.training.min_positive_fraction = env::var("ENGINE_MIN_POSITIVE_FRACTION")
            .unwrap_or_else(|_| "0.2".to_string())
            .parse()
            .expect("ENGINE_MIN_POSITIVE_FRACTION must be a valid f32");
        config.exploration.default_budget = env::var("ENGINE_EXPLORATION_BUDGET")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .expect("ENGINE_EXPLORATION_BUDGET must be a valid usize");
        config.exploration.max_risk_flags = env::var("ENGINE_EXPLORATION_MAX_RISK_FLAGS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .expect("ENGINE_EXPLORATION_MAX_RISK_FLAGS must be a valid usize");
        config.guardrails.max_explanation_len = env::var("ENGINE_MAX_EXPLANATION_LEN")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .expect("ENGINE_MAX_EXPLANATION_LEN must be a valid usize");

        config
    }
}

/// Rule-based scorer weights and thresholds.
///
/// Component maxima sum to the 100-point ceiling before the risk penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub valuation_max: f32,
    /// Valuation spread at which the valuation component saturates.
    pub spread_saturation: f32,
    pub price_efficiency_max: f32,
    /// Price-to-value ratio at or below which price efficiency earns full points.
    pub price_ratio_full_at: f32,
    pub cash_flow_max: f32,
    /// Monthly cash flow (USD) that earns the full cash-flow component.
    pub cash_flow_full_at: f32,
    pub location_max: f32,
    pub condition_max: f32,
    pub market_trend_max: f32,
    /// Six-month momentum at which the trend component saturates.
    pub trend_full_at: f32,
    pub risk_penalty_per_flag: f32,
    pub max_risk_penalty: f32,
    /// Six-month price trend below this raises DecliningPriceHistory.
    pub declining_trend_threshold: f32,
    /// Annual tax / estimated value above this raises HighTaxBurden.
    pub high_tax_ratio: f32,
    /// Days on market above this raises IlliquidMarket.
    pub illiquid_days_on_market: f32,
    /// Uncertainty reported when scoring without a personalized model.
    pub baseline_uncertainty: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            valuation_max: 25.0,
            spread_saturation: 0.5,
            price_efficiency_max: 20.0,
            price_ratio_full_at: 0.5,
            cash_flow_max: 15.0,
            cash_flow_full_at: 1000.0,
            location_max: 10.0,
            condition_max: 10.0,
            market_trend_max: 10.0,
            trend_full_at: 0.10,
            risk_penalty_per_flag: 5.0,
            max_risk_penalty: 20.0,
            declining_trend_threshold: -0.03,
            high_tax_ratio: 0.03,
            illiquid_days_on_market: 180.0,
            baseline_uncertainty: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Minimum feedback records before training is attempted.
    pub min_samples: usize,
    /// Minimum fraction of positive-relevance labels (watch or better).
    pub min_positive_fraction: f32,
    /// Trailing fraction of query groups held out for evaluation.
    pub holdout_fraction: f32,
    pub ensemble_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub ndcg_cutoff: usize,
    /// Base seed for ensemble bootstrap sampling.
    pub base_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            min_positive_fraction: 0.2,
            holdout_fraction: 0.2,
            ensemble_size: 5,
            epochs: 30,
            learning_rate: 0.05,
            ndcg_cutoff: 10,
            base_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// Exploration slots per ranking request when the caller opts in.
    pub default_budget: usize,
    /// Candidates carrying more risk flags than this are never explored.
    pub max_risk_flags: usize,
    /// Feedback-history length below which an investor counts as new.
    pub new_investor_threshold: usize,
    /// Size of the confident top set excluded from uncertainty sampling.
    pub confident_top_n: usize,
    /// Population percentile defining the rare slice for novelty detection.
    pub novelty_percentile: f32,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            default_budget: 3,
            max_risk_flags: 2,
            new_investor_threshold: 20,
            confident_top_n: 10,
            novelty_percentile: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub max_explanation_len: usize,
    /// Phrases that disqualify an explanation string outright. Matched
    /// case-insensitively; explanations must never promise financial outcomes.
    pub forbidden_phrases: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_explanation_len: 200,
            forbidden_phrases: vec![
                "guaranteed profit".to_string(),
                "guaranteed return".to_string(),
                "risk-free".to_string(),
                "cannot lose".to_string(),
                "can't lose".to_string(),
                "will definitely".to_string(),
                "certain to appreciate".to_string(),
                "sure thing".to_string(),
            ],
        }
    }
}

/// Named weight bundles applied to investor criteria in one step.
///
/// Closed set: presets map to fixed [`ComponentWeights`]; per-component
/// overrides are merged on top explicitly via [`ComponentWeights::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightPreset {
    Balanced,
    CashFlowFocused,
    AppreciationFocused,
    Conservative,
}

impl WeightPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightPreset::Balanced => "balanced",
            WeightPreset::CashFlowFocused => "cash_flow_focused",
            WeightPreset::AppreciationFocused => "appreciation_focused",
            WeightPreset::Conservative => "conservative",
        }
    }

    pub fn weights(&self) -> ComponentWeights {
        match self {
            WeightPreset::Balanced => ComponentWeights::default(),
            WeightPreset::CashFlowFocused => ComponentWeights {
                cash_flow: 1.5,
                valuation: 0.8,
                market_trend: 0.8,
                ..ComponentWeights::default()
            },
            WeightPreset::AppreciationFocused => ComponentWeights {
                valuation: 1.4,
                market_trend: 1.4,
                cash_flow: 0.6,
                ..ComponentWeights::default()
            },
            WeightPreset::Conservative => ComponentWeights {
                condition: 1.3,
                location: 1.3,
                valuation: 0.8,
                ..ComponentWeights::default()
            },
        }
    }
}

/// Per-component importance multipliers, all non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeights {
    pub valuation: f32,
    pub price_efficiency: f32,
    pub cash_flow: f32,
    pub location: f32,
    pub condition: f32,
    pub market_trend: f32,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            valuation: 1.0,
            price_efficiency: 1.0,
            cash_flow: 1.0,
            location: 1.0,
            condition: 1.0,
            market_trend: 1.0,
        }
    }
}

impl ComponentWeights {
    /// Merge explicit overrides on top of this bundle.
    pub fn merge(&self, overrides: &WeightOverrides) -> ComponentWeights {
        ComponentWeights {
            valuation: overrides.valuation.unwrap_or(self.valuation),
            price_efficiency: overrides.price_efficiency.unwrap_or(self.price_efficiency),
            cash_flow: overrides.cash_flow.unwrap_or(self.cash_flow),
            location: overrides.location.unwrap_or(self.location),
            condition: overrides.condition.unwrap_or(self.condition),
            market_trend: overrides.market_trend.unwrap_or(self.market_trend),
        }
    }

    pub fn as_slice(&self) -> [f32; 6] {
        [
            self.valuation,
            self.price_efficiency,
            self.cash_flow,
            self.location,
            self.condition,
            self.market_trend,
        ]
    }
}

/// Optional per-component weight overrides set by the investor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightOverrides {
    pub valuation: Option<f32>,
    pub price_efficiency: Option<f32>,
    pub cash_flow: Option<f32>,
    pub location: Option<f32>,
    pub condition: Option<f32>,
    pub market_trend: Option<f32>,
}
