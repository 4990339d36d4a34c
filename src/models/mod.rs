use crate::config::{ComponentWeights, WeightOverrides, WeightPreset};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of the numeric feature vector fed to the personalized model.
///
/// Layout: [valuation_spread, price_to_value_ratio, monthly_cash_flow,
/// walk_score, transit_score, age_years, photo_count, six_month_price_trend,
/// rental_trend, tax_burden_ratio, flood_zone, structural_concerns,
/// days_on_market]
pub const FEATURE_VECTOR_SIZE: usize = 13;

/// Immutable feature snapshot for one property at one point in time.
///
/// Owned by the upstream enrichment pipeline; the ranking engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFeatures {
    pub property_id: Uuid,
    pub county: String,
    pub asking_price: f32,
    pub estimated_value: f32,
    pub square_feet: f32,
    pub monthly_cash_flow: f32,
    /// 0-100
    pub walk_score: f32,
    /// 0-100
    pub transit_score: f32,
    pub year_built: i32,
    pub photo_count: u32,
    /// Fractional change over the trailing six months, e.g. -0.05.
    pub six_month_price_trend: f32,
    pub rental_trend: f32,
    /// Annual tax / estimated value.
    pub tax_burden_ratio: f32,
    pub flood_zone: bool,
    pub structural_concerns: bool,
    pub days_on_market: f32,
    pub snapshot_at: DateTime<Utc>,
}

impl PropertyFeatures {
    /// Estimated value relative to acquisition cost, as a fraction of the
    /// asking price. Positive means the property is valued above its price.
    pub fn valuation_spread(&self) -> f32 {
        if self.asking_price <= 0.0 {
            return 0.0;
        }
        (self.estimated_value - self.asking_price) / self.asking_price
    }

    pub fn price_to_value_ratio(&self) -> f32 {
        if self.estimated_value <= 0.0 {
            return 1.0;
        }
        self.asking_price / self.estimated_value
    }

    /// Property age in years at snapshot time.
    pub fn age_years(&self) -> f32 {
        (self.snapshot_at.year() - self.year_built).max(0) as f32
    }

    /// Convert to the fixed-width vector used by model training and inference.
    pub fn to_vector(&self) -> Vec<f32> {
        vec![
            self.valuation_spread(),
            self.price_to_value_ratio(),
            self.monthly_cash_flow,
            self.walk_score,
            self.transit_score,
            self.age_years(),
            self.photo_count as f32,
            self.six_month_price_trend,
            self.rental_trend,
            self.tax_burden_ratio,
            if self.flood_zone { 1.0 } else { 0.0 },
            if self.structural_concerns { 1.0 } else { 0.0 },
            self.days_on_market,
        ]
    }
}

/// Per-investor inclusion/exclusion filters and importance weights.
///
/// Invariants (enforced by the guardrail validator): every declared min is at
/// most its max, all weights are non-negative, risk tolerance is in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestorCriteria {
    pub name: Option<String>,
    /// Counties to include; empty means all.
    pub counties: Vec<String>,
    pub excluded_counties: Vec<String>,
    pub min_price: Option<f32>,
    pub max_price: Option<f32>,
    pub min_square_feet: Option<f32>,
    pub max_square_feet: Option<f32>,
    /// 0 = averse, 1 = tolerant. Scales the rule scorer's risk penalty.
    pub risk_tolerance: f32,
    pub preset: Option<WeightPreset>,
    pub weight_overrides: WeightOverrides,
}

impl Default for InvestorCriteria {
    fn default() -> Self {
        Self {
            name: None,
            counties: Vec::new(),
            excluded_counties: Vec::new(),
            min_price: None,
            max_price: None,
            min_square_feet: None,
            max_square_feet: None,
            risk_tolerance: 0.5,
            preset: None,
            weight_overrides: WeightOverrides::default(),
        }
    }
}

impl InvestorCriteria {
    /// Preset bundle (or the balanced default) with overrides merged on top.
    pub fn resolved_weights(&self) -> ComponentWeights {
        self.preset
            .map(|p| p.weights())
            .unwrap_or_default()
            .merge(&self.weight_overrides)
    }

    /// Hard pre-filter: properties failing any declared bound are excluded
    /// from the batch entirely, never merely down-scored.
    pub fn accepts(&self, features: &PropertyFeatures) -> bool {
        if !self.counties.is_empty()
            && !self
                .counties
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&features.county))
        {
            return false;
        }
        if self
            .excluded_counties
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&features.county))
        {
            return false;
        }
        if let Some(min) = self.min_price {
            if features.asking_price < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if features.asking_price > max {
                return false;
            }
        }
        if let Some(min) = self.min_square_feet {
            if features.square_feet < min {
                return false;
            }
        }
        if let Some(max) = self.max_square_feet {
            if features.square_feet > max {
                return false;
            }
        }
        true
    }
}

/// Closed vocabulary of adverse-condition indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskFlag {
    FloodRiskHigh,
    DecliningPriceHistory,
    HighTaxBurden,
    StructuralConcerns,
    IlliquidMarket,
}

impl RiskFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlag::FloodRiskHigh => "flood_risk_high",
            RiskFlag::DecliningPriceHistory => "declining_price_history",
            RiskFlag::HighTaxBurden => "high_tax_burden",
            RiskFlag::StructuralConcerns => "structural_concerns",
            RiskFlag::IlliquidMarket => "illiquid_market",
        }
    }
}

/// Scoring components of the rule-based decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreComponent {
    ValuationSpread,
    PriceEfficiency,
    CashFlow,
    Location,
    Condition,
    MarketTrend,
    RiskPenalty,
}

impl ScoreComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreComponent::ValuationSpread => "valuation_spread",
            ScoreComponent::PriceEfficiency => "price_efficiency",
            ScoreComponent::CashFlow => "cash_flow",
            ScoreComponent::Location => "location",
            ScoreComponent::Condition => "condition",
            ScoreComponent::MarketTrend => "market_trend",
            ScoreComponent::RiskPenalty => "risk_penalty",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreContribution {
    pub component: ScoreComponent,
    pub points: f32,
}

/// Investor action on a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackType {
    Keep,
    Pass,
    Bid,
    Watch,
    Ignore,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Keep => "keep",
            FeedbackType::Pass => "pass",
            FeedbackType::Bid => "bid",
            FeedbackType::Watch => "watch",
            FeedbackType::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidOutcome {
    Won,
    Lost,
    Pending,
}

/// Append-only record of one investor action. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub property_id: Uuid,
    pub investor_id: Uuid,
    /// Query-group key: the ranking batch this action belongs to.
    pub session_id: Uuid,
    pub feedback_type: FeedbackType,
    pub bid_amount: Option<f32>,
    pub bid_outcome: Option<BidOutcome>,
    pub seconds_viewed: f32,
    pub note: Option<String>,
    /// 1-5.
    pub satisfaction: Option<u8>,
    /// Feature snapshot at action time; source of the training matrix.
    pub feature_snapshot: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Ordinal relevance label for learning-to-rank.
    ///
    /// pass -> 0, ignore -> 1, watch -> 2, keep -> 3, bid -> 4 (5 if won).
    pub fn relevance_label(&self) -> u8 {
        match self.feedback_type {
            FeedbackType::Pass => 0,
            FeedbackType::Ignore => 1,
            FeedbackType::Watch => 2,
            FeedbackType::Keep => 3,
            FeedbackType::Bid => match self.bid_outcome {
                Some(BidOutcome::Won) => 5,
                _ => 4,
            },
        }
    }

    /// Labels at watch level or higher count as positive relevance.
    pub fn is_positive(&self) -> bool {
        self.relevance_label() >= 2
    }
}

/// One scored property in a ranking response. Ephemeral: recomputed on every
/// ranking request, superseded on each call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionScore {
    pub property_id: Uuid,
    pub investor_id: Uuid,
    /// 0-100.
    pub score: f32,
    /// 1-based position within the batch.
    pub rank_position: usize,
    pub contributions: Vec<ScoreContribution>,
    pub risk_flags: Vec<RiskFlag>,
    pub explanations: Vec<String>,
    /// 0-1.
    pub uncertainty: f32,
    pub model_version: String,
    pub is_exploration: bool,
    pub exploration_strategy: Option<ExplorationStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplorationStrategy {
    Uncertainty,
    Diversity,
    Novelty,
}

impl ExplorationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationStrategy::Uncertainty => "uncertainty",
            ExplorationStrategy::Diversity => "diversity",
            ExplorationStrategy::Novelty => "novelty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplorationOutcome {
    Positive,
    Negative,
}

/// Permanent record of one exploration event, for outcome attribution.
/// Never influences the score of the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationRecord {
    pub id: Uuid,
    pub property_id: Uuid,
    pub investor_id: Uuid,
    pub strategy: ExplorationStrategy,
    pub expected_gain: f32,
    pub outcome: Option<ExplorationOutcome>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// NDCG at the configured cutoff on the holdout slice.
    pub ndcg: f32,
    pub holdout_groups: usize,
}

/// Trained parameters for one investor. Replaced atomically, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub investor_id: Uuid,
    pub version: u32,
    pub feature_means: Vec<f32>,
    pub feature_stds: Vec<f32>,
    /// One weight vector per ensemble member, FEATURE_VECTOR_SIZE + 1 (bias).
    pub ensemble: Vec<Vec<f32>>,
    pub training_samples: usize,
    pub last_trained_at: DateTime<Utc>,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub is_trained: bool,
    pub training_samples: usize,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub metrics: Option<ModelMetrics>,
    pub model_version: String,
}

/// Result of a training attempt. A gated (deferred) attempt is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub trained: bool,
    pub reason: Option<String>,
    pub metrics: Option<ModelMetrics>,
}

/// Caller-supplied context recorded alongside a feedback action.
#[derive(Debug, Clone, Default)]
pub struct FeedbackMetadata {
    pub session_id: Option<Uuid>,
    pub bid_amount: Option<f32>,
    pub bid_outcome: Option<BidOutcome>,
    pub seconds_viewed: f32,
    pub note: Option<String>,
    pub satisfaction: Option<u8>,
}

/// Feature-level breakdown returned by `explain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreExplanation {
    pub property_id: Uuid,
    pub investor_id: Uuid,
    pub contributions: Vec<ScoreContribution>,
    pub risk_flags: Vec<RiskFlag>,
    pub explanations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingStats {
    pub requested: usize,
    pub missing_features: usize,
    pub filtered_by_criteria: usize,
    pub exploration_count: usize,
    pub model_version: String,
}

/// Ordered ranking response. The session id doubles as the feedback
/// query-group key for actions taken on this batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedBatch {
    pub session_id: Uuid,
    pub items: Vec<AttentionScore>,
    pub stats: RankingStats,
}
