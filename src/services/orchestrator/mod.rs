// ============================================
// Ranking Orchestrator
// ============================================
//
// Single entry point tying the pipeline together: criteria filter -> rule
// scoring -> personalized scoring when a model is active -> sort ->
// exploration annotation -> batch guardrails. Also owns the feedback and
// training flows.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::models::{
    AttentionScore, ExplorationOutcome, FeedbackMetadata, FeedbackRecord, FeedbackType,
    ModelStatus, PropertyFeatures, RankedBatch, RankingStats, ScoreExplanation, TrainOutcome,
    FEATURE_VECTOR_SIZE,
};
use crate::services::exploration::{
    record_for_pick, ExplorationCandidate, ExplorationLog, ExplorationSelector,
};
use crate::services::features::{CriteriaProvider, FeatureProvider};
use crate::services::feedback::FeedbackStore;
use crate::services::guardrails;
use crate::services::ranking::{ModelRegistry, ModelTrainer, PersonalizedModel};
use crate::services::scoring::{RuleBasedScorer, RULES_MODEL_VERSION};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct RankingOrchestrator {
    features: Arc<dyn FeatureProvider>,
    criteria: Arc<dyn CriteriaProvider>,
    feedback: Arc<FeedbackStore>,
    registry: Arc<ModelRegistry>,
    trainer: ModelTrainer,
    scorer: RuleBasedScorer,
    selector: ExplorationSelector,
    exploration_log: Arc<ExplorationLog>,
    config: EngineConfig,
}

impl RankingOrchestrator {
    pub fn new(
        features: Arc<dyn FeatureProvider>,
        criteria: Arc<dyn CriteriaProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            features,
            criteria,
            feedback: Arc::new(FeedbackStore::new()),
            registry: Arc::new(ModelRegistry::new()),
            trainer: ModelTrainer::new(config.training.clone()),
            scorer: RuleBasedScorer::new(config.scoring.clone(), config.guardrails.clone()),
            selector: ExplorationSelector::new(config.exploration.clone()),
            exploration_log: Arc::new(ExplorationLog::new()),
            config,
        }
    }

    pub fn feedback_store(&self) -> Arc<FeedbackStore> {
        Arc::clone(&self.feedback)
    }

    pub fn exploration_log(&self) -> Arc<ExplorationLog> {
        Arc::clone(&self.exploration_log)
    }

    /// Rank candidate properties for an investor, best first.
    pub async fn rank(
        &self,
        investor_id: Uuid,
        property_ids: &[Uuid],
        include_exploration: bool,
    ) -> Result<RankedBatch> {
        self.rank_seeded(investor_id, property_ids, include_exploration, rand::random())
            .await
    }

    /// Seeded variant so exploration tie-breaks are reproducible.
    pub async fn rank_seeded(
        &self,
        investor_id: Uuid,
        property_ids: &[Uuid],
        include_exploration: bool,
        seed: u64,
    ) -> Result<RankedBatch> {
        let criteria = self
            .criteria
            .get_criteria(investor_id)
            .await?
            .unwrap_or_default();
        guardrails::validate_criteria(&criteria)?;

        // Per-property fetch: an unavailable snapshot drops that property
        // from the batch instead of failing the request.
        let mut feature_map = HashMap::with_capacity(property_ids.len());
        for id in property_ids {
            match self.features.get_features(*id).await {
                Ok(Some(features)) => {
                    feature_map.insert(*id, features);
                }
                Ok(None) => {}
                Err(EngineError::FeatureUnavailable(property_id)) => {
                    warn!(
                        investor_id = %investor_id,
                        property_id = %property_id,
                        "Feature snapshot unavailable upstream; excluding property"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let missing_features = property_ids.len() - feature_map.len();
        if missing_features > 0 {
            warn!(
                investor_id = %investor_id,
                missing = missing_features,
                "Ranking request references properties without feature snapshots"
            );
        }

        // Walk the request order, not map order, so equal scores rank
        // deterministically.
        let mut accepted: Vec<&PropertyFeatures> = Vec::with_capacity(feature_map.len());
        for id in property_ids {
            if let Some(features) = feature_map.get(id) {
                if criteria.accepts(features) {
                    accepted.push(features);
                }
            }
        }
        let filtered_by_criteria = feature_map.len() - accepted.len();

        let model = self.registry.active(investor_id).map(PersonalizedModel::new);
        let model_version = model
            .as_ref()
            .map(|m| m.version_string())
            .unwrap_or_else(|| RULES_MODEL_VERSION.to_string());

        let mut items: Vec<AttentionScore> = Vec::with_capacity(accepted.len());
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(accepted.len());
        for features in accepted {
            let rule = self.scorer.score(features, &criteria)?;
            let (score, uncertainty, version) = match &model {
                Some(model) => match model.predict(features) {
                    Ok((score, uncertainty)) => (score, uncertainty, model_version.clone()),
                    // One bad snapshot must not fail the batch; that item
                    // falls back to the rule path.
                    Err(e) => {
                        warn!(
                            property_id = %features.property_id,
                            error = %e,
                            "Personalized inference failed; using rule score"
                        );
                        (
                            rule.total,
                            self.config.scoring.baseline_uncertainty,
                            RULES_MODEL_VERSION.to_string(),
                        )
                    }
                },
                None => (
                    rule.total,
                    self.config.scoring.baseline_uncertainty,
                    RULES_MODEL_VERSION.to_string(),
                ),
            };

            vectors.push(features.to_vector());
            items.push(AttentionScore {
                property_id: features.property_id,
                investor_id,
                score,
                rank_position: 0,
                contributions: rule.contributions,
                risk_flags: rule.risk_flags,
                explanations: rule.explanations,
                uncertainty,
                model_version: version,
                is_exploration: false,
                exploration_strategy: None,
            });
        }

        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|a, b| {
            items[*b]
                .score
                .partial_cmp(&items[*a].score)
                .unwrap_or(Ordering::Equal)
        });
        let mut sorted_items = Vec::with_capacity(items.len());
        let mut sorted_vectors = Vec::with_capacity(items.len());
        for (position, idx) in order.into_iter().enumerate() {
            let mut item = items[idx].clone();
            item.rank_position = position + 1;
            sorted_items.push(item);
            sorted_vectors.push(vectors[idx].clone());
        }
        let mut items = sorted_items;

        let mut exploration_count = 0;
        if include_exploration && self.config.exploration.default_budget > 0 {
            exploration_count = self
                .annotate_exploration(investor_id, &mut items, &sorted_vectors, seed)
                .await;
        }

        guardrails::validate_batch(&items)?;

        let session_id = Uuid::new_v4();
        let stats = RankingStats {
            requested: property_ids.len(),
            missing_features,
            filtered_by_criteria,
            exploration_count,
            model_version,
        };
        info!(
            investor_id = %investor_id,
            session_id = %session_id,
            ranked = items.len(),
            exploration = exploration_count,
            model_version = %stats.model_version,
            "Ranked property batch"
        );
        Ok(RankedBatch {
            session_id,
            items,
            stats,
        })
    }

    /// Flag the exploration picks in place. Scores and ordering are already
    /// final; exploration only annotates and logs.
    async fn annotate_exploration(
        &self,
        investor_id: Uuid,
        items: &mut [AttentionScore],
        vectors: &[Vec<f32>],
        seed: u64,
    ) -> usize {
        let history = self.feedback.snapshot(investor_id).await;
        let centroid = positive_centroid(&history);

        let candidates: Vec<ExplorationCandidate> = items
            .iter()
            .zip(vectors.iter())
            .map(|(item, vector)| ExplorationCandidate {
                property_id: item.property_id,
                score: item.score,
                uncertainty: item.uncertainty,
                risk_flag_count: item.risk_flags.len(),
                features: vector.clone(),
            })
            .collect();

        let picks = self.selector.select(
            &candidates,
            history.len(),
            centroid.as_deref(),
            self.config.exploration.default_budget,
            seed,
        );

        for pick in &picks {
            if let Some(item) = items.iter_mut().find(|i| i.property_id == pick.property_id) {
                item.is_exploration = true;
                item.exploration_strategy = Some(pick.strategy);
            }
            self.exploration_log
                .append(record_for_pick(investor_id, pick))
                .await;
        }
        picks.len()
    }

    /// Record one investor action against a property.
    pub async fn record_feedback(
        &self,
        investor_id: Uuid,
        property_id: Uuid,
        feedback_type: &str,
        metadata: FeedbackMetadata,
    ) -> Result<FeedbackRecord> {
        let feedback_type = guardrails::validate_feedback_type(feedback_type)?;
        let satisfaction = guardrails::validate_satisfaction(metadata.satisfaction)?;
        let features = self
            .features
            .get_features(property_id)
            .await?
            .ok_or(EngineError::PropertyNotFound(property_id))?;

        let note = metadata.note.and_then(|raw| {
            guardrails::sanitize_explanations(vec![raw], &self.config.guardrails)
                .into_iter()
                .next()
        });

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            property_id,
            investor_id,
            session_id: metadata.session_id.unwrap_or_else(Uuid::new_v4),
            feedback_type,
            bid_amount: metadata.bid_amount,
            bid_outcome: metadata.bid_outcome,
            seconds_viewed: metadata.seconds_viewed,
            note,
            satisfaction,
            feature_snapshot: features.to_vector(),
            created_at: Utc::now(),
        };
        self.feedback.append(record.clone()).await;

        let outcome = match feedback_type {
            FeedbackType::Keep | FeedbackType::Bid | FeedbackType::Watch => {
                ExplorationOutcome::Positive
            }
            FeedbackType::Pass | FeedbackType::Ignore => ExplorationOutcome::Negative,
        };
        self.exploration_log
            .record_outcome(investor_id, property_id, outcome)
            .await;

        Ok(record)
    }

    /// Attempt to train and activate a personalized model. Deferral (not
    /// enough data, label imbalance, or a regressing candidate) is a normal
    /// outcome, not an error. `min_samples` overrides the configured sample
    /// gate for this attempt only.
    pub async fn train(&self, investor_id: Uuid, min_samples: Option<usize>) -> Result<TrainOutcome> {
        let records = self.feedback.snapshot(investor_id).await;
        let gate = self
            .trainer
            .gate_with(&records, min_samples.unwrap_or(self.config.training.min_samples));
        if let Some(reason) = gate {
            info!(investor_id = %investor_id, reason = %reason, "Training deferred");
            return Ok(TrainOutcome {
                trained: false,
                reason: Some(reason),
                metrics: None,
            });
        }

        let version = self.registry.next_version(investor_id);
        let state = match self.trainer.train(investor_id, &records, version) {
            Ok(state) => state,
            Err(e) => {
                warn!(investor_id = %investor_id, error = %e, "Training failed");
                return Err(e);
            }
        };
        let metrics = state.metrics.clone();

        if self.registry.activate_if_not_worse(state) {
            Ok(TrainOutcome {
                trained: true,
                reason: None,
                metrics: Some(metrics),
            })
        } else {
            Ok(TrainOutcome {
                trained: false,
                reason: Some("candidate metric below active model".to_string()),
                metrics: Some(metrics),
            })
        }
    }

    /// Feature-level breakdown of the rule score for one property.
    pub async fn explain(
        &self,
        investor_id: Uuid,
        property_id: Uuid,
    ) -> Result<ScoreExplanation> {
        let features = self
            .features
            .get_features(property_id)
            .await?
            .ok_or(EngineError::PropertyNotFound(property_id))?;
        let criteria = self
            .criteria
            .get_criteria(investor_id)
            .await?
            .unwrap_or_default();
        let rule = self.scorer.score(&features, &criteria)?;
        Ok(ScoreExplanation {
            property_id,
            investor_id,
            contributions: rule.contributions,
            risk_flags: rule.risk_flags,
            explanations: rule.explanations,
        })
    }

    pub fn get_model_status(&self, investor_id: Uuid) -> ModelStatus {
        self.registry.status(investor_id)
    }
}

/// Mean feature vector over kept and bid properties; the "taste" anchor for
/// diversity-based exploration.
fn positive_centroid(history: &[FeedbackRecord]) -> Option<Vec<f32>> {
    let anchors: Vec<&FeedbackRecord> = history
        .iter()
        .filter(|r| {
            matches!(r.feedback_type, FeedbackType::Keep | FeedbackType::Bid)
                && r.feature_snapshot.len() == FEATURE_VECTOR_SIZE
        })
        .collect();
    if anchors.is_empty() {
        return None;
    }
    let mut centroid = vec![0.0f32; FEATURE_VECTOR_SIZE];
    for record in &anchors {
        for (i, v) in record.feature_snapshot.iter().enumerate() {
            centroid[i] += v / anchors.len() as f32;
        }
    }
    Some(centroid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::InMemoryPropertyStore;
    use async_trait::async_trait;
    use mockall::mock;

    fn features(property_id: Uuid, asking_price: f32, cash_flow: f32) -> PropertyFeatures {
        PropertyFeatures {
            property_id,
            county: "travis".to_string(),
            asking_price,
            estimated_value: asking_price * 1.2,
            square_feet: 1_500.0,
            monthly_cash_flow: cash_flow,
            walk_score: 60.0,
            transit_score: 50.0,
            year_built: 1995,
            photo_count: 8,
            six_month_price_trend: 0.02,
            rental_trend: 0.01,
            tax_burden_ratio: 0.02,
            flood_zone: false,
            structural_concerns: false,
            days_on_market: 40.0,
            snapshot_at: Utc::now(),
        }
    }

    fn engine_with_properties(count: usize) -> (RankingOrchestrator, Vec<Uuid>) {
        let store = Arc::new(InMemoryPropertyStore::new());
        let ids: Vec<Uuid> = (0..count)
            .map(|i| {
                let id = Uuid::new_v4();
                store.upsert_features(features(
                    id,
                    150_000.0 + 10_000.0 * i as f32,
                    100.0 + 50.0 * i as f32,
                ));
                id
            })
            .collect();
        let engine = RankingOrchestrator::new(
            Arc::clone(&store) as Arc<dyn FeatureProvider>,
            store as Arc<dyn CriteriaProvider>,
            EngineConfig::default(),
        );
        (engine, ids)
    }

    #[tokio::test]
    async fn cold_start_ranks_with_rules() {
        let (engine, ids) = engine_with_properties(6);
        let investor = Uuid::new_v4();

        let batch = engine.rank(investor, &ids, false).await.expect("rank");
        assert_eq!(batch.items.len(), 6);
        assert_eq!(batch.stats.model_version, "rules");
        for (i, item) in batch.items.iter().enumerate() {
            assert_eq!(item.rank_position, i + 1);
            assert_eq!(item.model_version, "rules");
            assert!(!item.is_exploration);
        }
        for pair in batch.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn missing_properties_are_skipped_not_fatal() {
        let (engine, mut ids) = engine_with_properties(3);
        ids.push(Uuid::new_v4());
        let investor = Uuid::new_v4();

        let batch = engine.rank(investor, &ids, false).await.expect("rank");
        assert_eq!(batch.items.len(), 3);
        assert_eq!(batch.stats.requested, 4);
        assert_eq!(batch.stats.missing_features, 1);
    }

    #[tokio::test]
    async fn invalid_feedback_type_is_rejected() {
        let (engine, ids) = engine_with_properties(1);
        let investor = Uuid::new_v4();
        let result = engine
            .record_feedback(investor, ids[0], "love", FeedbackMetadata::default())
            .await;
        assert!(matches!(result, Err(EngineError::InvalidFeedbackType(_))));
    }

    #[tokio::test]
    async fn feedback_on_unknown_property_fails() {
        let (engine, _) = engine_with_properties(1);
        let investor = Uuid::new_v4();
        let result = engine
            .record_feedback(investor, Uuid::new_v4(), "keep", FeedbackMetadata::default())
            .await;
        assert!(matches!(result, Err(EngineError::PropertyNotFound(_))));
    }

    #[tokio::test]
    async fn training_defers_until_enough_feedback() {
        let (engine, ids) = engine_with_properties(4);
        let investor = Uuid::new_v4();
        engine
            .record_feedback(investor, ids[0], "keep", FeedbackMetadata::default())
            .await
            .expect("feedback");

        let outcome = engine.train(investor, None).await.expect("train");
        assert!(!outcome.trained);
        assert!(outcome.reason.is_some());
        assert!(!engine.get_model_status(investor).is_trained);

        // A raised per-call threshold gates even harder.
        let outcome = engine.train(investor, Some(100)).await.expect("train");
        assert!(!outcome.trained);
    }

    #[tokio::test]
    async fn exploration_annotates_without_reordering() {
        let (engine, ids) = engine_with_properties(15);
        let investor = Uuid::new_v4();

        let plain = engine
            .rank_seeded(investor, &ids, false, 21)
            .await
            .expect("rank");
        let explored = engine
            .rank_seeded(investor, &ids, true, 21)
            .await
            .expect("rank");

        let plain_order: Vec<Uuid> = plain.items.iter().map(|i| i.property_id).collect();
        let explored_order: Vec<Uuid> = explored.items.iter().map(|i| i.property_id).collect();
        assert_eq!(plain_order, explored_order);
        assert_eq!(explored.stats.exploration_count, 3);
        assert_eq!(
            explored.items.iter().filter(|i| i.is_exploration).count(),
            3
        );

        let logged = engine.exploration_log().for_investor(investor).await;
        assert_eq!(logged.len(), 3);
    }

    #[tokio::test]
    async fn explain_returns_rule_breakdown() {
        let (engine, ids) = engine_with_properties(1);
        let investor = Uuid::new_v4();
        let explanation = engine.explain(investor, ids[0]).await.expect("explain");
        assert!(!explanation.contributions.is_empty());
        assert!(explanation.explanations.len() <= 3);
    }

    mock! {
        Provider {}

        #[async_trait]
        impl FeatureProvider for Provider {
            async fn get_features(&self, property_id: Uuid) -> crate::error::Result<Option<PropertyFeatures>>;
        }
    }

    #[tokio::test]
    async fn upstream_failure_excludes_property_not_batch() {
        let mut provider = MockProvider::new();
        provider
            .expect_get_features()
            .returning(|id| Err(EngineError::FeatureUnavailable(id)));

        let store = Arc::new(InMemoryPropertyStore::new());
        let engine = RankingOrchestrator::new(
            Arc::new(provider),
            store as Arc<dyn CriteriaProvider>,
            EngineConfig::default(),
        );
        let batch = engine
            .rank(Uuid::new_v4(), &[Uuid::new_v4(), Uuid::new_v4()], false)
            .await
            .expect("rank");
        assert!(batch.items.is_empty());
        assert_eq!(batch.stats.missing_features, 2);
    }
}
