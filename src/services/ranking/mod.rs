/// Personalized Ranking Module
///
/// Learns a per-investor ranking function from the feedback log, improving on
/// the rule-based baseline as data accumulates.
///
/// # Architecture
/// - **Model Layer**: ensemble of linear rankers over standardized features
/// - **Trainer Layer**: gating, pairwise training, NDCG holdout evaluation
/// - **Registry**: one active immutable `ModelState` per investor, replaced
///   by atomic pointer swap only when the candidate does not regress
pub mod model;
pub mod trainer;

pub use model::PersonalizedModel;
pub use trainer::ModelTrainer;

use crate::models::{ModelState, ModelStatus};
use crate::services::scoring::RULES_MODEL_VERSION;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Holds the active model state per investor.
///
/// States are immutable once activated; readers clone the `Arc` and keep
/// scoring against it even while a newer state is being swapped in.
#[derive(Default)]
pub struct ModelRegistry {
    active: DashMap<Uuid, Arc<ModelState>>,
    /// Superseded states, retained for audit.
    history: DashMap<Uuid, Vec<Arc<ModelState>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self, investor_id: Uuid) -> Option<Arc<ModelState>> {
        self.active.get(&investor_id).map(|s| Arc::clone(&s))
    }

    pub fn history(&self, investor_id: Uuid) -> Vec<Arc<ModelState>> {
        self.history
            .get(&investor_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn next_version(&self, investor_id: Uuid) -> u32 {
        self.active
            .get(&investor_id)
            .map(|s| s.version + 1)
            .unwrap_or(1)
    }

    /// Activate the candidate only if its metric is not worse than the active
    /// model's (monotonic non-regression). Returns whether it was activated.
    pub fn activate_if_not_worse(&self, candidate: ModelState) -> bool {
        let investor_id = candidate.investor_id;
        let not_worse = self
            .active
            .get(&investor_id)
            .map(|current| candidate.metrics.ndcg >= current.metrics.ndcg)
            .unwrap_or(true);

        if not_worse {
            info!(
                investor_id = %investor_id,
                version = candidate.version,
                ndcg = candidate.metrics.ndcg,
                "Activated personalized model"
            );
            if let Some(previous) = self.active.insert(investor_id, Arc::new(candidate)) {
                self.history.entry(investor_id).or_default().push(previous);
            }
        } else {
            warn!(
                investor_id = %investor_id,
                candidate_ndcg = candidate.metrics.ndcg,
                "Candidate model regressed; keeping active model"
            );
        }
        not_worse
    }

    pub fn status(&self, investor_id: Uuid) -> ModelStatus {
        match self.active(investor_id) {
            Some(state) => ModelStatus {
                is_trained: true,
                training_samples: state.training_samples,
                last_trained_at: Some(state.last_trained_at),
                metrics: Some(state.metrics.clone()),
                model_version: format!("personalized-v{}", state.version),
            },
            None => ModelStatus {
                is_trained: false,
                training_samples: 0,
                last_trained_at: None,
                metrics: None,
                model_version: RULES_MODEL_VERSION.to_string(),
            },
        }
    }
}
