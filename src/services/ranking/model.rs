/// Personalized Model Inference
///
/// Scores properties against one investor's trained `ModelState`: an ensemble
/// of linear rankers over standardized features. The ensemble mean becomes the
/// raw relevance score; the ensemble spread becomes the uncertainty estimate.
use crate::error::{EngineError, Result};
use crate::models::{ModelState, PropertyFeatures, FEATURE_VECTOR_SIZE};
use crate::services::guardrails;
use crate::utils::{mean_std, sigmoid};
use ndarray::Array2;
use std::sync::Arc;

pub struct PersonalizedModel {
    state: Arc<ModelState>,
}

impl PersonalizedModel {
    pub fn new(state: Arc<ModelState>) -> Self {
        Self { state }
    }

    pub fn version_string(&self) -> String {
        format!("personalized-v{}", self.state.version)
    }

    /// Score one property: (attention score 0-100, uncertainty 0-1), both
    /// guardrail-validated.
    pub fn predict(&self, features: &PropertyFeatures) -> Result<(f32, f32)> {
        let vector = features.to_vector();
        let matrix = Array2::from_shape_vec((1, FEATURE_VECTOR_SIZE), vector)
            .map_err(|e| EngineError::Internal(format!("feature matrix: {e}")))?;
        let mut scored = self.predict_batch(matrix)?;
        scored
            .pop()
            .ok_or_else(|| EngineError::Internal("empty prediction batch".to_string()))
    }

    /// Score a batch of feature rows.
    ///
    /// The raw ensemble mean is mapped onto 0-100 through a fixed logistic
    /// curve; uncertainty is the ensemble standard deviation s mapped through
    /// s / (1 + s), which is monotonic and bounded in [0, 1).
    pub fn predict_batch(&self, features: Array2<f32>) -> Result<Vec<(f32, f32)>> {
        if features.shape()[1] != FEATURE_VECTOR_SIZE {
            return Err(EngineError::Internal(format!(
                "expected {} features, got {}",
                FEATURE_VECTOR_SIZE,
                features.shape()[1]
            )));
        }
        if self.state.ensemble.is_empty() {
            return Err(EngineError::Internal(
                "model state has an empty ensemble".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(features.shape()[0]);
        for row in features.outer_iter() {
            let standardized = standardize(
                row.as_slice()
                    .ok_or_else(|| EngineError::Internal("non-contiguous row".to_string()))?,
                &self.state.feature_means,
                &self.state.feature_stds,
            );

            let member_scores: Vec<f32> = self
                .state
                .ensemble
                .iter()
                .map(|weights| dot_with_bias(weights, &standardized))
                .collect();
            let (mean, spread) = mean_std(&member_scores);

            let score = guardrails::validate_score(100.0 * sigmoid(mean))?;
            let uncertainty = guardrails::validate_uncertainty(spread / (1.0 + spread))?;
            results.push((score, uncertainty));
        }
        Ok(results)
    }
}

/// Standardize a raw feature row with the state's training statistics.
/// Dimensions with zero variance pass through centered only.
pub(crate) fn standardize(row: &[f32], means: &[f32], stds: &[f32]) -> Vec<f32> {
    row.iter()
        .enumerate()
        .map(|(i, v)| {
            let std = stds.get(i).copied().unwrap_or(1.0);
            let mean = means.get(i).copied().unwrap_or(0.0);
            if std > f32::EPSILON {
                (v - mean) / std
            } else {
                v - mean
            }
        })
        .collect()
}

/// Weight layout: FEATURE_VECTOR_SIZE coefficients followed by a bias term.
pub(crate) fn dot_with_bias(weights: &[f32], x: &[f32]) -> f32 {
    let dot: f32 = weights.iter().zip(x.iter()).map(|(w, v)| w * v).sum();
    dot + weights.last().copied().unwrap_or(0.0)
}
