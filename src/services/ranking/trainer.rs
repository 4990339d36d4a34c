/// Model Trainer
///
/// Builds a candidate `ModelState` from an investor's feedback log:
/// 1. Gate on sample count and label balance
/// 2. Split query groups (ranking sessions) into train / trailing holdout
/// 3. Fit a pairwise ensemble on within-group label-ordered pairs
/// 4. Evaluate NDCG on the holdout before the registry decides activation
use crate::config::TrainingConfig;
use crate::error::{EngineError, Result};
use crate::models::{FeedbackRecord, ModelMetrics, ModelState, FEATURE_VECTOR_SIZE};
use crate::services::ranking::model::{dot_with_bias, standardize};
use crate::utils::sigmoid;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

pub struct ModelTrainer {
    config: TrainingConfig,
}

/// One training example: standardized features plus ordinal relevance label,
/// grouped by ranking session.
struct LabeledGroup {
    rows: Vec<(Vec<f32>, u8)>,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Check whether the feedback log supports training yet. Returns the
    /// human-readable deferral reason when it does not.
    pub fn gate(&self, records: &[FeedbackRecord]) -> Option<String> {
        self.gate_with(records, self.config.min_samples)
    }

    /// Gate with a caller-supplied sample threshold.
    pub fn gate_with(&self, records: &[FeedbackRecord], min_samples: usize) -> Option<String> {
        // An empty log defers even when the caller lowers the threshold to 0.
        if records.is_empty() {
            return Some("no feedback recorded yet".to_string());
        }
        if records.len() < min_samples {
            return Some(format!(
                "{} feedback records, need {min_samples}",
                records.len()
            ));
        }
        let positives = records.iter().filter(|r| r.is_positive()).count();
        let fraction = positives as f32 / records.len() as f32;
        if fraction < self.config.min_positive_fraction {
            return Some(format!(
                "{positives} positive labels out of {} ({:.0}% < {:.0}% required)",
                records.len(),
                fraction * 100.0,
                self.config.min_positive_fraction * 100.0
            ));
        }
        None
    }

    /// Train a candidate model. Callers gate first; this returns
    /// `TrainingEvaluation` when the data admits no usable pairs or the
    /// holdout metric cannot be computed.
    pub fn train(
        &self,
        investor_id: Uuid,
        records: &[FeedbackRecord],
        version: u32,
    ) -> Result<ModelState> {
        let usable: Vec<&FeedbackRecord> = records
            .iter()
            .filter(|r| r.feature_snapshot.len() == FEATURE_VECTOR_SIZE)
            .collect();
        if usable.is_empty() {
            return Err(EngineError::TrainingEvaluation(
                "no feedback records carry a feature snapshot".to_string(),
            ));
        }

        // Group by session in first-seen chronological order so the holdout
        // is always the most recent activity.
        let mut group_order: Vec<Uuid> = Vec::new();
        let mut grouped: HashMap<Uuid, Vec<&FeedbackRecord>> = HashMap::new();
        for &record in &usable {
            grouped
                .entry(record.session_id)
                .or_insert_with(|| {
                    group_order.push(record.session_id);
                    Vec::new()
                })
                .push(record);
        }

        let holdout_count = if group_order.len() >= 5 {
            ((group_order.len() as f32 * self.config.holdout_fraction).floor() as usize).max(1)
        } else {
            0
        };
        let split = group_order.len() - holdout_count;

        let (means, stds) = feature_statistics(&usable);
        let build_groups = |sessions: &[Uuid]| -> Vec<LabeledGroup> {
            sessions
                .iter()
                .map(|session| LabeledGroup {
                    rows: grouped[session]
                        .iter()
                        .map(|r| {
                            (
                                standardize(&r.feature_snapshot, &means, &stds),
                                r.relevance_label(),
                            )
                        })
                        .collect(),
                })
                .collect()
        };
        let train_groups = build_groups(&group_order[..split]);
        // With too few sessions for a holdout, evaluate on the training
        // groups; the registry's non-regression check still applies.
        let eval_groups = if holdout_count > 0 {
            build_groups(&group_order[split..])
        } else {
            build_groups(&group_order)
        };

        let pairs = collect_pairs(&train_groups);
        if pairs.is_empty() {
            return Err(EngineError::TrainingEvaluation(
                "no label-ordered pairs in the training groups".to_string(),
            ));
        }
        debug!(
            investor_id = %investor_id,
            groups = group_order.len(),
            holdout_groups = eval_groups.len(),
            pairs = pairs.len(),
            "Fitting pairwise ensemble"
        );

        let ensemble: Vec<Vec<f32>> = (0..self.config.ensemble_size.max(1))
            .map(|member| {
                let seed = self.config.base_seed.wrapping_add(member as u64);
                self.fit_member(&pairs, seed)
            })
            .collect();

        let metrics = self.evaluate(&ensemble, &eval_groups)?;
        info!(
            investor_id = %investor_id,
            version,
            ndcg = metrics.ndcg,
            samples = usable.len(),
            "Trained candidate model"
        );

        Ok(ModelState {
            investor_id,
            version,
            feature_means: means,
            feature_stds: stds,
            ensemble,
            training_samples: usable.len(),
            last_trained_at: Utc::now(),
            metrics,
        })
    }

    /// Fit one member with pairwise logistic updates on a bootstrap resample
    /// of the pair set. Seeded, so retraining on identical data is
    /// reproducible.
    fn fit_member(&self, pairs: &[(&[f32], &[f32])], seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let sample: Vec<(&[f32], &[f32])> = (0..pairs.len())
            .map(|_| pairs[rng.gen_range(0..pairs.len())])
            .collect();

        let mut weights = vec![0.0f32; FEATURE_VECTOR_SIZE + 1];
        for _ in 0..self.config.epochs {
            for (preferred, other) in &sample {
                let margin = dot_with_bias(&weights, preferred) - dot_with_bias(&weights, other);
                let gradient_scale = self.config.learning_rate * sigmoid(-margin);
                for i in 0..FEATURE_VECTOR_SIZE {
                    weights[i] += gradient_scale * (preferred[i] - other[i]);
                }
            }
        }
        weights
    }

    /// NDCG at the configured cutoff, averaged over holdout groups with a
    /// non-zero ideal DCG. Gain 2^label - 1, log2 position discount.
    fn evaluate(&self, ensemble: &[Vec<f32>], groups: &[LabeledGroup]) -> Result<ModelMetrics> {
        let mut total = 0.0f32;
        let mut counted = 0usize;

        for group in groups {
            let ideal = ideal_dcg(&group.rows, self.config.ndcg_cutoff);
            if ideal <= 0.0 {
                continue;
            }

            let mut scored: Vec<(f32, u8)> = group
                .rows
                .iter()
                .map(|(features, label)| {
                    let mean = ensemble
                        .iter()
                        .map(|w| dot_with_bias(w, features))
                        .sum::<f32>()
                        / ensemble.len() as f32;
                    (mean, *label)
                })
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let dcg: f32 = scored
                .iter()
                .take(self.config.ndcg_cutoff)
                .enumerate()
                .map(|(i, (_, label))| gain(*label) / ((i + 2) as f32).log2())
                .sum();
            total += dcg / ideal;
            counted += 1;
        }

        if counted == 0 {
            return Err(EngineError::TrainingEvaluation(
                "no holdout group has graded relevance".to_string(),
            ));
        }
        let ndcg = total / counted as f32;
        if !ndcg.is_finite() || ndcg < 0.0 {
            return Err(EngineError::TrainingEvaluation(format!(
                "degenerate holdout metric: {ndcg}"
            )));
        }
        Ok(ModelMetrics {
            ndcg,
            holdout_groups: counted,
        })
    }
}

fn feature_statistics(records: &[&FeedbackRecord]) -> (Vec<f32>, Vec<f32>) {
    let n = records.len() as f32;
    let mut means = vec![0.0f32; FEATURE_VECTOR_SIZE];
    for record in records {
        for (i, v) in record.feature_snapshot.iter().enumerate() {
            means[i] += v / n;
        }
    }
    let mut stds = vec![0.0f32; FEATURE_VECTOR_SIZE];
    for record in records {
        for (i, v) in record.feature_snapshot.iter().enumerate() {
            stds[i] += (v - means[i]).powi(2) / n;
        }
    }
    for s in &mut stds {
        *s = s.sqrt();
    }
    (means, stds)
}

/// All (preferred, other) pairs where the first row carries a strictly higher
/// relevance label, within each query group.
fn collect_pairs(groups: &[LabeledGroup]) -> Vec<(&[f32], &[f32])> {
    let mut pairs = Vec::new();
    for group in groups {
        for (i, (fi, li)) in group.rows.iter().enumerate() {
            for (fj, lj) in group.rows.iter().skip(i + 1) {
                if li > lj {
                    pairs.push((fi.as_slice(), fj.as_slice()));
                } else if lj > li {
                    pairs.push((fj.as_slice(), fi.as_slice()));
                }
            }
        }
    }
    pairs
}

fn gain(label: u8) -> f32 {
    (1u32 << label) as f32 - 1.0
}

fn ideal_dcg(rows: &[(Vec<f32>, u8)], cutoff: usize) -> f32 {
    let mut labels: Vec<u8> = rows.iter().map(|(_, l)| *l).collect();
    labels.sort_unstable_by(|a, b| b.cmp(a));
    labels
        .iter()
        .take(cutoff)
        .enumerate()
        .map(|(i, label)| gain(*label) / ((i + 2) as f32).log2())
        .sum()
}
