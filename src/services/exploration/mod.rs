/// Exploration Selector
///
/// Counteracts the feedback loop: a model trained only on what it already
/// surfaces narrows over time. Each ranking batch reserves a small budget of
/// slots for properties picked by uncertainty, diversity, and novelty
/// heuristics. Exploration annotates; it never changes scores or ordering.
use crate::config::ExplorationConfig;
use crate::models::{
    ExplorationOutcome, ExplorationRecord, ExplorationStrategy, FEATURE_VECTOR_SIZE,
};
use crate::utils::{cosine_similarity, percentile};
use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Per-strategy slot counts for one batch. Always sums to the requested
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyBudget {
    pub uncertainty: usize,
    pub diversity: usize,
    pub novelty: usize,
}

impl StrategyBudget {
    /// Split `n` slots across strategies. New investors (thin history) lean
    /// on diversity and novelty; experienced investors lean on uncertainty,
    /// where the model itself says where it is blind.
    pub fn allocate(n: usize, history_len: usize, config: &ExplorationConfig) -> Self {
        let new_investor = history_len < config.new_investor_threshold;
        let (shares, priority) = if new_investor {
            (
                [0.2f32, 0.4, 0.4],
                [
                    ExplorationStrategy::Diversity,
                    ExplorationStrategy::Novelty,
                    ExplorationStrategy::Uncertainty,
                ],
            )
        } else {
            (
                [0.5f32, 0.3, 0.2],
                [
                    ExplorationStrategy::Uncertainty,
                    ExplorationStrategy::Diversity,
                    ExplorationStrategy::Novelty,
                ],
            )
        };

        // [uncertainty, diversity, novelty]
        let mut counts = [
            (shares[0] * n as f32).floor() as usize,
            (shares[1] * n as f32).floor() as usize,
            (shares[2] * n as f32).floor() as usize,
        ];
        let mut remainder = n - (counts[0] + counts[1] + counts[2]);
        let mut cursor = 0;
        while remainder > 0 {
            counts[strategy_index(priority[cursor % 3])] += 1;
            remainder -= 1;
            cursor += 1;
        }

        Self {
            uncertainty: counts[0],
            diversity: counts[1],
            novelty: counts[2],
        }
    }

    pub fn total(&self) -> usize {
        self.uncertainty + self.diversity + self.novelty
    }

    fn get(&self, strategy: ExplorationStrategy) -> usize {
        match strategy {
            ExplorationStrategy::Uncertainty => self.uncertainty,
            ExplorationStrategy::Diversity => self.diversity,
            ExplorationStrategy::Novelty => self.novelty,
        }
    }
}

fn strategy_index(strategy: ExplorationStrategy) -> usize {
    match strategy {
        ExplorationStrategy::Uncertainty => 0,
        ExplorationStrategy::Diversity => 1,
        ExplorationStrategy::Novelty => 2,
    }
}

/// Scored candidate offered to the selector, in batch order.
#[derive(Debug, Clone)]
pub struct ExplorationCandidate {
    pub property_id: Uuid,
    pub score: f32,
    pub uncertainty: f32,
    pub risk_flag_count: usize,
    pub features: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ExplorationPick {
    pub property_id: Uuid,
    pub strategy: ExplorationStrategy,
    /// Strategy-specific magnitude: uncertainty value, centroid distance, or
    /// rare-dimension fraction.
    pub expected_gain: f32,
}

pub struct ExplorationSelector {
    config: ExplorationConfig,
}

impl ExplorationSelector {
    pub fn new(config: ExplorationConfig) -> Self {
        Self { config }
    }

    /// Pick up to `n` exploration properties from the batch.
    ///
    /// Safety first: candidates over the risk-flag ceiling are never
    /// explored. Strategies fill their allocated slots in priority order and
    /// unused slots spill over to the next strategy, so the budget is spent
    /// whenever enough eligible candidates exist.
    pub fn select(
        &self,
        candidates: &[ExplorationCandidate],
        history_len: usize,
        positive_centroid: Option<&[f32]>,
        n: usize,
        seed: u64,
    ) -> Vec<ExplorationPick> {
        if n == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let eligible: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.risk_flag_count <= self.config.max_risk_flags)
            .map(|(i, _)| (i, rng.gen::<f32>()))
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let budget = StrategyBudget::allocate(n.min(eligible.len()), history_len, &self.config);
        let priority = if history_len < self.config.new_investor_threshold {
            [
                ExplorationStrategy::Diversity,
                ExplorationStrategy::Novelty,
                ExplorationStrategy::Uncertainty,
            ]
        } else {
            [
                ExplorationStrategy::Uncertainty,
                ExplorationStrategy::Diversity,
                ExplorationStrategy::Novelty,
            ]
        };

        // Rare-value thresholds over the eligible pool, one per dimension.
        let novelty_floor = self.novelty_floor(candidates, &eligible);

        let ranked_lists: Vec<(ExplorationStrategy, Vec<ExplorationPick>)> = priority
            .into_iter()
            .map(|strategy| {
                (
                    strategy,
                    self.rank_for(
                        strategy,
                        candidates,
                        &eligible,
                        positive_centroid,
                        &novelty_floor,
                    ),
                )
            })
            .collect();

        let target = budget.total();
        let mut picks: Vec<ExplorationPick> = Vec::with_capacity(target);
        let mut taken: HashSet<Uuid> = HashSet::new();

        for (strategy, ranked) in &ranked_lists {
            let quota = budget.get(*strategy);
            let mut filled = 0usize;
            for pick in ranked {
                if filled == quota {
                    break;
                }
                if taken.insert(pick.property_id) {
                    picks.push(pick.clone());
                    filled += 1;
                }
            }
        }

        // Unfilled quota cycles through every strategy in priority order, so
        // the budget is spent whenever enough eligible candidates remain.
        while picks.len() < target {
            let before = picks.len();
            for (_, ranked) in &ranked_lists {
                if picks.len() == target {
                    break;
                }
                if let Some(pick) = ranked.iter().find(|p| !taken.contains(&p.property_id)) {
                    taken.insert(pick.property_id);
                    picks.push(pick.clone());
                }
            }
            if picks.len() == before {
                break;
            }
        }

        debug!(
            requested = n,
            picked = picks.len(),
            eligible = eligible.len(),
            "Selected exploration set"
        );
        picks
    }

    /// Candidates ordered best-first for one strategy. Jitter breaks ties so
    /// equal-valued candidates rotate between batches with the seed.
    fn rank_for(
        &self,
        strategy: ExplorationStrategy,
        candidates: &[ExplorationCandidate],
        eligible: &[(usize, f32)],
        positive_centroid: Option<&[f32]>,
        novelty_floor: &[f32],
    ) -> Vec<ExplorationPick> {
        let mut scored: Vec<(f32, f32, ExplorationPick)> = match strategy {
            ExplorationStrategy::Uncertainty => {
                // The confident head of the batch is off limits: uncertainty
                // sampling targets the mid-field the model cannot place.
                let mut by_score: Vec<usize> = eligible.iter().map(|(i, _)| *i).collect();
                by_score.sort_by(|a, b| {
                    candidates[*b]
                        .score
                        .partial_cmp(&candidates[*a].score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let confident: HashSet<usize> =
                    by_score.iter().take(self.config.confident_top_n).copied().collect();

                eligible
                    .iter()
                    .filter(|(i, _)| !confident.contains(i))
                    .map(|(i, jitter)| {
                        let c = &candidates[*i];
                        (
                            c.uncertainty,
                            *jitter,
                            ExplorationPick {
                                property_id: c.property_id,
                                strategy,
                                expected_gain: c.uncertainty,
                            },
                        )
                    })
                    .collect()
            }
            ExplorationStrategy::Diversity => eligible
                .iter()
                .map(|(i, jitter)| {
                    let c = &candidates[*i];
                    let distance = match positive_centroid {
                        Some(centroid) => 1.0 - cosine_similarity(&c.features, centroid),
                        // No positive history yet: any candidate widens the
                        // picture equally, so the jitter decides.
                        None => 0.0,
                    };
                    (
                        distance,
                        *jitter,
                        ExplorationPick {
                            property_id: c.property_id,
                            strategy,
                            expected_gain: distance,
                        },
                    )
                })
                .collect(),
            ExplorationStrategy::Novelty => eligible
                .iter()
                .filter_map(|(i, jitter)| {
                    let c = &candidates[*i];
                    let rare = c
                        .features
                        .iter()
                        .zip(novelty_floor.iter())
                        .filter(|(v, floor)| **v < **floor)
                        .count();
                    if rare == 0 {
                        return None;
                    }
                    let fraction = rare as f32 / FEATURE_VECTOR_SIZE as f32;
                    Some((
                        fraction,
                        *jitter,
                        ExplorationPick {
                            property_id: c.property_id,
                            strategy,
                            expected_gain: fraction,
                        },
                    ))
                })
                .collect(),
        };

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        });
        scored.into_iter().map(|(_, _, pick)| pick).collect()
    }

    /// Per-dimension low-tail threshold over the eligible pool.
    fn novelty_floor(
        &self,
        candidates: &[ExplorationCandidate],
        eligible: &[(usize, f32)],
    ) -> Vec<f32> {
        (0..FEATURE_VECTOR_SIZE)
            .map(|dim| {
                let values: Vec<f32> = eligible
                    .iter()
                    .filter_map(|(i, _)| candidates[*i].features.get(dim).copied())
                    .collect();
                percentile(&values, self.config.novelty_percentile)
            })
            .collect()
    }
}

/// Append-only log of exploration events, so exploration can be held
/// accountable against later feedback.
#[derive(Default)]
pub struct ExplorationLog {
    records: DashMap<Uuid, Arc<Mutex<Vec<ExplorationRecord>>>>,
}

impl ExplorationLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, investor_id: Uuid) -> Arc<Mutex<Vec<ExplorationRecord>>> {
        self.records
            .entry(investor_id)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    pub async fn append(&self, record: ExplorationRecord) {
        let log = self.log(record.investor_id);
        log.lock().await.push(record);
    }

    pub async fn for_investor(&self, investor_id: Uuid) -> Vec<ExplorationRecord> {
        match self.records.get(&investor_id) {
            Some(log) => {
                let log = Arc::clone(&log);
                let guard = log.lock().await;
                guard.clone()
            }
            None => Vec::new(),
        }
    }

    /// Attribute later feedback to the most recent open exploration of the
    /// property. Returns whether a record was closed.
    pub async fn record_outcome(
        &self,
        investor_id: Uuid,
        property_id: Uuid,
        outcome: ExplorationOutcome,
    ) -> bool {
        let log = match self.records.get(&investor_id) {
            Some(log) => Arc::clone(&log),
            None => return false,
        };
        let mut guard = log.lock().await;
        for record in guard.iter_mut().rev() {
            if record.property_id == property_id && record.outcome.is_none() {
                record.outcome = Some(outcome);
                return true;
            }
        }
        false
    }
}

/// Build the permanent record for one pick.
pub fn record_for_pick(investor_id: Uuid, pick: &ExplorationPick) -> ExplorationRecord {
    ExplorationRecord {
        id: Uuid::new_v4(),
        property_id: pick.property_id,
        investor_id,
        strategy: pick.strategy,
        expected_gain: pick.expected_gain,
        outcome: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(score: f32, uncertainty: f32, risk_flags: usize) -> ExplorationCandidate {
        ExplorationCandidate {
            property_id: Uuid::new_v4(),
            score,
            uncertainty,
            risk_flag_count: risk_flags,
            features: vec![score / 100.0; FEATURE_VECTOR_SIZE],
        }
    }

    #[test]
    fn budget_always_sums_to_requested() {
        let config = ExplorationConfig::default();
        for n in [0usize, 1, 2, 3, 5, 7, 20] {
            for history in [0usize, 5, 19, 20, 100] {
                let budget = StrategyBudget::allocate(n, history, &config);
                assert_eq!(budget.total(), n, "n={n} history={history}");
            }
        }
    }

    #[test]
    fn new_investors_favor_discovery_strategies() {
        let config = ExplorationConfig::default();
        let new = StrategyBudget::allocate(10, 0, &config);
        assert!(new.diversity + new.novelty > new.uncertainty);

        let experienced = StrategyBudget::allocate(10, 50, &config);
        assert!(experienced.uncertainty >= experienced.diversity);
        assert!(experienced.uncertainty >= experienced.novelty);
    }

    #[test]
    fn risky_candidates_are_never_picked() {
        let selector = ExplorationSelector::new(ExplorationConfig::default());
        let candidates: Vec<ExplorationCandidate> = (0..8)
            .map(|i| candidate(50.0 + i as f32, 0.8, 3))
            .collect();
        let picks = selector.select(&candidates, 0, None, 3, 7);
        assert!(picks.is_empty());
    }

    #[test]
    fn picks_are_unique_and_within_budget() {
        let selector = ExplorationSelector::new(ExplorationConfig::default());
        let candidates: Vec<ExplorationCandidate> = (0..30)
            .map(|i| candidate(30.0 + 2.0 * i as f32, 0.1 + 0.02 * i as f32, i % 3))
            .collect();
        let picks = selector.select(&candidates, 50, None, 5, 11);
        assert!(picks.len() <= 5);
        let unique: HashSet<Uuid> = picks.iter().map(|p| p.property_id).collect();
        assert_eq!(unique.len(), picks.len());
    }

    #[test]
    fn unfillable_strategy_quota_spills_to_others() {
        let selector = ExplorationSelector::new(ExplorationConfig::default());
        // Identical feature vectors, so novelty can never qualify a candidate
        // and its slot must be covered by the other strategies.
        let candidates: Vec<ExplorationCandidate> = (0..20)
            .map(|i| {
                let mut c = candidate(30.0 + i as f32, 0.1 + 0.01 * i as f32, 0);
                c.features = vec![1.0; FEATURE_VECTOR_SIZE];
                c
            })
            .collect();
        let picks = selector.select(&candidates, 50, None, 5, 13);
        assert_eq!(picks.len(), 5);
        assert!(picks
            .iter()
            .all(|p| p.strategy != ExplorationStrategy::Novelty));
    }

    #[test]
    fn selection_is_deterministic_for_a_seed() {
        let selector = ExplorationSelector::new(ExplorationConfig::default());
        let candidates: Vec<ExplorationCandidate> = (0..20)
            .map(|i| candidate(40.0 + i as f32, 0.3, 0))
            .collect();
        let a = selector.select(&candidates, 50, None, 4, 99);
        let b = selector.select(&candidates, 50, None, 4, 99);
        let ids_a: Vec<Uuid> = a.iter().map(|p| p.property_id).collect();
        let ids_b: Vec<Uuid> = b.iter().map(|p| p.property_id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn uncertainty_sampling_skips_the_confident_head() {
        let config = ExplorationConfig {
            confident_top_n: 10,
            ..Default::default()
        };
        let selector = ExplorationSelector::new(config);
        // 12 candidates; the two lowest-scored are the only ones outside the
        // confident head, and one of them is the most uncertain overall.
        let mut candidates: Vec<ExplorationCandidate> = (0..10)
            .map(|i| candidate(80.0 + i as f32, 0.9, 0))
            .collect();
        let tail_a = candidate(10.0, 0.7, 0);
        let tail_b = candidate(12.0, 0.2, 0);
        candidates.push(tail_a.clone());
        candidates.push(tail_b.clone());

        // Experienced history so uncertainty gets slots first.
        let picks = selector.select(&candidates, 50, None, 1, 3);
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].property_id, tail_a.property_id);
        assert_eq!(picks[0].strategy, ExplorationStrategy::Uncertainty);
    }

    #[test]
    fn novelty_finds_the_rare_candidate() {
        let selector = ExplorationSelector::new(ExplorationConfig::default());
        let mut candidates: Vec<ExplorationCandidate> = (0..20)
            .map(|_| {
                let mut c = candidate(50.0, 0.0, 0);
                c.features = vec![1.0; FEATURE_VECTOR_SIZE];
                c
            })
            .collect();
        let mut rare = candidate(50.0, 0.0, 0);
        rare.features = vec![-5.0; FEATURE_VECTOR_SIZE];
        let rare_id = rare.property_id;
        candidates.push(rare);

        // New investor, budget 3: diversity 2, novelty 1. The centroid sits
        // on the rare candidate, so diversity prefers the common ones and
        // only novelty can surface the outlier.
        let centroid = vec![-5.0f32; FEATURE_VECTOR_SIZE];
        let picks = selector.select(&candidates, 0, Some(&centroid), 3, 5);
        assert_eq!(picks.len(), 3);
        assert!(picks.iter().any(|p| p.property_id == rare_id
            && p.strategy == ExplorationStrategy::Novelty));
    }

    #[tokio::test]
    async fn outcome_attribution_closes_latest_open_record() {
        let log = ExplorationLog::new();
        let investor = Uuid::new_v4();
        let property = Uuid::new_v4();

        let pick = ExplorationPick {
            property_id: property,
            strategy: ExplorationStrategy::Diversity,
            expected_gain: 0.4,
        };
        log.append(record_for_pick(investor, &pick)).await;
        log.append(record_for_pick(investor, &pick)).await;

        assert!(log
            .record_outcome(investor, property, ExplorationOutcome::Positive)
            .await);
        let records = log.for_investor(investor).await;
        assert_eq!(records[0].outcome, None);
        assert_eq!(records[1].outcome, Some(ExplorationOutcome::Positive));

        // Second attribution closes the remaining record.
        assert!(log
            .record_outcome(investor, property, ExplorationOutcome::Negative)
            .await);
        assert!(!log
            .record_outcome(investor, property, ExplorationOutcome::Positive)
            .await);
    }
}
