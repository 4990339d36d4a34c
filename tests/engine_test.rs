// End-to-end engine flow: cold-start rule ranking, feedback accumulation,
// training with activation, and personalized re-ranking.

use attention_ranking_service::config::EngineConfig;
use attention_ranking_service::models::{FeedbackMetadata, PropertyFeatures};
use attention_ranking_service::services::features::InMemoryPropertyStore;
use attention_ranking_service::services::{CriteriaProvider, FeatureProvider, RankingOrchestrator};
use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn property(cash_flow: f32, trend: f32) -> PropertyFeatures {
    PropertyFeatures {
        property_id: Uuid::new_v4(),
        county: "bexar".to_string(),
        asking_price: 180_000.0,
        estimated_value: 210_000.0,
        square_feet: 1_400.0,
        monthly_cash_flow: cash_flow,
        walk_score: 55.0,
        transit_score: 45.0,
        year_built: 1990,
        photo_count: 10,
        six_month_price_trend: trend,
        rental_trend: 0.01,
        tax_burden_ratio: 0.02,
        flood_zone: false,
        structural_concerns: false,
        days_on_market: 50.0,
        snapshot_at: Utc::now(),
    }
}

struct Fixture {
    engine: RankingOrchestrator,
    strong_ids: Vec<Uuid>,
    weak_ids: Vec<Uuid>,
}

/// Ten strong cash-flow properties and ten weak ones, so an investor who
/// keeps the strong side produces cleanly separable training data.
fn fixture() -> Fixture {
    init_tracing();
    let store = Arc::new(InMemoryPropertyStore::new());
    let strong_ids: Vec<Uuid> = (0..10)
        .map(|i| {
            let features = property(700.0 + 20.0 * i as f32, 0.05);
            let id = features.property_id;
            store.upsert_features(features);
            id
        })
        .collect();
    let weak_ids: Vec<Uuid> = (0..10)
        .map(|i| {
            let features = property(-50.0 + 10.0 * i as f32, -0.01);
            let id = features.property_id;
            store.upsert_features(features);
            id
        })
        .collect();
    let engine = RankingOrchestrator::new(
        Arc::clone(&store) as Arc<dyn FeatureProvider>,
        store as Arc<dyn CriteriaProvider>,
        EngineConfig::default(),
    );
    Fixture {
        engine,
        strong_ids,
        weak_ids,
    }
}

#[tokio::test]
async fn cold_start_serves_rule_scores_for_everyone() {
    let fx = fixture();
    let investor = Uuid::new_v4();
    let all: Vec<Uuid> = fx
        .strong_ids
        .iter()
        .chain(fx.weak_ids.iter())
        .copied()
        .collect();

    let batch = fx.engine.rank(investor, &all, false).await.expect("rank");
    assert_eq!(batch.items.len(), 20);
    assert_eq!(batch.stats.model_version, "rules");
    assert!(batch.items.iter().all(|i| i.model_version == "rules"));

    let status = fx.engine.get_model_status(investor);
    assert!(!status.is_trained);
    assert_eq!(status.training_samples, 0);
}

#[tokio::test]
async fn feedback_loop_trains_and_personalizes() {
    let fx = fixture();
    let investor = Uuid::new_v4();
    let all: Vec<Uuid> = fx
        .strong_ids
        .iter()
        .chain(fx.weak_ids.iter())
        .copied()
        .collect();

    // Five ranking sessions; 6 keeps and 4 bids on the strong side, 15
    // passes on the weak side. 25 records, 40% positive.
    for session in 0..5usize {
        let batch = fx.engine.rank(investor, &all, false).await.expect("rank");
        let metadata = || FeedbackMetadata {
            session_id: Some(batch.session_id),
            seconds_viewed: 20.0,
            ..Default::default()
        };
        fx.engine
            .record_feedback(investor, fx.strong_ids[session * 2], "keep", metadata())
            .await
            .expect("keep");
        let second_action = if session < 4 { "bid" } else { "keep" };
        fx.engine
            .record_feedback(
                investor,
                fx.strong_ids[session * 2 + 1],
                second_action,
                metadata(),
            )
            .await
            .expect("second action");
        for i in 0..3 {
            fx.engine
                .record_feedback(investor, fx.weak_ids[(session * 3 + i) % 10], "pass", metadata())
                .await
                .expect("pass");
        }
    }

    let outcome = fx.engine.train(investor, None).await.expect("train");
    assert!(outcome.trained, "deferred: {:?}", outcome.reason);
    let metrics = outcome.metrics.expect("metrics");
    assert!(metrics.ndcg > 0.5);

    let status = fx.engine.get_model_status(investor);
    assert!(status.is_trained);
    assert_eq!(status.training_samples, 25);
    assert_eq!(status.model_version, "personalized-v1");

    let batch = fx.engine.rank(investor, &all, false).await.expect("rank");
    assert_eq!(batch.stats.model_version, "personalized-v1");
    assert!(batch
        .items
        .iter()
        .all(|i| i.model_version == "personalized-v1"));

    // The learned model must put the strong side ahead of the weak side.
    let top_half: Vec<Uuid> = batch.items[..10].iter().map(|i| i.property_id).collect();
    let strong_in_top = top_half
        .iter()
        .filter(|id| fx.strong_ids.contains(id))
        .count();
    assert!(strong_in_top >= 8, "strong in top half: {strong_in_top}");
}

#[tokio::test]
async fn training_below_gate_leaves_rules_active() {
    let fx = fixture();
    let investor = Uuid::new_v4();
    let batch = fx
        .engine
        .rank(investor, &fx.strong_ids, false)
        .await
        .expect("rank");

    for id in fx.strong_ids.iter().take(5) {
        fx.engine
            .record_feedback(
                investor,
                *id,
                "keep",
                FeedbackMetadata {
                    session_id: Some(batch.session_id),
                    ..Default::default()
                },
            )
            .await
            .expect("feedback");
    }

    let outcome = fx.engine.train(investor, None).await.expect("train");
    assert!(!outcome.trained);
    assert!(outcome.reason.is_some());
    assert_eq!(fx.engine.get_model_status(investor).model_version, "rules");
}

#[tokio::test]
async fn exploration_flags_never_change_the_order() {
    let fx = fixture();
    let investor = Uuid::new_v4();
    let all: Vec<Uuid> = fx
        .strong_ids
        .iter()
        .chain(fx.weak_ids.iter())
        .copied()
        .collect();

    let plain = fx
        .engine
        .rank_seeded(investor, &all, false, 17)
        .await
        .expect("rank");
    let explored = fx
        .engine
        .rank_seeded(investor, &all, true, 17)
        .await
        .expect("rank");

    let plain_ids: Vec<Uuid> = plain.items.iter().map(|i| i.property_id).collect();
    let explored_ids: Vec<Uuid> = explored.items.iter().map(|i| i.property_id).collect();
    assert_eq!(plain_ids, explored_ids);
    assert!(explored.stats.exploration_count > 0);

    for item in explored.items.iter().filter(|i| i.is_exploration) {
        assert!(item.exploration_strategy.is_some());
    }
}
