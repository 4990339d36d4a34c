// ============================================
// Feature & Criteria Providers
// ============================================
//
// Seams to the external feature-snapshot and criteria stores. The engine only
// reads through these traits; enrichment and criteria CRUD live elsewhere.

use crate::error::Result;
use crate::models::{InvestorCriteria, PropertyFeatures};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

/// Read-only access to per-property feature snapshots.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    /// Fetch the current snapshot for one property; `None` when upstream has
    /// nothing for it.
    async fn get_features(&self, property_id: Uuid) -> Result<Option<PropertyFeatures>>;

    /// Batch fetch. Missing properties are simply absent from the map.
    async fn batch_get_features(
        &self,
        property_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, PropertyFeatures>> {
        let mut result = HashMap::with_capacity(property_ids.len());
        for id in property_ids {
            if let Some(features) = self.get_features(*id).await? {
                result.insert(*id, features);
            }
        }
        Ok(result)
    }
}

/// Read-only access to investor criteria.
#[async_trait]
pub trait CriteriaProvider: Send + Sync {
    /// `None` means the investor has no saved criteria; callers fall back to
    /// `InvestorCriteria::default()`.
    async fn get_criteria(&self, investor_id: Uuid) -> Result<Option<InvestorCriteria>>;
}

/// In-process provider backing both traits. Used in tests and by deployments
/// that push snapshots into the engine instead of serving them remotely.
#[derive(Default)]
pub struct InMemoryPropertyStore {
    features: DashMap<Uuid, PropertyFeatures>,
    criteria: DashMap<Uuid, InvestorCriteria>,
}

impl InMemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_features(&self, features: PropertyFeatures) {
        self.features.insert(features.property_id, features);
    }

    pub fn upsert_criteria(&self, investor_id: Uuid, criteria: InvestorCriteria) {
        self.criteria.insert(investor_id, criteria);
    }

    pub fn property_count(&self) -> usize {
        self.features.len()
    }
}

#[async_trait]
impl FeatureProvider for InMemoryPropertyStore {
    async fn get_features(&self, property_id: Uuid) -> Result<Option<PropertyFeatures>> {
        Ok(self.features.get(&property_id).map(|f| f.clone()))
    }
}

#[async_trait]
impl CriteriaProvider for InMemoryPropertyStore {
    async fn get_criteria(&self, investor_id: Uuid) -> Result<Option<InvestorCriteria>> {
        Ok(self.criteria.get(&investor_id).map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features(property_id: Uuid) -> PropertyFeatures {
        PropertyFeatures {
            property_id,
            county: "harris".to_string(),
            asking_price: 120_000.0,
            estimated_value: 150_000.0,
            square_feet: 1_200.0,
            monthly_cash_flow: 200.0,
            walk_score: 40.0,
            transit_score: 30.0,
            year_built: 1985,
            photo_count: 4,
            six_month_price_trend: 0.01,
            rental_trend: 0.0,
            tax_burden_ratio: 0.02,
            flood_zone: false,
            structural_concerns: false,
            days_on_market: 60.0,
            snapshot_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn batch_get_skips_missing_properties() {
        let store = InMemoryPropertyStore::new();
        let known = Uuid::new_v4();
        let unknown = Uuid::new_v4();
        store.upsert_features(features(known));

        let map = store
            .batch_get_features(&[known, unknown])
            .await
            .expect("batch get");
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&known));
    }

    #[tokio::test]
    async fn criteria_lookup_returns_none_when_absent() {
        let store = InMemoryPropertyStore::new();
        let investor = Uuid::new_v4();
        assert!(store
            .get_criteria(investor)
            .await
            .expect("lookup")
            .is_none());

        store.upsert_criteria(investor, InvestorCriteria::default());
        assert!(store.get_criteria(investor).await.expect("lookup").is_some());
    }
}
