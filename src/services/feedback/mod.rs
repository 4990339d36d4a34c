// ============================================
// Feedback Store
// ============================================
//
// Append-only per-investor log of ranking actions. Records are immutable once
// written; training reads a point-in-time snapshot, never the live log.

use crate::models::FeedbackRecord;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
pub struct FeedbackStore {
    logs: DashMap<Uuid, Arc<Mutex<Vec<FeedbackRecord>>>>,
}

impl FeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, investor_id: Uuid) -> Arc<Mutex<Vec<FeedbackRecord>>> {
        self.logs
            .entry(investor_id)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Append one record to the investor's log.
    pub async fn append(&self, record: FeedbackRecord) {
        let log = self.log(record.investor_id);
        let mut guard = log.lock().await;
        debug!(
            investor_id = %record.investor_id,
            property_id = %record.property_id,
            feedback_type = record.feedback_type.as_str(),
            "Recorded feedback"
        );
        guard.push(record);
    }

    /// Point-in-time copy of the investor's full log, in append order.
    pub async fn snapshot(&self, investor_id: Uuid) -> Vec<FeedbackRecord> {
        match self.logs.get(&investor_id) {
            Some(log) => {
                let log = Arc::clone(&log);
                let guard = log.lock().await;
                guard.clone()
            }
            None => Vec::new(),
        }
    }

    pub async fn count(&self, investor_id: Uuid) -> usize {
        match self.logs.get(&investor_id) {
            Some(log) => {
                let log = Arc::clone(&log);
                let guard = log.lock().await;
                guard.len()
            }
            None => 0,
        }
    }
}
