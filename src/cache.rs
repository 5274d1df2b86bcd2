//! In-process TTL cache for the read path.
//!
//! Latency-only: the pipeline never depends on cached state for correctness.
//! The batch path calls `invalidate_all` after every successful run.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::types::{Explanation, MoveEvent};

const MAX_EXPLANATION_ENTRIES: usize = 10_000;

struct Stamped<T> {
    value: T,
    stored_at: Instant,
}

pub struct EventCache {
    ttl: Duration,
    /// Latest-events lists, keyed by requested limit.
    events: RwLock<HashMap<u32, Stamped<Vec<MoveEvent>>>>,
    explanations: RwLock<HashMap<i64, Stamped<Explanation>>>,
}

impl EventCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            events: RwLock::new(HashMap::new()),
            explanations: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh<T>(&self, entry: &Stamped<T>) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    pub async fn latest_events(&self, limit: u32) -> Option<Vec<MoveEvent>> {
        let events = self.events.read().await;
        events
            .get(&limit)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.value.clone())
    }

    pub async fn put_latest_events(&self, limit: u32, value: Vec<MoveEvent>) {
        let mut events = self.events.write().await;
        events.insert(
            limit,
            Stamped {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn explanation(&self, event_id: i64) -> Option<Explanation> {
        let explanations = self.explanations.read().await;
        explanations
            .get(&event_id)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.value.clone())
    }

    pub async fn put_explanation(&self, explanation: Explanation) {
        let mut explanations = self.explanations.write().await;
        if explanations.len() >= MAX_EXPLANATION_ENTRIES {
            // Drop stale entries first; clear outright if still full.
            let ttl = self.ttl;
            explanations.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            if explanations.len() >= MAX_EXPLANATION_ENTRIES {
                explanations.clear();
            }
        }
        explanations.insert(
            explanation.event_id,
            Stamped {
                value: explanation,
                stored_at: Instant::now(),
            },
        );
    }

    /// Called by the batch path after a successful run.
    pub async fn invalidate_all(&self) {
        self.events.write().await.clear();
        self.explanations.write().await.clear();
    }
}
