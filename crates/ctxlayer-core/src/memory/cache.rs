//! Read-through cache for active context records.
//!
//! Keyed by `(userId)` for the full active set and by `contextId` for a
//! single record. Any mutation invalidates both entries. Correctness never
//! depends on the cache -- it only bounds read staleness to its TTL
//! (spec.md §4.3 "Caching").

use std::time::Duration;
use uuid::Uuid;

use crate::types::ContextRecord;

#[derive(Clone)]
pub struct ContextCache {
    by_user: moka::sync::Cache<Uuid, Vec<ContextRecord>>,
    by_id: moka::sync::Cache<Uuid, ContextRecord>,
}

impl ContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_user: moka::sync::Cache::builder().time_to_live(ttl).build(),
            by_id: moka::sync::Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn get_user_set(&self, user_id: Uuid) -> Option<Vec<ContextRecord>> {
        self.by_user.get(&user_id)
    }

    pub fn put_user_set(&self, user_id: Uuid, records: Vec<ContextRecord>) {
        self.by_user.insert(user_id, records);
    }

    pub fn get_by_id(&self, context_id: Uuid) -> Option<ContextRecord> {
        self.by_id.get(&context_id)
    }

    pub fn put_by_id(&self, record: ContextRecord) {
        self.by_id.insert(record.id, record);
    }

    /// Invalidates both the per-record and per-user entries. Called after
    /// every mutation so the cache never outlives the source of truth
    /// beyond its TTL.
    pub fn invalidate(&self, context_id: Uuid, user_id: Uuid) {
        self.by_id.invalidate(&context_id);
        self.by_user.invalidate(&user_id);
    }
}
