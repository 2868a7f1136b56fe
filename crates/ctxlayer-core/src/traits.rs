//! Narrow interfaces consumers depend on, so callers of the memory
//! service can depend on a read/write seam instead of the concrete
//! `ContextMemory` type.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{ContextRecord, ContextType, Source};

#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub context_type: Option<ContextType>,
    pub include_expired: bool,
}

/// Read-only view of a user's active context, as seen by the resolver and
/// composer.
#[async_trait]
pub trait ContextReader: Send + Sync {
    async fn get_by_user_and_type(
        &self,
        user_id: Uuid,
        context_type: ContextType,
    ) -> Result<Vec<ContextRecord>>;

    async fn list_for_user(&self, user_id: Uuid, filters: ListFilters) -> Result<Vec<ContextRecord>>;

    async fn get_by_id(&self, context_id: Uuid) -> Result<Option<ContextRecord>>;
}

/// Mutating view of context, as seen by inference/write paths that never
/// need the full memory-service surface (decay, rollback, etc).
#[async_trait]
pub trait ContextWriter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn store(
        &self,
        user_id: Uuid,
        context_type: ContextType,
        key: &str,
        value: serde_json::Value,
        tier: crate::types::Tier,
        confidence: f64,
        source: Source,
    ) -> Result<ContextRecord>;
}
