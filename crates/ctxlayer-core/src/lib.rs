//! Context intelligence layer: tiered memory, temporal/spatial reasoning,
//! drift detection, assumption resolution, prompt composition, the
//! dual-path resolution bus, and snapshot/version management.

pub mod bus;
pub mod composer;
pub mod config;
pub mod drift;
pub mod error;
pub mod memory;
pub mod resolver;
pub mod snapshot;
pub mod spatial;
pub mod temporal;
pub mod traits;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use memory::{cache::ContextCache, store::Store, ContextMemory, MemoryConfig};
use snapshot::{store::SnapshotStore, SnapshotManager};

/// Composition root: wires the SQLite pool, cache, memory service, and
/// snapshot manager together from a `Config`, mirroring the explicit
/// dependency wiring called for in the redesign notes (no service
/// constructs its own collaborators).
pub struct Runtime {
    pub memory: ContextMemory,
    pub snapshots: SnapshotManager,
    pub config: Config,
}

impl Runtime {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        let store = Store::from_pool(pool.clone());
        let cache = ContextCache::new(config.cache_ttl);
        let memory_config = MemoryConfig {
            decay_threshold_hours: config.context_decay_hours,
            decay_factor: 0.95,
            ephemeral_ttl_seconds: config.ephemeral_context_ttl_seconds,
            conflict_strategy: memory::ConflictStrategy::default(),
        };
        let memory = ContextMemory::new(store, cache, memory_config);
        memory.initialize().await?;

        let snapshots = SnapshotManager::new(SnapshotStore::from_pool(pool), config.snapshot_history_cap);

        Ok(Self { memory, snapshots, config })
    }

    pub fn slow_path_deadline(&self) -> Duration {
        Duration::from_millis(self.config.slow_path_deadline_ms)
    }

    pub fn fast_path_target(&self) -> Duration {
        Duration::from_millis(self.config.fast_path_target_ms)
    }
}
