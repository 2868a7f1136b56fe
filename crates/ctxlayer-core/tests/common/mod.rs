//! Shared fixture for integration tests: an in-memory SQLite-backed
//! `ContextMemory` with migrations already applied.

use std::time::Duration;

use ctxlayer_core::memory::{cache::ContextCache, store::Store, ContextMemory, MemoryConfig};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

pub struct TestFixture {
    pub memory: ContextMemory,
}

impl TestFixture {
    pub async fn new() -> Self {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap().foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("in-memory sqlite pool");

        let store = Store::from_pool(pool);
        store.initialize().await.expect("run migrations");

        let cache = ContextCache::new(Duration::from_secs(300));
        let memory = ContextMemory::new(store, cache, MemoryConfig::default());

        Self { memory }
    }
}
