//! SQLite-backed repository for `context_snapshots`.
//!
//! Grounded in the same shape as `memory::store::Store`: a thin wrapper
//! over dynamic `sqlx::query` calls, binding JSON columns as text.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ContextSnapshot, SemVer};

#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, snapshot: &ContextSnapshot) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO context_snapshots (
                id, user_id, major, minor, patch, trigger, parent_id,
                per_type_context_maps, checksum, timestamp, description, tags
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(snapshot.id.to_string())
        .bind(snapshot.user_id.to_string())
        .bind(snapshot.semver.major as i64)
        .bind(snapshot.semver.minor as i64)
        .bind(snapshot.semver.patch as i64)
        .bind(&snapshot.trigger)
        .bind(snapshot.parent_id.map(|id| id.to_string()))
        .bind(snapshot.per_type_context_maps.to_string())
        .bind(&snapshot.checksum)
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(&snapshot.description)
        .bind(serde_json::to_string(&snapshot.tags)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ContextSnapshot>> {
        let row = sqlx::query("SELECT * FROM context_snapshots WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_snapshot).transpose()
    }

    pub async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<ContextSnapshot>> {
        let row = sqlx::query("SELECT * FROM context_snapshots WHERE user_id = ? ORDER BY timestamp DESC LIMIT 1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_snapshot).transpose()
    }

    pub async fn history_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<ContextSnapshot>> {
        let rows = sqlx::query("SELECT * FROM context_snapshots WHERE user_id = ? ORDER BY timestamp DESC LIMIT ?")
            .bind(user_id.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_snapshot).collect()
    }

    /// Deletes the oldest rows for `user_id` past `cap`, the persisted
    /// counterpart to `snapshot::enforce_history_cap`'s drop-oldest policy.
    pub async fn enforce_history_cap(&self, user_id: Uuid, cap: usize) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM context_snapshots WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let excess = count.saturating_sub(cap as i64);
        if excess <= 0 {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"DELETE FROM context_snapshots WHERE id IN (
                SELECT id FROM context_snapshots WHERE user_id = ?
                ORDER BY timestamp ASC LIMIT ?
            )"#,
        )
        .bind(user_id.to_string())
        .bind(excess)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_snapshot(row: sqlx::sqlite::SqliteRow) -> Result<ContextSnapshot> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let per_type_context_maps: String = row.try_get("per_type_context_maps")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let tags: String = row.try_get("tags")?;

    Ok(ContextSnapshot {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| Error::Internal(e.to_string()))?,
        semver: SemVer {
            major: row.try_get::<i64, _>("major")? as u32,
            minor: row.try_get::<i64, _>("minor")? as u32,
            patch: row.try_get::<i64, _>("patch")? as u32,
        },
        trigger: row.try_get("trigger")?,
        parent_id: parent_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| Error::Internal(e.to_string()))?,
        per_type_context_maps: serde_json::from_str(&per_type_context_maps)?,
        checksum: row.try_get("checksum")?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| Error::Internal(e.to_string()))?
            .with_timezone(&Utc),
        description: row.try_get("description")?,
        tags: serde_json::from_str(&tags)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_store() -> SnapshotStore {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap().foreign_keys(false);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(opts).await.expect("in-memory sqlite");
        sqlx::migrate!("../../migrations").run(&pool).await.expect("migrations");
        SnapshotStore::from_pool(pool)
    }

    fn sample(user_id: Uuid, semver: SemVer, parent_id: Option<Uuid>) -> ContextSnapshot {
        ContextSnapshot {
            id: Uuid::new_v4(),
            user_id,
            semver,
            trigger: "test".to_string(),
            parent_id,
            per_type_context_maps: serde_json::json!({"temporal": {"tz": "UTC"}}),
            checksum: "deadbeef".to_string(),
            timestamp: Utc::now(),
            description: None,
            tags: vec!["a".to_string()],
        }
    }

    #[tokio::test]
    async fn insert_then_latest_round_trips() {
        let store = test_store().await;
        let user_id = Uuid::new_v4();
        let snapshot = sample(user_id, SemVer::INITIAL, None);
        store.insert(&snapshot).await.expect("insert");

        let latest = store.latest_for_user(user_id).await.expect("latest").expect("present");
        assert_eq!(latest.id, snapshot.id);
        assert_eq!(latest.checksum, "deadbeef");
        assert_eq!(latest.tags, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn history_cap_deletes_oldest_rows() {
        let store = test_store().await;
        let user_id = Uuid::new_v4();
        let mut semver = SemVer::INITIAL;
        for _ in 0..5 {
            let snapshot = sample(user_id, semver, None);
            store.insert(&snapshot).await.expect("insert");
            semver = semver.bump_patch();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let deleted = store.enforce_history_cap(user_id, 3).await.expect("enforce cap");
        assert_eq!(deleted, 2);

        let remaining = store.history_for_user(user_id, 10).await.expect("history");
        assert_eq!(remaining.len(), 3);
    }
}
