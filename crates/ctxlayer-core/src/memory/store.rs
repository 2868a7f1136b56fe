//! SQLite-backed repository for context records and their version history.
//!
//! Grounded in the teacher's `database/mod.rs`: a thin wrapper around a
//! connection pool using dynamic `sqlx::query` (not compile-time-checked
//! macros) so the crate builds without a live database at compile time.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ContextRecord, ContextType, ContextVersion, DriftStatus, Source, Tier};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("failed to run migrations: {e}")))?;
        Ok(())
    }

    pub async fn find_active(
        &self,
        user_id: Uuid,
        context_type: ContextType,
        key: &str,
    ) -> Result<Option<ContextRecord>> {
        let row = sqlx::query(
            "SELECT * FROM contexts WHERE user_id = ? AND type = ? AND key = ? AND is_active = 1",
        )
        .bind(user_id.to_string())
        .bind(context_type.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }

    pub async fn get_by_id(&self, context_id: Uuid) -> Result<Option<ContextRecord>> {
        let row = sqlx::query("SELECT * FROM contexts WHERE id = ?")
            .bind(context_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        context_type: Option<ContextType>,
        tier: Option<Tier>,
        include_expired: bool,
    ) -> Result<Vec<ContextRecord>> {
        let mut sql = "SELECT * FROM contexts WHERE user_id = ? AND is_active = 1".to_string();
        if context_type.is_some() {
            sql.push_str(" AND type = ?");
        }
        if tier.is_some() {
            sql.push_str(" AND tier = ?");
        }

        let mut query = sqlx::query(&sql).bind(user_id.to_string());
        if let Some(t) = context_type {
            query = query.bind(t.as_str());
        }
        if let Some(t) = tier {
            query = query.bind(t.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let now = Utc::now();
        let mut records = Vec::new();
        for row in rows {
            let record = row_to_record(row)?;
            if !include_expired && record.is_expired(now) {
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Inserts a brand-new active record with version 1 and its initial
    /// version row, atomically.
    pub async fn insert(&self, record: &ContextRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO contexts (
                id, user_id, type, tier, key, value, interpretation, confidence,
                source, source_details, drift_status, expires_at, last_confirmed_at,
                correction_count, session_id, is_active, version, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.context_type.as_str())
        .bind(record.tier.as_str())
        .bind(&record.key)
        .bind(record.value.to_string())
        .bind(record.interpretation.as_ref().map(|v| v.to_string()))
        .bind(record.confidence)
        .bind(record.source.as_str())
        .bind(record.source_details.as_ref().map(|v| v.to_string()))
        .bind(record.drift_status.as_str())
        .bind(record.expires_at.map(|t| t.to_rfc3339()))
        .bind(record.last_confirmed_at.map(|t| t.to_rfc3339()))
        .bind(record.correction_count as i64)
        .bind(&record.session_id)
        .bind(record.is_active)
        .bind(record.version as i64)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        insert_version_tx(
            &mut tx,
            record.id,
            record.version,
            &record.value,
            record.interpretation.as_ref(),
            record.confidence,
            None,
            record.source,
            None,
            record.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Reads the current max version for a context under a transaction,
    /// applies `mutate`, writes the updated row, and appends `max+1` as a
    /// new version -- atomic so a partial write is never observable
    /// (spec.md §4.3 Update contract, §5 ordering guarantees).
    #[allow(clippy::too_many_arguments)]
    pub async fn update_with_new_version(
        &self,
        context_id: Uuid,
        new_value: Option<Value>,
        new_confidence: Option<f64>,
        new_interpretation: Option<Value>,
        new_drift_status: Option<DriftStatus>,
        new_correction_count: Option<u32>,
        new_last_confirmed_at: Option<DateTime<Utc>>,
        source: Source,
        change_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ContextRecord> {
        let mut tx = self.pool.begin().await?;

        // SQLite has no row-level FOR UPDATE; the transaction itself plus
        // single-writer semantics is what serializes concurrent updates to
        // the same record (spec.md §5 ordering guarantees).
        let row = sqlx::query("SELECT * FROM contexts WHERE id = ?")
            .bind(context_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("context {context_id} not found")))?;
        let mut current = row_to_record(row)?;
        let previous_value = current.value.clone();

        let next_version = current.version + 1;
        current.value = new_value.clone().unwrap_or_else(|| current.value.clone());
        current.confidence = new_confidence.unwrap_or(current.confidence);
        if new_interpretation.is_some() {
            current.interpretation = new_interpretation.clone();
        }
        if let Some(status) = new_drift_status {
            current.drift_status = status;
        }
        if let Some(count) = new_correction_count {
            current.correction_count = count;
        }
        if new_last_confirmed_at.is_some() {
            current.last_confirmed_at = new_last_confirmed_at;
        }
        current.source = source;
        current.version = next_version;
        current.updated_at = now;

        sqlx::query(
            r#"UPDATE contexts SET value=?, interpretation=?, confidence=?, source=?,
                drift_status=?, correction_count=?, last_confirmed_at=?, version=?, updated_at=?
               WHERE id=?"#,
        )
        .bind(current.value.to_string())
        .bind(current.interpretation.as_ref().map(|v| v.to_string()))
        .bind(current.confidence)
        .bind(current.source.as_str())
        .bind(current.drift_status.as_str())
        .bind(current.correction_count as i64)
        .bind(current.last_confirmed_at.map(|t| t.to_rfc3339()))
        .bind(current.version as i64)
        .bind(current.updated_at.to_rfc3339())
        .bind(context_id.to_string())
        .execute(&mut *tx)
        .await?;

        insert_version_tx(
            &mut tx,
            context_id,
            next_version,
            &current.value,
            current.interpretation.as_ref(),
            current.confidence,
            Some(&previous_value),
            source,
            change_reason,
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(current)
    }

    pub async fn soft_delete(&self, context_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE contexts SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(context_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn history(&self, context_id: Uuid, limit: i64) -> Result<Vec<ContextVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM context_versions WHERE context_id = ? ORDER BY version DESC LIMIT ?",
        )
        .bind(context_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_version).collect()
    }

    pub async fn version_at(&self, context_id: Uuid, version: u32) -> Result<Option<ContextVersion>> {
        let row = sqlx::query("SELECT * FROM context_versions WHERE context_id = ? AND version = ?")
            .bind(context_id.to_string())
            .bind(version as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_version).transpose()
    }

    pub async fn delete_expired_ephemeral(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM contexts WHERE tier = 'ephemeral' AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn active_older_than(
        &self,
        threshold: DateTime<Utc>,
        exclude_tier: Tier,
    ) -> Result<Vec<ContextRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM contexts WHERE is_active = 1 AND tier != ? AND updated_at < ?",
        )
        .bind(exclude_tier.as_str())
        .bind(threshold.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_version_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    context_id: Uuid,
    version: u32,
    value: &Value,
    interpretation: Option<&Value>,
    confidence: f64,
    previous_value: Option<&Value>,
    changed_by: Source,
    change_reason: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO context_versions (
            context_id, version, value, interpretation, confidence, previous_value,
            changed_by, change_reason, created_at
        ) VALUES (?,?,?,?,?,?,?,?,?)"#,
    )
    .bind(context_id.to_string())
    .bind(version as i64)
    .bind(value.to_string())
    .bind(interpretation.map(|v| v.to_string()))
    .bind(confidence)
    .bind(previous_value.map(|v| v.to_string()))
    .bind(changed_by.as_str())
    .bind(change_reason)
    .bind(created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<ContextRecord> {
    let value_str: String = row.try_get("value")?;
    let interpretation_str: Option<String> = row.try_get("interpretation")?;
    let source_details_str: Option<String> = row.try_get("source_details")?;
    let expires_at: Option<String> = row.try_get("expires_at")?;
    let last_confirmed_at: Option<String> = row.try_get("last_confirmed_at")?;
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let context_type: String = row.try_get("type")?;
    let tier: String = row.try_get("tier")?;
    let source: String = row.try_get("source")?;
    let drift_status: String = row.try_get("drift_status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let session_id: Option<String> = row.try_get("session_id")?;

    Ok(ContextRecord {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| Error::Internal(e.to_string()))?,
        context_type: ContextType::from_str(&context_type)?,
        tier: Tier::from_str(&tier)?,
        key: row.try_get("key")?,
        value: serde_json::from_str(&value_str)?,
        interpretation: interpretation_str.map(|s| serde_json::from_str(&s)).transpose()?,
        confidence: row.try_get("confidence")?,
        source: Source::from_str(&source)?,
        source_details: source_details_str.map(|s| serde_json::from_str(&s)).transpose()?,
        drift_status: DriftStatus::from_str(&drift_status)?,
        expires_at: expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| Error::Internal(e.to_string()))?,
        last_confirmed_at: last_confirmed_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| Error::Internal(e.to_string()))?,
        correction_count: row.try_get::<i64, _>("correction_count")? as u32,
        session_id,
        is_active: row.try_get("is_active")?,
        version: row.try_get::<i64, _>("version")? as u32,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(e.to_string()))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| Error::Internal(e.to_string()))?
            .with_timezone(&Utc),
    })
}

fn row_to_version(row: sqlx::sqlite::SqliteRow) -> Result<ContextVersion> {
    let value_str: String = row.try_get("value")?;
    let interpretation_str: Option<String> = row.try_get("interpretation")?;
    let previous_value_str: Option<String> = row.try_get("previous_value")?;
    let changed_by: String = row.try_get("changed_by")?;
    let created_at: String = row.try_get("created_at")?;
    let context_id: String = row.try_get("context_id")?;

    Ok(ContextVersion {
        context_id: Uuid::parse_str(&context_id).map_err(|e| Error::Internal(e.to_string()))?,
        version: row.try_get::<i64, _>("version")? as u32,
        value: serde_json::from_str(&value_str)?,
        interpretation: interpretation_str.map(|s| serde_json::from_str(&s)).transpose()?,
        confidence: row.try_get("confidence")?,
        previous_value: previous_value_str.map(|s| serde_json::from_str(&s)).transpose()?,
        changed_by: Source::from_str(&changed_by)?,
        change_reason: row.try_get("change_reason")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(e.to_string()))?
            .with_timezone(&Utc),
    })
}
