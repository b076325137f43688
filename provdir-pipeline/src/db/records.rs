//! Record store: versioned provider record persistence
//!
//! `put` is atomic per identifier: one transaction inserts the immutable
//! version row and replaces the head row, so either the whole record is
//! visible at the new version or none of it is. Concurrent puts for the same
//! identifier serialize through optimistic versioning: each attempt computes
//! `head + 1` and relies on the `UNIQUE(identifier, version)` constraint to
//! detect a lost race, then re-reads and retries up to a configured bound.

use crate::models::{ProviderRecord, RecordStatus};
use provdir_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Versioned store for provider records
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    /// Maximum put attempts after version conflicts
    retry_limit: u32,
}

impl RecordStore {
    pub fn new(pool: SqlitePool, retry_limit: u32) -> Self {
        Self { pool, retry_limit }
    }

    /// Commit a record as a new version, returning the committed version.
    ///
    /// Entire records replace; the store never merges at field level. The
    /// stored copy carries the bumped version and the caller-provided status.
    pub async fn put(&self, record: &ProviderRecord) -> Result<i64> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_put(record).await {
                Ok(version) => {
                    if attempt > 1 {
                        tracing::debug!(
                            identifier = %record.identifier,
                            attempt,
                            version,
                            "Record committed after version conflict retry"
                        );
                    }
                    return Ok(version);
                }
                Err(Error::Conflict(msg)) if attempt < self.retry_limit => {
                    tracing::warn!(
                        identifier = %record.identifier,
                        attempt,
                        retry_limit = self.retry_limit,
                        "Version conflict, re-reading latest and retrying: {}",
                        msg
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_put(&self, record: &ProviderRecord) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let head_row = sqlx::query(
            "SELECT version, record_json FROM provider_records WHERE identifier = ?",
        )
        .bind(&record.identifier)
        .fetch_optional(&mut *tx)
        .await?;

        let (head_version, head_json) = match &head_row {
            Some(row) => (row.get::<i64, _>("version"), Some(row.get::<String, _>("record_json"))),
            None => (0, None),
        };
        let next_version = head_version + 1;

        let mut committed = record.clone();
        committed.version = next_version;

        let record_json = serde_json::to_string(&committed)
            .map_err(|e| Error::Internal(format!("Failed to serialize record: {}", e)))?;
        let now = chrono::Utc::now().to_rfc3339();
        let change_summary = change_summary(head_json.as_deref(), &committed);

        // The UNIQUE(identifier, version) constraint is the conflict detector:
        // a concurrent commit that won the race already owns next_version.
        let insert = sqlx::query(
            r#"
            INSERT INTO provider_record_versions (
                identifier, version, record_json, change_summary, created_at
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&committed.identifier)
        .bind(next_version)
        .bind(&record_json)
        .bind(&change_summary)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert {
            if db_err.is_unique_violation() {
                return Err(Error::Conflict(format!(
                    "version {} for {} already committed",
                    next_version, committed.identifier
                )));
            }
        }
        insert?;

        sqlx::query(
            r#"
            INSERT INTO provider_records (
                identifier, version, status, decision, composite_score, record_json, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                version = excluded.version,
                status = excluded.status,
                decision = excluded.decision,
                composite_score = excluded.composite_score,
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&committed.identifier)
        .bind(next_version)
        .bind(committed.status.as_str())
        .bind(committed.decision.map(|d| d.as_str()))
        .bind(committed.composite_score)
        .bind(&record_json)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            identifier = %committed.identifier,
            version = next_version,
            change_summary = %change_summary,
            "Record committed"
        );

        Ok(next_version)
    }

    /// Latest committed record for an identifier
    pub async fn get(&self, identifier: &str) -> Result<Option<ProviderRecord>> {
        let row = sqlx::query("SELECT record_json FROM provider_records WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("record_json");
                let record = serde_json::from_str(&json)
                    .map_err(|e| Error::Internal(format!("Failed to deserialize record: {}", e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Full version history for an identifier, oldest first
    pub async fn history(&self, identifier: &str) -> Result<Vec<ProviderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record_json FROM provider_record_versions
            WHERE identifier = ?
            ORDER BY version ASC
            "#,
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record_json");
            versions.push(serde_json::from_str(&json).map_err(|e| {
                Error::Internal(format!("Failed to deserialize version: {}", e))
            })?);
        }
        Ok(versions)
    }

    /// Latest published records (for directory export), ordered by name
    pub async fn published(&self) -> Result<Vec<ProviderRecord>> {
        let rows = sqlx::query(
            "SELECT record_json FROM provider_records WHERE status = ? ORDER BY identifier ASC",
        )
        .bind(RecordStatus::Published.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record_json");
            records.push(serde_json::from_str(&json).map_err(|e| {
                Error::Internal(format!("Failed to deserialize record: {}", e))
            })?);
        }
        Ok(records)
    }
}

/// Human-readable summary of what changed between the previous head and the
/// new record, stored alongside each version for audit.
fn change_summary(old_json: Option<&str>, new_record: &ProviderRecord) -> String {
    let old: Option<ProviderRecord> = old_json.and_then(|j| serde_json::from_str(j).ok());
    let old = match old {
        Some(old) => old,
        None => return "Initial record".to_string(),
    };

    let mut changes = Vec::new();

    let old_score = old.composite_score.unwrap_or(0.0);
    let new_score = new_record.composite_score.unwrap_or(0.0);
    if (old_score - new_score).abs() > 0.05 {
        changes.push(format!("confidence {:.2} -> {:.2}", old_score, new_score));
    }

    if old.decision != new_record.decision {
        let fmt = |d: Option<crate::models::Decision>| d.map(|d| d.as_str()).unwrap_or("-");
        changes.push(format!(
            "decision {} -> {}",
            fmt(old.decision),
            fmt(new_record.decision)
        ));
    }

    for field in ["address", "phone", "specialty"] {
        if old.field(field) != new_record.field(field) {
            changes.push(format!("{} updated", field));
        }
    }

    if changes.is_empty() {
        "No significant changes".to_string()
    } else {
        changes.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Decision;
    use std::collections::BTreeMap;

    async fn store() -> RecordStore {
        // A pooled in-memory SQLite needs a single connection so that every
        // handle sees the same database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        RecordStore::new(pool, 3)
    }

    fn record(identifier: &str) -> ProviderRecord {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Dr. Ada Cole".to_string());
        let mut record = ProviderRecord::from_input(identifier, fields);
        record.composite_score = Some(0.95);
        record.decision = Some(Decision::Auto);
        record.status = RecordStatus::Published;
        record
    }

    #[tokio::test]
    async fn put_assigns_increasing_versions() {
        let store = store().await;
        let rec = record("P001");

        assert_eq!(store.put(&rec).await.unwrap(), 1);
        assert_eq!(store.put(&rec).await.unwrap(), 2);
        assert_eq!(store.put(&rec).await.unwrap(), 3);

        let head = store.get("P001").await.unwrap().unwrap();
        assert_eq!(head.version, 3);

        let history = store.history("P001").await.unwrap();
        let versions: Vec<i64> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn history_is_empty_before_first_commit() {
        let store = store().await;
        assert!(store.get("P404").await.unwrap().is_none());
        assert!(store.history("P404").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_puts_for_same_identifier_serialize() {
        let store = store().await;
        let rec = record("P001");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let rec = rec.clone();
            handles.push(tokio::spawn(async move { store.put(&rec).await }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2, 3, 4]);

        let history = store.history("P001").await.unwrap();
        assert_eq!(history.len(), 4);
        // Strictly increasing, no duplicates
        for pair in history.windows(2) {
            assert!(pair[1].version == pair[0].version + 1);
        }
    }

    #[tokio::test]
    async fn change_summary_tracks_field_updates() {
        let store = store().await;
        let mut rec = record("P001");
        store.put(&rec).await.unwrap();

        rec.merge_field("address", "1 Elm St", crate::models::FieldSource::Geocoder);
        store.put(&rec).await.unwrap();

        let row = sqlx::query(
            "SELECT change_summary FROM provider_record_versions WHERE identifier = ? AND version = 2",
        )
        .bind("P001")
        .fetch_one(&store.pool)
        .await
        .unwrap();
        let summary: String = row.get("change_summary");
        assert!(summary.contains("address updated"));
    }
}
