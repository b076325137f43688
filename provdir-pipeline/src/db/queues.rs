//! Review and hold queue persistence
//!
//! REVIEW and HOLD records never become a new directory version; they land
//! here for human handling. Enqueueing is an idempotent upsert keyed by
//! identifier, so re-running the publishing stage produces no duplicate
//! entries.

use crate::models::ProviderRecord;
use crate::services::notifier::Notification;
use provdir_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// A queue entry awaiting human handling
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub identifier: String,
    pub record_version: i64,
    pub composite_score: f64,
    pub reasons: Vec<String>,
}

/// Append a record to the review queue (idempotent per identifier)
pub async fn enqueue_review(pool: &SqlitePool, record: &ProviderRecord) -> Result<()> {
    upsert(pool, "review_queue", record, None).await
}

/// Append a record to the hold queue with an optional drafted notification
pub async fn enqueue_hold(
    pool: &SqlitePool,
    record: &ProviderRecord,
    notification: Option<&Notification>,
) -> Result<()> {
    upsert(pool, "hold_queue", record, notification).await
}

async fn upsert(
    pool: &SqlitePool,
    table: &str,
    record: &ProviderRecord,
    notification: Option<&Notification>,
) -> Result<()> {
    let record_json = serde_json::to_string(record)
        .map_err(|e| Error::Internal(format!("Failed to serialize queue record: {}", e)))?;
    let reasons = record.reasons.join("|");
    let score = record.composite_score.unwrap_or(0.0);
    let now = chrono::Utc::now().to_rfc3339();

    // Table name is one of two compile-time constants, never user input
    let sql = match table {
        "review_queue" => {
            r#"
            INSERT INTO review_queue (
                identifier, record_version, composite_score, reasons, record_json, enqueued_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                record_version = excluded.record_version,
                composite_score = excluded.composite_score,
                reasons = excluded.reasons,
                record_json = excluded.record_json,
                enqueued_at = excluded.enqueued_at
            "#
        }
        _ => {
            r#"
            INSERT INTO hold_queue (
                identifier, record_version, composite_score, reasons, record_json,
                notification_subject, notification_body, enqueued_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                record_version = excluded.record_version,
                composite_score = excluded.composite_score,
                reasons = excluded.reasons,
                record_json = excluded.record_json,
                notification_subject = excluded.notification_subject,
                notification_body = excluded.notification_body,
                enqueued_at = excluded.enqueued_at
            "#
        }
    };

    let mut query = sqlx::query(sql)
        .bind(&record.identifier)
        .bind(record.version)
        .bind(score)
        .bind(&reasons)
        .bind(&record_json);
    if table != "review_queue" {
        query = query
            .bind(notification.map(|n| n.subject.as_str()))
            .bind(notification.map(|n| n.body.as_str()));
    }
    query.bind(&now).execute(pool).await?;

    Ok(())
}

/// All entries in the named queue, highest score first
pub async fn queue_entries(pool: &SqlitePool, table: &str) -> Result<Vec<QueueEntry>> {
    let sql = match table {
        "review_queue" => {
            "SELECT identifier, record_version, composite_score, reasons FROM review_queue \
             ORDER BY composite_score DESC"
        }
        "hold_queue" => {
            "SELECT identifier, record_version, composite_score, reasons FROM hold_queue \
             ORDER BY composite_score DESC"
        }
        other => {
            return Err(Error::InvalidInput(format!("unknown queue: {}", other)));
        }
    };

    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| QueueEntry {
            identifier: row.get("identifier"),
            record_version: row.get("record_version"),
            composite_score: row.get("composite_score"),
            reasons: {
                let raw: String = row.get("reasons");
                if raw.is_empty() {
                    Vec::new()
                } else {
                    raw.split('|').map(|s| s.to_string()).collect()
                }
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Decision;
    use std::collections::BTreeMap;

    async fn pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn record(identifier: &str, score: f64) -> ProviderRecord {
        let mut record = ProviderRecord::from_input(identifier, BTreeMap::new());
        record.composite_score = Some(score);
        record.decision = Some(Decision::Review);
        record.reasons = vec!["low_identity_confidence".to_string()];
        record
    }

    #[tokio::test]
    async fn re_enqueue_does_not_duplicate() {
        let pool = pool().await;
        let rec = record("P001", 0.72);

        enqueue_review(&pool, &rec).await.unwrap();
        enqueue_review(&pool, &rec).await.unwrap();

        let entries = queue_entries(&pool, "review_queue").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identifier, "P001");
        assert_eq!(entries[0].reasons, vec!["low_identity_confidence"]);
    }

    #[tokio::test]
    async fn hold_entry_carries_notification_draft() {
        let pool = pool().await;
        let rec = record("P002", 0.31);
        let notification = Notification {
            subject: "Action Required: P002".to_string(),
            body: "Please verify your directory information.".to_string(),
        };

        enqueue_hold(&pool, &rec, Some(&notification)).await.unwrap();

        let row = sqlx::query("SELECT notification_subject FROM hold_queue WHERE identifier = ?")
            .bind("P002")
            .fetch_one(&pool)
            .await
            .unwrap();
        let subject: String = row.get("notification_subject");
        assert!(subject.contains("P002"));
    }
}
