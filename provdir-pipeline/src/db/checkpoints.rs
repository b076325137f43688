//! Per-stage batch checkpoints
//!
//! Each stage persists its full output batch before handing off, which makes
//! the stage boundary the natural resumption point: a restarted run replays
//! from the last stage with a checkpoint instead of redoing completed work.

use crate::models::ProviderRecord;
use provdir_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Save a stage's output batch, replacing any previous checkpoint for the
/// same (run, stage) pair.
pub async fn save_checkpoint(
    pool: &SqlitePool,
    run_id: Uuid,
    stage: &str,
    batch: &[ProviderRecord],
) -> Result<()> {
    let batch_json = serde_json::to_string(batch)
        .map_err(|e| Error::Internal(format!("Failed to serialize checkpoint: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO stage_checkpoints (run_id, stage, batch_json, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(run_id, stage) DO UPDATE SET
            batch_json = excluded.batch_json,
            created_at = excluded.created_at
        "#,
    )
    .bind(run_id.to_string())
    .bind(stage)
    .bind(&batch_json)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    tracing::debug!(run_id = %run_id, stage, records = batch.len(), "Checkpoint saved");

    Ok(())
}

/// Load a stage checkpoint if one exists
pub async fn load_checkpoint(
    pool: &SqlitePool,
    run_id: Uuid,
    stage: &str,
) -> Result<Option<Vec<ProviderRecord>>> {
    let row = sqlx::query(
        "SELECT batch_json FROM stage_checkpoints WHERE run_id = ? AND stage = ?",
    )
    .bind(run_id.to_string())
    .bind(stage)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let json: String = row.get("batch_json");
            let batch = serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("Failed to deserialize checkpoint: {}", e)))?;
            Ok(Some(batch))
        }
        None => Ok(None),
    }
}

/// Name of the last stage with a checkpoint for a run, if any
pub async fn last_checkpoint_stage(pool: &SqlitePool, run_id: Uuid) -> Result<Option<String>> {
    let row = sqlx::query(
        "SELECT stage FROM stage_checkpoints WHERE run_id = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get("stage")))
}
