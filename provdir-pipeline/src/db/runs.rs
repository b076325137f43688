//! Pipeline run persistence
//!
//! Run state is saved after every transition so the operator can inspect
//! progress and so a restart can tell which runs will never finish.

use crate::models::{PipelineRun, RejectedRow, RunProgress, RunState};
use provdir_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Save (upsert) a pipeline run
pub async fn save_run(pool: &SqlitePool, run: &PipelineRun) -> Result<()> {
    let run_id = run.run_id.to_string();
    let state = run.state.as_str();
    let rejected = serde_json::to_string(&run.rejected)
        .map_err(|e| Error::Internal(format!("Failed to serialize rejected rows: {}", e)))?;
    let started_at = run.started_at.to_rfc3339();
    let ended_at = run.ended_at.map(|dt| dt.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (
            run_id, state, input_path,
            progress_current, progress_total, progress_percentage,
            current_operation, rejected, started_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            state = excluded.state,
            progress_current = excluded.progress_current,
            progress_total = excluded.progress_total,
            progress_percentage = excluded.progress_percentage,
            current_operation = excluded.current_operation,
            rejected = excluded.rejected,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(&run_id)
    .bind(state)
    .bind(&run.input_path)
    .bind(run.progress.current as i64)
    .bind(run.progress.total as i64)
    .bind(run.progress.percentage)
    .bind(&run.progress.current_operation)
    .bind(&rejected)
    .bind(&started_at)
    .bind(&ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record final decision counters for a completed run
pub async fn record_run_totals(
    pool: &SqlitePool,
    run_id: Uuid,
    auto: usize,
    review: usize,
    hold: usize,
    avg_score: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET auto_count = ?, review_count = ?, hold_count = ?, avg_score = ?
        WHERE run_id = ?
        "#,
    )
    .bind(auto as i64)
    .bind(review as i64)
    .bind(hold as i64)
    .bind(avg_score)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a pipeline run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<PipelineRun>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, state, input_path,
               progress_current, progress_total, progress_percentage,
               current_operation, rejected, started_at, ended_at
        FROM pipeline_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(run_from_row(row)?)),
        None => Ok(None),
    }
}

fn run_from_row(row: sqlx::sqlite::SqliteRow) -> Result<PipelineRun> {
    let run_id_str: String = row.get("run_id");
    let run_id = Uuid::parse_str(&run_id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

    let state_str: String = row.get("state");
    let state = parse_state(&state_str)?;

    let rejected_json: String = row.get("rejected");
    let rejected: Vec<RejectedRow> = serde_json::from_str(&rejected_json)
        .map_err(|e| Error::Internal(format!("Failed to deserialize rejected rows: {}", e)))?;

    let started_at: String = row.get("started_at");
    let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse ended_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    let progress = RunProgress {
        current: row.get::<i64, _>("progress_current") as usize,
        total: row.get::<i64, _>("progress_total") as usize,
        percentage: row.get("progress_percentage"),
        current_operation: row.get("current_operation"),
        elapsed_seconds: if let Some(end) = ended_at {
            (end - started_at).num_seconds().max(0) as u64
        } else {
            (chrono::Utc::now() - started_at).num_seconds().max(0) as u64
        },
    };

    Ok(PipelineRun {
        run_id,
        state,
        input_path: row.get("input_path"),
        progress,
        rejected,
        started_at,
        ended_at,
    })
}

fn parse_state(raw: &str) -> Result<RunState> {
    Ok(match raw {
        "VERIFYING" => RunState::Verifying,
        "ENRICHING" => RunState::Enriching,
        "SCORING" => RunState::Scoring,
        "PUBLISHING" => RunState::Publishing,
        "COMPLETED" => RunState::Completed,
        "CANCELLED" => RunState::Cancelled,
        "FAILED" => RunState::Failed,
        other => {
            return Err(Error::Internal(format!("Unknown run state: {}", other)));
        }
    })
}

/// Cleanup stale pipeline runs on startup
///
/// Any run not in a terminal state when the service starts is from a previous
/// process and will never progress; mark it CANCELLED so resume tooling and
/// reports see an honest state.
pub async fn cleanup_stale_runs(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET state = 'CANCELLED',
            ended_at = ?,
            current_operation = 'Run cancelled - pipeline was restarted'
        WHERE state NOT IN ('COMPLETED', 'CANCELLED', 'FAILED')
        "#,
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let pool = pool().await;
        let mut run = PipelineRun::new("providers.csv".to_string());
        run.update_progress(2, 10, "Verifying records".to_string());
        run.add_rejected(7, "missing identifier");

        save_run(&pool, &run).await.unwrap();

        let loaded = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Verifying);
        assert_eq!(loaded.progress.current, 2);
        assert_eq!(loaded.progress.total, 10);
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].line, 7);
    }

    #[tokio::test]
    async fn stale_runs_are_cancelled_on_startup() {
        let pool = pool().await;
        let run = PipelineRun::new("providers.csv".to_string());
        save_run(&pool, &run).await.unwrap();

        let mut done = PipelineRun::new("other.csv".to_string());
        done.transition_to(RunState::Completed);
        save_run(&pool, &done).await.unwrap();

        let cancelled = cleanup_stale_runs(&pool).await.unwrap();
        assert_eq!(cancelled, 1);

        let loaded = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Cancelled);
        let loaded_done = load_run(&pool, done.run_id).await.unwrap().unwrap();
        assert_eq!(loaded_done.state, RunState::Completed);
    }
}
