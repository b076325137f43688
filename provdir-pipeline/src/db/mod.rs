//! Database access for the pipeline
//!
//! Single SQLite database holding the provider directory (head records plus
//! append-only version history), the review/hold queues, pipeline run
//! bookkeeping, and per-stage batch checkpoints.

pub mod checkpoints;
pub mod queues;
pub mod records;
pub mod runs;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to `directory.db` under the data directory, creating the file
/// and schema when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_records (
            identifier TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            status TEXT NOT NULL,
            decision TEXT,
            composite_score REAL,
            record_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_record_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL,
            version INTEGER NOT NULL,
            record_json TEXT NOT NULL,
            change_summary TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(identifier, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_queue (
            identifier TEXT PRIMARY KEY,
            record_version INTEGER NOT NULL,
            composite_score REAL NOT NULL,
            reasons TEXT NOT NULL,
            record_json TEXT NOT NULL,
            enqueued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hold_queue (
            identifier TEXT PRIMARY KEY,
            record_version INTEGER NOT NULL,
            composite_score REAL NOT NULL,
            reasons TEXT NOT NULL,
            record_json TEXT NOT NULL,
            notification_subject TEXT,
            notification_body TEXT,
            enqueued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            input_path TEXT NOT NULL,
            progress_current INTEGER NOT NULL DEFAULT 0,
            progress_total INTEGER NOT NULL DEFAULT 0,
            progress_percentage REAL NOT NULL DEFAULT 0.0,
            current_operation TEXT NOT NULL DEFAULT '',
            rejected TEXT NOT NULL DEFAULT '[]',
            auto_count INTEGER,
            review_count INTEGER,
            hold_count INTEGER,
            avg_score REAL,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_checkpoints (
            run_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            batch_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(run_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_record_decision ON provider_records(decision)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_version_identifier ON provider_record_versions(identifier)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
