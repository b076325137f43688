//! Pipeline orchestration
//!
//! Runs the four stages in strict sequence over one batch. Each stage's
//! output is checkpointed before handoff, which makes the stage boundary the
//! resumption point: re-executing a run skips every stage that already has a
//! checkpoint. Cancellation is cooperative and checked between stages and
//! between records inside a stage; whatever checkpoints were reached persist.

use crate::collaborators::Collaborators;
use crate::db::{checkpoints, records::RecordStore, runs};
use crate::models::{PipelineRun, ProviderRecord, RunState};
use crate::report::{RunReport, StageTiming};
use crate::services::ConfidenceScorer;
use crate::stages::{
    EnrichmentStage, PipelineStage, PublishingStage, RunContext, ScoringStage, VerificationStage,
};
use provdir_common::config::TomlConfig;
use provdir_common::events::{EventBus, PipelineEvent};
use provdir_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Orchestrates the record pipeline over one batch
pub struct PipelineOrchestrator {
    db: SqlitePool,
    config: Arc<TomlConfig>,
    event_bus: EventBus,
    collaborators: Arc<Collaborators>,
    store: RecordStore,
}

impl PipelineOrchestrator {
    pub fn new(
        db: SqlitePool,
        config: TomlConfig,
        event_bus: EventBus,
        collaborators: Collaborators,
    ) -> Self {
        let store = RecordStore::new(db.clone(), config.pipeline.store_retry_limit);
        Self {
            db,
            config: Arc::new(config),
            event_bus,
            collaborators: Arc::new(collaborators),
            store,
        }
    }

    /// The record store backing this orchestrator (shared with exports)
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Execute the full stage sequence for a run
    ///
    /// Per-record failures never abort the batch; a stage-level error (e.g.
    /// store unreachable) fails the run with the stage and last checkpoint in
    /// the log context so the run can be resumed.
    pub async fn execute_run(
        &self,
        mut run: PipelineRun,
        mut batch: Vec<ProviderRecord>,
        cancel_token: CancellationToken,
    ) -> Result<(PipelineRun, RunReport)> {
        tracing::info!(
            run_id = %run.run_id,
            input_path = %run.input_path,
            records = batch.len(),
            rejected = run.rejected.len(),
            "Starting pipeline run"
        );

        self.event_bus.emit_lossy(PipelineEvent::RunStarted {
            run_id: run.run_id,
            input_path: run.input_path.clone(),
            timestamp: chrono::Utc::now(),
        });

        for row in &run.rejected {
            self.event_bus.emit_lossy(PipelineEvent::RowRejected {
                run_id: run.run_id,
                line: row.line,
                reason: row.reason.clone(),
                timestamp: chrono::Utc::now(),
            });
        }

        let scorer = ConfidenceScorer::from_config(&self.config);
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(VerificationStage),
            Box::new(EnrichmentStage),
            Box::new(ScoringStage::new(scorer)),
            Box::new(PublishingStage::new(self.store.clone())),
        ];

        let ctx = RunContext {
            run_id: run.run_id,
            db: self.db.clone(),
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
            cancel_token: cancel_token.clone(),
            collaborators: self.collaborators.clone(),
        };

        let mut stage_timings = Vec::new();

        for stage in &stages {
            let label = stage.state().as_str();

            // Resume support: a checkpointed stage already ran to completion
            if let Some(checkpoint) =
                checkpoints::load_checkpoint(&self.db, run.run_id, label).await?
            {
                tracing::info!(
                    run_id = %run.run_id,
                    stage = label,
                    records = checkpoint.len(),
                    "Stage already checkpointed, skipping"
                );
                batch = checkpoint;
                continue;
            }

            run.transition_to(stage.state());
            run.update_progress(0, batch.len(), format!("{} {} records", label, batch.len()));
            runs::save_run(&self.db, &run).await?;

            tracing::info!(run_id = %run.run_id, stage = label, records = batch.len(), "Stage starting");
            self.event_bus.emit_lossy(PipelineEvent::StageStarted {
                run_id: run.run_id,
                stage: label.to_string(),
                total_records: batch.len(),
                timestamp: chrono::Utc::now(),
            });

            let started = Instant::now();
            batch = match stage.process(batch, &ctx).await {
                Ok(batch) => batch,
                Err(err) => {
                    let last_checkpoint =
                        checkpoints::last_checkpoint_stage(&self.db, run.run_id).await?;
                    tracing::error!(
                        run_id = %run.run_id,
                        stage = label,
                        last_checkpoint = last_checkpoint.as_deref().unwrap_or("none"),
                        error = %err,
                        "Stage failed, run can be resumed from the last checkpoint"
                    );
                    run.transition_to(RunState::Failed);
                    run.update_progress(
                        run.progress.current,
                        run.progress.total,
                        format!("{} failed: {}", label, err),
                    );
                    runs::save_run(&self.db, &run).await?;
                    self.event_bus.emit_lossy(PipelineEvent::RunFailed {
                        run_id: run.run_id,
                        stage: label.to_string(),
                        error: err.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    return Err(err);
                }
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if cancel_token.is_cancelled() {
                // In-flight records were allowed to finish; nothing new was
                // dispatched. Checkpoints already written stay valid.
                tracing::info!(run_id = %run.run_id, stage = label, "Run cancelled");
                run.transition_to(RunState::Cancelled);
                run.update_progress(
                    run.progress.current,
                    batch.len(),
                    "Run cancelled by operator".to_string(),
                );
                runs::save_run(&self.db, &run).await?;
                let report = RunReport::from_batch(&run, &batch, stage_timings);
                return Ok((run, report));
            }

            checkpoints::save_checkpoint(&self.db, run.run_id, label, &batch).await?;

            let failed_checks: usize = batch
                .iter()
                .map(|r| r.checks.iter().filter(|c| !c.passed).count())
                .sum();
            tracing::info!(
                run_id = %run.run_id,
                stage = label,
                records = batch.len(),
                failed_checks,
                elapsed_ms,
                "Stage completed"
            );
            self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
                run_id: run.run_id,
                stage: label.to_string(),
                processed: batch.len(),
                failed_checks,
                elapsed_ms,
                timestamp: chrono::Utc::now(),
            });
            stage_timings.push(StageTiming {
                stage: label.to_string(),
                elapsed_ms,
            });
        }

        let report = RunReport::from_batch(&run, &batch, stage_timings);
        runs::record_run_totals(
            &self.db,
            run.run_id,
            report.auto,
            report.review,
            report.hold,
            report.average_score,
        )
        .await?;

        run.transition_to(RunState::Completed);
        run.update_progress(batch.len(), batch.len(), "Run completed".to_string());
        runs::save_run(&self.db, &run).await?;

        tracing::info!(
            run_id = %run.run_id,
            auto = report.auto,
            review = report.review,
            hold = report.hold,
            rejected = report.rejected.len(),
            average_score = report.average_score,
            "Pipeline run completed"
        );
        self.event_bus.emit_lossy(PipelineEvent::RunCompleted {
            run_id: run.run_id,
            auto: report.auto,
            review: report.review,
            hold: report.hold,
            rejected: report.rejected.len(),
            timestamp: chrono::Utc::now(),
        });

        Ok((run, report))
    }
}
