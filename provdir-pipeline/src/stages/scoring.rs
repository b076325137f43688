//! Scoring and decision stage
//!
//! Deterministic: composite score from the configured weighted sum, decision
//! from the threshold table. No side effects beyond the record itself.

use super::{PipelineStage, RunContext};
use crate::models::{ProviderRecord, RecordStatus, RunState};
use crate::services::ConfidenceScorer;
use provdir_common::events::PipelineEvent;
use provdir_common::Result;

/// Scoring stage
pub struct ScoringStage {
    scorer: ConfidenceScorer,
}

impl ScoringStage {
    pub fn new(scorer: ConfidenceScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait::async_trait]
impl PipelineStage for ScoringStage {
    fn state(&self) -> RunState {
        RunState::Scoring
    }

    async fn process(
        &self,
        batch: Vec<ProviderRecord>,
        ctx: &RunContext,
    ) -> Result<Vec<ProviderRecord>> {
        let mut scored = Vec::with_capacity(batch.len());

        for mut record in batch {
            let breakdown = self.scorer.score(&record);
            let decision = self.scorer.decide(breakdown.composite);

            record.reasons = self.scorer.reasons(&record, &breakdown.components);
            record.composite_score = Some(breakdown.composite);
            record.decision = Some(decision);
            record.score_components = Some(breakdown.components);
            record.status = RecordStatus::Scored;

            tracing::debug!(
                identifier = %record.identifier,
                composite_score = breakdown.composite,
                decision = decision.as_str(),
                "Record scored"
            );

            ctx.event_bus.emit_lossy(PipelineEvent::RecordDecided {
                run_id: ctx.run_id,
                identifier: record.identifier.clone(),
                decision: decision.as_str().to_string(),
                composite_score: breakdown.composite,
                timestamp: chrono::Utc::now(),
            });

            scored.push(record);
        }

        Ok(scored)
    }
}
