//! Per-run summary report
//!
//! Counts by decision, rejected rows with reasons, and per-stage timings.
//! Rendered to the log at the end of a run and persisted with the run row.

use crate::models::{Decision, PipelineRun, ProviderRecord, RecordStatus, RejectedRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Elapsed time for one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// Summary of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total_records: usize,
    pub auto: usize,
    pub review: usize,
    pub hold: usize,
    pub published: usize,
    pub rejected: Vec<RejectedRow>,
    pub average_score: f64,
    pub stage_timings: Vec<StageTiming>,
}

impl RunReport {
    pub fn from_batch(
        run: &PipelineRun,
        batch: &[ProviderRecord],
        stage_timings: Vec<StageTiming>,
    ) -> Self {
        let count = |decision: Decision| {
            batch
                .iter()
                .filter(|r| r.decision == Some(decision))
                .count()
        };

        let scored: Vec<f64> = batch.iter().filter_map(|r| r.composite_score).collect();
        let average_score = if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f64>() / scored.len() as f64
        };

        Self {
            run_id: run.run_id,
            total_records: batch.len(),
            auto: count(Decision::Auto),
            review: count(Decision::Review),
            hold: count(Decision::Hold),
            published: batch
                .iter()
                .filter(|r| r.status == RecordStatus::Published)
                .count(),
            rejected: run.rejected.clone(),
            average_score,
            stage_timings,
        }
    }

    /// Render the report as a text block
    pub fn render(&self) -> String {
        let mut out = String::new();
        let pct = |n: usize| {
            if self.total_records > 0 {
                n as f64 / self.total_records as f64 * 100.0
            } else {
                0.0
            }
        };

        out.push_str(&format!("RUN SUMMARY {}\n", self.run_id));
        out.push_str(&format!("Total records: {}\n", self.total_records));
        out.push_str("Decisions:\n");
        out.push_str(&format!("  AUTO:   {:4} ({:5.1}%)\n", self.auto, pct(self.auto)));
        out.push_str(&format!(
            "  REVIEW: {:4} ({:5.1}%)\n",
            self.review,
            pct(self.review)
        ));
        out.push_str(&format!("  HOLD:   {:4} ({:5.1}%)\n", self.hold, pct(self.hold)));
        out.push_str(&format!("Published: {}\n", self.published));
        out.push_str(&format!("Average confidence: {:.3}\n", self.average_score));

        if !self.stage_timings.is_empty() {
            out.push_str("Stage timings:\n");
            for timing in &self.stage_timings {
                out.push_str(&format!(
                    "  {:<12} {:6} ms\n",
                    timing.stage, timing.elapsed_ms
                ));
            }
        }

        if !self.rejected.is_empty() {
            out.push_str(&format!("Rejected rows: {}\n", self.rejected.len()));
            for row in &self.rejected {
                out.push_str(&format!("  line {}: {}\n", row.line, row.reason));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn report_counts_decisions_and_rejections() {
        let mut run = PipelineRun::new("providers.csv".to_string());
        run.add_rejected(3, "missing identifier");

        let mut auto = ProviderRecord::from_input("P001", BTreeMap::new());
        auto.decision = Some(Decision::Auto);
        auto.composite_score = Some(0.95);
        auto.status = RecordStatus::Published;

        let mut hold = ProviderRecord::from_input("P002", BTreeMap::new());
        hold.decision = Some(Decision::Hold);
        hold.composite_score = Some(0.15);

        let report = RunReport::from_batch(&run, &[auto, hold], Vec::new());
        assert_eq!(report.total_records, 2);
        assert_eq!(report.auto, 1);
        assert_eq!(report.hold, 1);
        assert_eq!(report.review, 0);
        assert_eq!(report.published, 1);
        assert!((report.average_score - 0.55).abs() < 1e-9);

        let rendered = report.render();
        assert!(rendered.contains("AUTO:      1"));
        assert!(rendered.contains("line 3: missing identifier"));
    }
}
