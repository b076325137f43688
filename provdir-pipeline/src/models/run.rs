//! Pipeline run state machine
//!
//! A run progresses through the four stages in strict sequence:
//! VERIFYING -> ENRICHING -> SCORING -> PUBLISHING -> COMPLETED
//! with CANCELLED and FAILED as the other terminal states. Run state is
//! persisted after every transition so a restart can resume from the last
//! checkpointed stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    /// External verification checks
    Verifying,
    /// Site content enrichment
    Enriching,
    /// Composite scoring and decision routing
    Scoring,
    /// Directory commits and queue routing
    Publishing,
    /// Run finished successfully
    Completed,
    /// Run cancelled by the operator
    Cancelled,
    /// Run failed with a stage-level error
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Verifying => "VERIFYING",
            RunState::Enriching => "ENRICHING",
            RunState::Scoring => "SCORING",
            RunState::Publishing => "PUBLISHING",
            RunState::Completed => "COMPLETED",
            RunState::Cancelled => "CANCELLED",
            RunState::Failed => "FAILED",
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: RunState,
    pub new_state: RunState,
    pub transitioned_at: DateTime<Utc>,
}

/// Progress tracking for the current stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProgress {
    /// Records processed so far in the current stage
    pub current: usize,
    /// Total records in the batch
    pub total: usize,
    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,
    /// Current operation description
    pub current_operation: String,
    /// Elapsed time (seconds)
    pub elapsed_seconds: u64,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            current: 0,
            total: 0,
            percentage: 0.0,
            current_operation: String::from("Initializing..."),
            elapsed_seconds: 0,
        }
    }
}

/// An input row rejected before entering the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based line number in the input file
    pub line: usize,
    pub reason: String,
}

/// Pipeline run (in-memory state, persisted via db::runs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run identifier
    pub run_id: Uuid,

    /// Current state
    pub state: RunState,

    /// Input batch path for this run
    pub input_path: String,

    /// Progress tracking
    pub progress: RunProgress,

    /// Rows rejected during input parsing (surfaced, never dropped silently)
    pub rejected: Vec<RejectedRow>,

    /// Run start time
    pub started_at: DateTime<Utc>,

    /// Run end time (terminal states only)
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(input_path: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Verifying,
            input_path,
            progress: RunProgress::default(),
            rejected: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to a new state, stamping the end time on terminal states
    pub fn transition_to(&mut self, new_state: RunState) -> StateTransition {
        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if self.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    /// Update progress counters and the operation description
    pub fn update_progress(&mut self, current: usize, total: usize, operation: String) {
        self.progress.current = current;
        self.progress.total = total;
        self.progress.percentage = if total > 0 {
            (current as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        self.progress.current_operation = operation;
        self.progress.elapsed_seconds = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
    }

    pub fn add_rejected(&mut self, line: usize, reason: impl Into<String>) {
        self.rejected.push(RejectedRow {
            line,
            reason: reason.into(),
        });
    }

    /// Check if the run reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_stamp_end_time_on_terminal_states() {
        let mut run = PipelineRun::new("providers.csv".to_string());
        assert_eq!(run.state, RunState::Verifying);
        assert!(run.ended_at.is_none());

        let t = run.transition_to(RunState::Enriching);
        assert_eq!(t.old_state, RunState::Verifying);
        assert_eq!(t.new_state, RunState::Enriching);
        assert!(run.ended_at.is_none());

        run.transition_to(RunState::Completed);
        assert!(run.is_terminal());
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn progress_percentage_handles_empty_batch() {
        let mut run = PipelineRun::new("providers.csv".to_string());
        run.update_progress(0, 0, "Scanning input".to_string());
        assert_eq!(run.progress.percentage, 0.0);

        run.update_progress(3, 4, "Verifying".to_string());
        assert!((run.progress.percentage - 75.0).abs() < f64::EPSILON);
    }
}
