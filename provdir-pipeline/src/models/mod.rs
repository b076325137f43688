//! Data models for the pipeline

pub mod record;
pub mod run;

pub use record::{
    CheckKind, CheckResult, ComponentScores, Decision, EnrichedValue, Enrichment, FieldSource,
    FieldValue, ProviderRecord, RecordStatus,
};
pub use run::{PipelineRun, RejectedRow, RunProgress, RunState, StateTransition};
