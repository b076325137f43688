//! Pipeline stages
//!
//! Each stage implements the uniform `PipelineStage` contract: take the
//! batch, return the batch. Stages run in strict sequence; within a stage
//! records are independent and may be dispatched across a bounded worker
//! pool. Every input record appears exactly once in the stage output — a
//! record that cannot be processed flows through unchanged or with failed
//! checks, never disappears.

pub mod enrichment;
pub mod publishing;
pub mod scoring;
pub mod verification;

pub use enrichment::EnrichmentStage;
pub use publishing::PublishingStage;
pub use scoring::ScoringStage;
pub use verification::VerificationStage;

use crate::collaborators::{CollabResult, CollaboratorError, Collaborators};
use crate::models::{ProviderRecord, RunState};
use provdir_common::config::TomlConfig;
use provdir_common::events::EventBus;
use provdir_common::Result;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-run context passed through every stage call
///
/// Carries everything a stage needs so stages hold no state of their own and
/// parallel/test runs cannot cross-contaminate through globals.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub db: SqlitePool,
    pub config: Arc<TomlConfig>,
    pub event_bus: EventBus,
    pub cancel_token: CancellationToken,
    pub collaborators: Arc<Collaborators>,
}

impl RunContext {
    /// Bounded timeout for a single collaborator call
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.config.pipeline.collaborator_timeout_secs)
    }
}

/// Uniform stage contract
#[async_trait::async_trait]
pub trait PipelineStage: Send + Sync {
    /// Run state this stage corresponds to (also its checkpoint label)
    fn state(&self) -> RunState;

    /// Process the whole batch, returning it for the next stage
    async fn process(
        &self,
        batch: Vec<ProviderRecord>,
        ctx: &RunContext,
    ) -> Result<Vec<ProviderRecord>>;
}

/// Wrap a collaborator call in the configured timeout
///
/// A timeout is indistinguishable from any other outage for scoring
/// purposes: the call is recorded as unavailable, never left pending.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> CollabResult<T>
where
    F: Future<Output = CollabResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Unavailable(format!(
            "timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
