//! Publishing stage
//!
//! AUTO records become a new directory version through the record store;
//! REVIEW and HOLD records go to their queues for human handling, HOLD with a
//! drafted outreach notification. Idempotent: the stage checks current
//! status (and the store head) before acting, so re-running it on an
//! already-published record at the same score bumps nothing and duplicates
//! nothing.

use super::{PipelineStage, RunContext};
use crate::db::{queues, records::RecordStore};
use crate::models::{Decision, ProviderRecord, RecordStatus, RunState};
use provdir_common::Result;

/// Publishing stage
pub struct PublishingStage {
    store: RecordStore,
}

impl PublishingStage {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl PipelineStage for PublishingStage {
    fn state(&self) -> RunState {
        RunState::Publishing
    }

    async fn process(
        &self,
        batch: Vec<ProviderRecord>,
        ctx: &RunContext,
    ) -> Result<Vec<ProviderRecord>> {
        let mut published = Vec::with_capacity(batch.len());

        for record in batch {
            if ctx.cancel_token.is_cancelled() {
                published.push(record);
                continue;
            }
            published.push(self.publish_record(record, ctx).await?);
        }

        Ok(published)
    }
}

impl PublishingStage {
    async fn publish_record(
        &self,
        mut record: ProviderRecord,
        ctx: &RunContext,
    ) -> Result<ProviderRecord> {
        // Already published (e.g. a resumed run): nothing to do
        if record.status == RecordStatus::Published {
            return Ok(record);
        }

        let decision = match record.decision {
            Some(decision) => decision,
            None => {
                // Scoring is the only path that assigns decisions; a record
                // without one has not been scored and must not be committed.
                tracing::warn!(
                    identifier = %record.identifier,
                    "Record reached publishing without a decision, leaving unpublished"
                );
                return Ok(record);
            }
        };

        match decision {
            Decision::Auto => {
                // The store head may already carry this exact state from an
                // earlier run of this stage.
                if let Some(head) = self.store.get(&record.identifier).await? {
                    if head.status == RecordStatus::Published
                        && head.composite_score == record.composite_score
                    {
                        tracing::debug!(
                            identifier = %record.identifier,
                            version = head.version,
                            "Already published at this score, skipping commit"
                        );
                        record.version = head.version;
                        record.status = RecordStatus::Published;
                        return Ok(record);
                    }
                }

                record.status = RecordStatus::Published;
                let version = self.store.put(&record).await?;
                record.version = version;

                tracing::info!(
                    identifier = %record.identifier,
                    version,
                    composite_score = record.composite_score.unwrap_or(0.0),
                    "Record published"
                );
            }
            Decision::Review => {
                queues::enqueue_review(&ctx.db, &record).await?;
                tracing::info!(
                    identifier = %record.identifier,
                    composite_score = record.composite_score.unwrap_or(0.0),
                    "Record routed to review queue"
                );
            }
            Decision::Hold => {
                let notification = ctx
                    .collaborators
                    .notifier
                    .as_ref()
                    .map(|n| n.draft_notification(&record));
                queues::enqueue_hold(&ctx.db, &record, notification.as_ref()).await?;
                tracing::info!(
                    identifier = %record.identifier,
                    composite_score = record.composite_score.unwrap_or(0.0),
                    drafted_notification = notification.is_some(),
                    "Record routed to hold queue"
                );
            }
        }

        Ok(record)
    }
}
