//! Enrichment stage
//!
//! Best-effort supplementary data from the provider's site via the content
//! extraction collaborator. Partial or empty results are normal; an
//! extraction failure leaves the record with empty enrichment and moves on.

use super::{with_timeout, PipelineStage, RunContext};
use crate::models::{EnrichedValue, ProviderRecord, RecordStatus, RunState};
use futures::stream::{self, StreamExt};
use provdir_common::Result;

/// Enrichment stage
pub struct EnrichmentStage;

#[async_trait::async_trait]
impl PipelineStage for EnrichmentStage {
    fn state(&self) -> RunState {
        RunState::Enriching
    }

    async fn process(
        &self,
        batch: Vec<ProviderRecord>,
        ctx: &RunContext,
    ) -> Result<Vec<ProviderRecord>> {
        let concurrency = ctx.config.pipeline.concurrency;

        let results: Vec<ProviderRecord> = stream::iter(batch.into_iter().map(|record| {
            let ctx = ctx.clone();
            async move {
                if ctx.cancel_token.is_cancelled() {
                    return record;
                }
                enrich_record(record, &ctx).await
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

        Ok(results)
    }
}

async fn enrich_record(mut record: ProviderRecord, ctx: &RunContext) -> ProviderRecord {
    let extractor = match &ctx.collaborators.site {
        Some(extractor) => extractor,
        None => {
            record.status = RecordStatus::Enriched;
            return record;
        }
    };

    let url = match record.field("website").map(str::to_string) {
        Some(url) => url,
        None => {
            tracing::debug!(identifier = %record.identifier, "No site to enrich from");
            record.status = RecordStatus::Enriched;
            return record;
        }
    };

    match with_timeout(ctx.collaborator_timeout(), extractor.extract_site_content(&url)).await {
        Ok(content) => {
            if let Some(education) = content.education {
                record.enrichment.education = Some(EnrichedValue {
                    value: education.value,
                    source: url.clone(),
                    confidence: education.confidence,
                });
            }
            if let Some(services) = content.services {
                record.enrichment.services = Some(EnrichedValue {
                    value: services.values,
                    source: url.clone(),
                    confidence: services.confidence,
                });
            }
            if let Some(affiliations) = content.affiliations {
                record.enrichment.affiliations = Some(EnrichedValue {
                    value: affiliations.values,
                    source: url.clone(),
                    confidence: affiliations.confidence,
                });
            }
            tracing::debug!(
                identifier = %record.identifier,
                url = %url,
                empty = record.enrichment.is_empty(),
                "Site enrichment complete"
            );
        }
        Err(err) => {
            // Best-effort: an unreachable or unmatchable site just means no
            // enrichment signal for this record.
            tracing::warn!(
                identifier = %record.identifier,
                url = %url,
                error = %err,
                "Site enrichment failed"
            );
        }
    }

    record.status = RecordStatus::Enriched;
    record
}
