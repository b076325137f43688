//! Verification stage
//!
//! Runs every applicable external check for each record and appends the
//! results. Checks are independent and order-insensitive; a collaborator
//! failure becomes a failed check entry with the failure reason as evidence,
//! never an aborted record. Verified values are merged back into the field
//! map with source provenance, higher-trust sources winning.

use super::{with_timeout, PipelineStage, RunContext};
use crate::collaborators::CollaboratorError;
use crate::models::{CheckKind, CheckResult, FieldSource, ProviderRecord, RecordStatus, RunState};
use futures::stream::{self, StreamExt};
use provdir_common::Result;

/// Verification stage
pub struct VerificationStage;

#[async_trait::async_trait]
impl PipelineStage for VerificationStage {
    fn state(&self) -> RunState {
        RunState::Verifying
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
                // Cooperative cancellation: no new dispatch once cancelled,
                // but the record still appears in the output unchanged.
                if ctx.cancel_token.is_cancelled() {
                    return record;
                }
                verify_record(record, &ctx).await
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

        Ok(results)
    }
}

/// Run all applicable checks for one record
async fn verify_record(mut record: ProviderRecord, ctx: &RunContext) -> ProviderRecord {
    let timeout = ctx.collaborator_timeout();

    // Identity registry lookup
    if let Some(registry) = &ctx.collaborators.registry {
        match record.field("registry_number").map(str::to_string) {
            Some(registry_number) => {
                match with_timeout(timeout, registry.lookup_identity(&registry_number)).await {
                    Ok(identity) => {
                        let similarity = name_agreement(
                            record.field("name"),
                            identity.name.as_deref(),
                        );
                        let confidence = identity.confidence * similarity;
                        record.checks.push(CheckResult::passed(
                            CheckKind::RegistryMatch,
                            confidence,
                            format!(
                                "registry record {} matched (name agreement {:.2})",
                                registry_number, similarity
                            ),
                        ));

                        // License validity from the registry taxonomy
                        match (&identity.license_number, &identity.license_state) {
                            (Some(number), state) if !number.is_empty() => {
                                let (confidence, evidence) = match record.field("license_number") {
                                    Some(input) if input.eq_ignore_ascii_case(number) => {
                                        (0.95, format!("license {} confirmed by registry", number))
                                    }
                                    Some(input) => (
                                        0.4,
                                        format!(
                                            "license mismatch: input {} vs registry {}",
                                            input, number
                                        ),
                                    ),
                                    None => (
                                        0.8,
                                        format!(
                                            "license {} on file with registry ({})",
                                            number,
                                            state.as_deref().unwrap_or("state unknown")
                                        ),
                                    ),
                                };
                                record.checks.push(CheckResult::passed(
                                    CheckKind::LicenseValid,
                                    confidence,
                                    evidence,
                                ));
                                record.merge_field(
                                    "license_number",
                                    number.clone(),
                                    FieldSource::Registry,
                                );
                            }
                            _ => {
                                record.checks.push(CheckResult::failed(
                                    CheckKind::LicenseValid,
                                    "registry record carries no license information",
                                ));
                            }
                        }

                        // Merge registry fields, registry beats input
                        if let Some(name) = identity.name {
                            record.merge_field("name", name, FieldSource::Registry);
                        }
                        if let Some(address) = identity.address {
                            record.merge_field("address", address, FieldSource::Registry);
                        }
                        if let Some(phone) = identity.phone {
                            record.merge_field("phone", phone, FieldSource::Registry);
                        }
                        if let Some(specialty) = &identity.specialty {
                            // Specialty agreement against the input value before merging
                            let agreement = match record.field("specialty") {
                                Some(input) => strsim::jaro_winkler(
                                    &input.to_lowercase(),
                                    &specialty.to_lowercase(),
                                ),
                                // Registry-derived specialty with nothing to compare against
                                None => 0.6,
                            };
                            record.checks.push(CheckResult::passed(
                                CheckKind::SpecialtyConfirm,
                                agreement,
                                format!("registry specialty {:?}", specialty),
                            ));
                            record.merge_field("specialty", specialty.clone(), FieldSource::Registry);
                        } else {
                            record.checks.push(CheckResult::failed(
                                CheckKind::SpecialtyConfirm,
                                "registry record carries no specialty",
                            ));
                        }
                    }
                    Err(err) => {
                        record
                            .checks
                            .push(failed_check(CheckKind::RegistryMatch, &err));
                        tracing::debug!(
                            identifier = %record.identifier,
                            error = %err,
                            "Registry lookup failed"
                        );
                    }
                }
            }
            None => {
                record.checks.push(CheckResult::failed(
                    CheckKind::RegistryMatch,
                    "no registry number on input row",
                ));
            }
        }
    }

    // Document OCR cross-check
    if let Some(documents) = &ctx.collaborators.documents {
        if let Some(reference) = record.field("document").map(str::to_string) {
            match with_timeout(timeout, documents.extract_document(&reference)).await {
                Ok(extracted) => {
                    let mut agreements = Vec::new();
                    for field in ["name", "license_number"] {
                        if let (Some(input), Some(doc)) =
                            (record.field(field), extracted.fields.get(field))
                        {
                            agreements.push(strsim::jaro_winkler(
                                &input.to_lowercase(),
                                &doc.to_lowercase(),
                            ));
                        }
                    }
                    let agreement = if agreements.is_empty() {
                        // Document readable but nothing to cross-check against
                        0.5
                    } else {
                        agreements.iter().sum::<f64>() / agreements.len() as f64
                    };
                    record.checks.push(CheckResult::passed(
                        CheckKind::DocumentCrossCheck,
                        extracted.confidence * agreement,
                        format!(
                            "document {} cross-checked ({} fields, agreement {:.2})",
                            reference,
                            agreements.len(),
                            agreement
                        ),
                    ));
                    for (field, value) in extracted.fields {
                        record.merge_field(&field, value, FieldSource::Ocr);
                    }
                }
                Err(err) => {
                    record
                        .checks
                        .push(failed_check(CheckKind::DocumentCrossCheck, &err));
                }
            }
        }
        // No document reference on the row: the check is structurally
        // inapplicable, not failed.
    }

    // Address geocoding
    if let Some(geocoder) = &ctx.collaborators.geocoder {
        match full_address(&record) {
            Some(address) => match with_timeout(timeout, geocoder.geocode(&address)).await {
                Ok(geocoded) => {
                    let agreement = strsim::jaro_winkler(
                        &address.to_lowercase(),
                        &geocoded.formatted_address.to_lowercase(),
                    );
                    record.checks.push(CheckResult::passed(
                        CheckKind::AddressGeocode,
                        geocoded.confidence * agreement,
                        format!(
                            "geocoded to {:?} ({:.5}, {:.5})",
                            geocoded.formatted_address, geocoded.lat, geocoded.lng
                        ),
                    ));
                    record.merge_field(
                        "address",
                        geocoded.formatted_address,
                        FieldSource::Geocoder,
                    );
                }
                Err(err) => {
                    record
                        .checks
                        .push(failed_check(CheckKind::AddressGeocode, &err));
                }
            },
            None => {
                record.checks.push(CheckResult::failed(
                    CheckKind::AddressGeocode,
                    "no address on input row",
                ));
            }
        }

        // Phone confirmation
        match record.field("phone").map(str::to_string) {
            Some(phone) => match with_timeout(timeout, geocoder.verify_phone(&phone)).await {
                Ok(verification) if verification.valid => {
                    record.checks.push(CheckResult::passed(
                        CheckKind::PhoneConfirm,
                        verification.confidence,
                        format!("phone {} confirmed", phone),
                    ));
                }
                Ok(_) => {
                    record.checks.push(CheckResult::failed(
                        CheckKind::PhoneConfirm,
                        format!("phone {} not confirmed", phone),
                    ));
                }
                Err(err) => {
                    record
                        .checks
                        .push(failed_check(CheckKind::PhoneConfirm, &err));
                }
            },
            None => {
                record.checks.push(CheckResult::failed(
                    CheckKind::PhoneConfirm,
                    "no phone number on input row",
                ));
            }
        }
    }

    record.status = RecordStatus::Verified;
    record
}

/// Failed check carrying the collaborator outcome as evidence, keeping the
/// unavailable / not-found distinction visible in the audit trail.
fn failed_check(kind: CheckKind, err: &CollaboratorError) -> CheckResult {
    CheckResult::failed(kind, err.to_string())
}

/// Name agreement in [0, 1]; a missing side counts as neutral agreement so
/// the registry confidence stands on its own.
fn name_agreement(input: Option<&str>, registry: Option<&str>) -> f64 {
    match (input, registry) {
        (Some(a), Some(b)) => strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase()),
        _ => 1.0,
    }
}

/// Assemble the full postal address from the row's parts
fn full_address(record: &ProviderRecord) -> Option<String> {
    let street = record.field("address")?;
    let mut address = street.to_string();
    for part in ["city", "state"] {
        if let Some(value) = record.field(part) {
            address.push_str(", ");
            address.push_str(value);
        }
    }
    Some(address)
}
