//! Composite confidence scoring and decision routing
//!
//! Combines per-check confidences into a single weighted profile score and
//! routes it through the configured thresholds. The decision is a pure
//! function of the composite score; nothing else in the pipeline may assign
//! it.
//!
//! Weighting (defaults): identity 0.40 (registry match, license validity,
//! document cross-check, averaged), address 0.15, phone 0.10, specialty 0.10,
//! education 0.05, services 0.10, affiliations 0.10. A component with no
//! contributing check scores 0 — absence of evidence is lack of confidence,
//! not neutrality — unless renormalization of structurally inapplicable
//! components is explicitly enabled in configuration.

use crate::models::{CheckKind, ComponentScores, Decision, ProviderRecord};
use provdir_common::config::{ScoringConfig, ThresholdConfig, TomlConfig};

/// Scoring result: composite plus the per-component breakdown behind it
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    /// Weighted composite in [0.0, 1.0]
    pub composite: f64,
    pub components: ComponentScores,
}

/// Confidence scorer with configured weights and thresholds
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    weights: ScoringConfig,
    thresholds: ThresholdConfig,
}

impl ConfidenceScorer {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            weights: config.scoring.clone(),
            thresholds: config.thresholds.clone(),
        }
    }

    /// Compute the weighted composite score for a record
    pub fn score(&self, record: &ProviderRecord) -> ScoreBreakdown {
        // Identity: average over the identity checks that were attempted
        let identity_checks: Vec<f64> = record
            .checks
            .iter()
            .filter(|c| c.check.is_identity())
            .map(|c| c.confidence)
            .collect();
        let identity = if identity_checks.is_empty() {
            None
        } else {
            Some(identity_checks.iter().sum::<f64>() / identity_checks.len() as f64)
        };

        let address = record.check_confidence(CheckKind::AddressGeocode);
        let phone = record.check_confidence(CheckKind::PhoneConfirm);
        let specialty = record.check_confidence(CheckKind::SpecialtyConfirm);

        let education = record.enrichment.education.as_ref().map(|e| e.confidence);
        let services = record.enrichment.services.as_ref().map(|e| e.confidence);
        let affiliations = record.enrichment.affiliations.as_ref().map(|e| e.confidence);

        let components = ComponentScores {
            identity: identity.unwrap_or(0.0),
            address: address.unwrap_or(0.0),
            phone: phone.unwrap_or(0.0),
            specialty: specialty.unwrap_or(0.0),
            education: education.unwrap_or(0.0),
            services: services.unwrap_or(0.0),
            affiliations: affiliations.unwrap_or(0.0),
        };

        // (weight, confidence if the component was applicable at all)
        let weighted = [
            (self.weights.identity_weight, identity),
            (self.weights.address_weight, address),
            (self.weights.phone_weight, phone),
            (self.weights.specialty_weight, specialty),
            (self.weights.education_weight, education),
            (self.weights.services_weight, services),
            (self.weights.affiliations_weight, affiliations),
        ];

        let raw: f64 = weighted
            .iter()
            .map(|(w, c)| w * c.unwrap_or(0.0))
            .sum();

        let composite = if self.weights.renormalize_inapplicable {
            // Redistribute the weight of structurally inapplicable components
            // (never attempted); evaluated-but-failed checks contribute their
            // zero at full weight.
            let applicable: f64 = weighted
                .iter()
                .filter(|(_, c)| c.is_some())
                .map(|(w, _)| w)
                .sum();
            if applicable > 0.0 {
                raw / applicable
            } else {
                0.0
            }
        } else {
            raw
        };

        ScoreBreakdown {
            composite: composite.clamp(0.0, 1.0),
            components,
        }
    }

    /// Threshold lookup: score >= auto => AUTO, >= review => REVIEW,
    /// otherwise HOLD.
    pub fn decide(&self, composite: f64) -> Decision {
        if composite >= self.thresholds.auto {
            Decision::Auto
        } else if composite >= self.thresholds.review {
            Decision::Review
        } else {
            Decision::Hold
        }
    }

    /// Concise routing reasons for queue entries and reports
    pub fn reasons(&self, record: &ProviderRecord, components: &ComponentScores) -> Vec<String> {
        let mut reasons = Vec::new();
        if components.identity < 0.7 {
            reasons.push("low_identity_confidence".to_string());
        }
        if components.address < 0.6 {
            reasons.push("low_address_confidence".to_string());
        }
        if components.education < 0.4 {
            reasons.push("low_education_info".to_string());
        }
        if record.enrichment.services.is_none() {
            reasons.push("no_services_listed".to_string());
        }
        if record.enrichment.affiliations.is_none() {
            reasons.push("no_affiliations".to_string());
        }
        reasons
    }
}
