//! Provider record data model
//!
//! A record carries every field with its source provenance, the ordered list
//! of verification check results, enrichment values, and the derived
//! composite score and decision. Records are serialized whole (JSON) for
//! stage checkpoints and store versions, so everything here derives serde.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source that produced a field value (for provenance tracking)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Value came from the input batch row
    Input,
    /// Value from the identity registry lookup
    Registry,
    /// Value from the geocoding collaborator
    Geocoder,
    /// Value extracted from a scanned document
    Ocr,
    /// Value scraped from the provider's site
    Scrape,
}

impl FieldSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldSource::Input => "input",
            FieldSource::Registry => "registry",
            FieldSource::Geocoder => "geocoder",
            FieldSource::Ocr => "ocr",
            FieldSource::Scrape => "scrape",
        }
    }

    /// Trust rank used when merging values for the same field.
    /// Higher-trust sources replace lower-trust ones, never the reverse.
    pub fn trust_rank(&self) -> u8 {
        match self {
            FieldSource::Registry => 4,
            FieldSource::Geocoder => 3,
            FieldSource::Ocr => 2,
            FieldSource::Scrape => 1,
            FieldSource::Input => 0,
        }
    }
}

/// Field value tagged with its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub source: FieldSource,
}

impl FieldValue {
    pub fn new(value: impl Into<String>, source: FieldSource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }
}

/// One atomic verification check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Identity registry record match
    RegistryMatch,
    /// License number/state validity from the registry record
    LicenseValid,
    /// Cross-check of input fields against OCR-extracted document fields
    DocumentCrossCheck,
    /// Address confirmed by the geocoder
    AddressGeocode,
    /// Phone number confirmed
    PhoneConfirm,
    /// Specialty agreement between input and registry
    SpecialtyConfirm,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::RegistryMatch => "registry_match",
            CheckKind::LicenseValid => "license_valid",
            CheckKind::DocumentCrossCheck => "document_cross_check",
            CheckKind::AddressGeocode => "address_geocode",
            CheckKind::PhoneConfirm => "phone_confirm",
            CheckKind::SpecialtyConfirm => "specialty_confirm",
        }
    }

    /// True for checks contributing to the identity score component
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            CheckKind::RegistryMatch | CheckKind::LicenseValid | CheckKind::DocumentCrossCheck
        )
    }
}

/// Result of a single verification check
///
/// A collaborator failure is recorded here (passed=false, confidence=0.0)
/// rather than aborting the record; partial verification always beats
/// dropping the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckKind,
    pub passed: bool,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Human-readable evidence (match details or failure reason)
    pub evidence: String,
}

impl CheckResult {
    /// Successful check with clamped confidence
    pub fn passed(check: CheckKind, confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            check,
            passed: true,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
        }
    }

    /// Failed check: confidence pinned to 0.0
    pub fn failed(check: CheckKind, evidence: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            confidence: 0.0,
            evidence: evidence.into(),
        }
    }
}

/// Enrichment value with provenance and per-field confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedValue<T> {
    pub value: T,
    /// Where the value came from (typically the source URL)
    pub source: String,
    pub confidence: f64,
}

/// Supplementary fields gathered by the enrichment stage (best-effort)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    pub education: Option<EnrichedValue<String>>,
    pub services: Option<EnrichedValue<Vec<String>>>,
    pub affiliations: Option<EnrichedValue<Vec<String>>>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.education.is_none() && self.services.is_none() && self.affiliations.is_none()
    }
}

/// Decision outcome of the scoring stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// Commit automatically as a new directory version
    Auto,
    /// Route to the human review queue
    Review,
    /// Route to the hold queue pending provider outreach
    Hold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Auto => "AUTO",
            Decision::Review => "REVIEW",
            Decision::Hold => "HOLD",
        }
    }
}

/// Record lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Pending,
    Verified,
    Enriched,
    Scored,
    Published,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Verified => "VERIFIED",
            RecordStatus::Enriched => "ENRICHED",
            RecordStatus::Scored => "SCORED",
            RecordStatus::Published => "PUBLISHED",
        }
    }
}

/// Per-component scores backing the composite (for audit and queue reasons)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub identity: f64,
    pub address: f64,
    pub phone: f64,
    pub specialty: f64,
    pub education: f64,
    pub services: f64,
    pub affiliations: f64,
}

/// A provider directory record moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Stable registry key, unique across the directory, immutable
    pub identifier: String,

    /// Attribute name -> value with source provenance
    pub fields: BTreeMap<String, FieldValue>,

    /// Ordered verification results appended by the verification stage
    pub checks: Vec<CheckResult>,

    /// Supplementary fields from the enrichment stage
    #[serde(default)]
    pub enrichment: Enrichment,

    /// Weighted composite confidence, derived only (never hand-edited)
    pub composite_score: Option<f64>,

    /// Pure function of composite_score and the threshold table
    pub decision: Option<Decision>,

    /// Component breakdown behind composite_score
    #[serde(default)]
    pub score_components: Option<ComponentScores>,

    /// Concise routing reasons (for queue entries and reports)
    #[serde(default)]
    pub reasons: Vec<String>,

    /// Monotonically increasing per identifier; 0 until first commit
    pub version: i64,

    pub status: RecordStatus,
}

impl ProviderRecord {
    /// Build a fresh record from one input row. Empty values are treated as
    /// absent rather than stored as sentinels.
    pub fn from_input(identifier: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        let fields = fields
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k, FieldValue::new(v.trim().to_string(), FieldSource::Input)))
            .collect();

        Self {
            identifier: identifier.into(),
            fields,
            checks: Vec::new(),
            enrichment: Enrichment::default(),
            composite_score: None,
            decision: None,
            score_components: None,
            reasons: Vec::new(),
            version: 0,
            status: RecordStatus::Pending,
        }
    }

    /// Current value of a field, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.value.as_str())
    }

    /// Merge a field value, replacing only when the new source carries equal
    /// or higher trust than the existing one.
    pub fn merge_field(&mut self, name: &str, value: impl Into<String>, source: FieldSource) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        match self.fields.get(name) {
            Some(existing) if existing.source.trust_rank() > source.trust_rank() => {}
            _ => {
                self.fields
                    .insert(name.to_string(), FieldValue::new(value, source));
            }
        }
    }

    /// Confidence of a check, if it was attempted
    pub fn check_confidence(&self, kind: CheckKind) -> Option<f64> {
        self.checks
            .iter()
            .find(|c| c.check == kind)
            .map(|c| c.confidence)
    }
}
