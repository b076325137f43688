//! External collaborator interfaces
//!
//! Every external service the pipeline talks to (identity registry, geocoder,
//! document OCR, site content extraction, notification templating) sits
//! behind one of these traits so stages can be tested against stubs and
//! collaborators can be swapped without touching stage logic.
//!
//! Outcomes distinguish "unavailable" (timeout, network, server error) from
//! "not found" (service reachable, no match); the verification stage records
//! them as failed checks with distinct evidence rather than aborting records.

pub mod documents;
pub mod geocoder;
pub mod registry;
pub mod site;

use crate::services::notifier::Notification;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Collaborator call outcome errors
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Service timeout, network failure, or server-side error
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Service reachable but it has no match for the request
    #[error("not found: {0}")]
    NotFound(String),
}

pub type CollabResult<T> = Result<T, CollaboratorError>;

/// Identity registry lookup result
#[derive(Debug, Clone, Default)]
pub struct IdentityMatch {
    pub matched: bool,
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub license_state: Option<String>,
    /// Registry-side confidence in the match
    pub confidence: f64,
}

/// Geocoding result
#[derive(Debug, Clone)]
pub struct GeocodedAddress {
    pub formatted_address: String,
    pub lat: f64,
    pub lng: f64,
    pub confidence: f64,
}

/// Phone confirmation result
#[derive(Debug, Clone)]
pub struct PhoneVerification {
    pub valid: bool,
    pub confidence: f64,
}

/// Fields extracted from a scanned document by the OCR collaborator
#[derive(Debug, Clone)]
pub struct DocumentFields {
    pub fields: BTreeMap<String, String>,
    pub confidence: f64,
}

/// A text value extracted from a provider site, with extractor confidence
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub value: String,
    pub confidence: f64,
}

/// A list value extracted from a provider site, with extractor confidence
#[derive(Debug, Clone)]
pub struct ExtractedList {
    pub values: Vec<String>,
    pub confidence: f64,
}

/// Site content extraction result (best-effort, may be partial or empty)
#[derive(Debug, Clone, Default)]
pub struct SiteContent {
    pub education: Option<ExtractedText>,
    pub services: Option<ExtractedList>,
    pub affiliations: Option<ExtractedList>,
}

/// Identity verification collaborator
#[async_trait::async_trait]
pub trait IdentityRegistry: Send + Sync {
    async fn lookup_identity(&self, identifier: &str) -> CollabResult<IdentityMatch>;
}

/// Address and phone verification collaborator
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> CollabResult<GeocodedAddress>;
    async fn verify_phone(&self, number: &str) -> CollabResult<PhoneVerification>;
}

/// Scanned document extraction collaborator
#[async_trait::async_trait]
pub trait DocumentReader: Send + Sync {
    async fn extract_document(&self, reference: &str) -> CollabResult<DocumentFields>;
}

/// Provider site content extraction collaborator
#[async_trait::async_trait]
pub trait SiteExtractor: Send + Sync {
    async fn extract_site_content(&self, url: &str) -> CollabResult<SiteContent>;
}

/// Notification templating collaborator
pub trait NotificationDrafter: Send + Sync {
    fn draft_notification(&self, record: &crate::models::ProviderRecord) -> Notification;
}

/// The collaborators available to a pipeline run
///
/// Each slot is optional: an unconfigured collaborator disables its checks
/// (they are recorded as failed/absent), it never prevents a run.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub registry: Option<Arc<dyn IdentityRegistry>>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub documents: Option<Arc<dyn DocumentReader>>,
    pub site: Option<Arc<dyn SiteExtractor>>,
    pub notifier: Option<Arc<dyn NotificationDrafter>>,
}
