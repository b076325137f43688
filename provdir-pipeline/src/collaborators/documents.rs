//! Document extraction (OCR) service client
//!
//! The OCR engine runs as a separate service; this client posts a document
//! reference and consumes the already-structured field map it returns. OCR
//! internals are out of scope here.

use super::{CollabResult, CollaboratorError, DocumentFields, DocumentReader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    confidence: f64,
}

/// OCR service client
pub struct DocumentClient {
    client: Client,
    endpoint: String,
}

impl DocumentClient {
    /// # Panics
    /// Panics if the HTTP client cannot be built (should not happen with
    /// valid configuration).
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, endpoint }
    }
}

#[async_trait::async_trait]
impl DocumentReader for DocumentClient {
    async fn extract_document(&self, reference: &str) -> CollabResult<DocumentFields> {
        tracing::debug!(reference, "Requesting document extraction");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExtractRequest { reference })
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("document reader request failed: {}", e))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound(format!(
                "no document for reference {:?}",
                reference
            )));
        }
        if !response.status().is_success() {
            return Err(CollaboratorError::Unavailable(format!(
                "document reader returned status {}",
                response.status()
            )));
        }

        let body: ExtractResponse = response.json().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("document reader response unparsable: {}", e))
        })?;

        if body.fields.is_empty() {
            return Err(CollaboratorError::NotFound(format!(
                "document {:?} yielded no fields",
                reference
            )));
        }

        Ok(DocumentFields {
            confidence: body.confidence.clamp(0.0, 1.0),
            fields: body.fields,
        })
    }
}
