//! Provider site content extraction client
//!
//! The scraping/NLP heuristics live in a separate extraction service; this
//! client hands it a URL and consumes structured education/services/
//! affiliations fields. Best-effort: partial and empty results are normal.

use super::{CollabResult, CollaboratorError, ExtractedList, ExtractedText, SiteContent, SiteExtractor};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SiteResponse {
    #[serde(default)]
    education: Option<SiteText>,
    #[serde(default)]
    services: Option<SiteList>,
    #[serde(default)]
    affiliations: Option<SiteList>,
}

#[derive(Debug, Deserialize)]
struct SiteText {
    value: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct SiteList {
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

/// Site content extraction service client
pub struct SiteClient {
    client: Client,
    endpoint: String,
}

impl SiteClient {
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
impl SiteExtractor for SiteClient {
    async fn extract_site_content(&self, url: &str) -> CollabResult<SiteContent> {
        tracing::debug!(url, "Requesting site content extraction");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url)])
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("site extractor request failed: {}", e))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound(format!(
                "site extractor found nothing at {:?}",
                url
            )));
        }
        if !response.status().is_success() {
            return Err(CollaboratorError::Unavailable(format!(
                "site extractor returned status {}",
                response.status()
            )));
        }

        let body: SiteResponse = response.json().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("site extractor response unparsable: {}", e))
        })?;

        Ok(SiteContent {
            education: body.education.map(|t| ExtractedText {
                value: t.value,
                confidence: t.confidence.clamp(0.0, 1.0),
            }),
            services: body.services.filter(|l| !l.values.is_empty()).map(|l| {
                ExtractedList {
                    values: l.values,
                    confidence: l.confidence.clamp(0.0, 1.0),
                }
            }),
            affiliations: body.affiliations.filter(|l| !l.values.is_empty()).map(|l| {
                ExtractedList {
                    values: l.values,
                    confidence: l.confidence.clamp(0.0, 1.0),
                }
            }),
        })
    }
}
