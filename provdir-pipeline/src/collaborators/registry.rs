//! Identity registry HTTP client
//!
//! Queries the national provider registry for a record matching the
//! provider's registry number. Rate limited to stay within the registry's
//! published request policy.

use super::{CollabResult, CollaboratorError, IdentityMatch, IdentityRegistry};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

/// Registry API response for a number lookup
#[derive(Debug, Deserialize)]
struct RegistryResponse {
    #[serde(default)]
    result_count: u32,
    #[serde(default)]
    results: Vec<RegistryResult>,
}

#[derive(Debug, Deserialize)]
struct RegistryResult {
    #[serde(default)]
    basic: RegistryBasic,
    #[serde(default)]
    addresses: Vec<RegistryAddress>,
    #[serde(default)]
    taxonomies: Vec<RegistryTaxonomy>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryBasic {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    organization_name: String,
}

#[derive(Debug, Deserialize)]
struct RegistryAddress {
    #[serde(default)]
    address_purpose: String,
    #[serde(default)]
    address_1: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    postal_code: String,
    #[serde(default)]
    telephone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryTaxonomy {
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Identity registry client
pub struct RegistryClient {
    client: Client,
    base_url: String,
    /// Registry-side confidence attached to a successful match
    confidence: f64,
    /// Rate limiter keeping within the registry request policy
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RegistryClient {
    /// Create a new registry client
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be built (should not happen with
    /// valid configuration).
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        // 5 requests/second keeps bulk runs inside the registry's policy
        let rate_limiter =
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(5).expect("5 is non-zero")));

        Self {
            client,
            base_url,
            confidence: 0.9,
            rate_limiter,
        }
    }
}

#[async_trait::async_trait]
impl IdentityRegistry for RegistryClient {
    async fn lookup_identity(&self, identifier: &str) -> CollabResult<IdentityMatch> {
        self.rate_limiter.until_ready().await;

        let params = [("number", identifier), ("version", "2.1")];

        tracing::debug!(identifier, "Querying identity registry");

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Unavailable(format!(
                "registry returned status {}",
                response.status()
            )));
        }

        let body: RegistryResponse = response.json().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("registry response unparsable: {}", e))
        })?;

        if body.result_count == 0 || body.results.is_empty() {
            return Err(CollaboratorError::NotFound(format!(
                "registry has no record for {}",
                identifier
            )));
        }

        let result = &body.results[0];

        let name = {
            let person = format!("{} {}", result.basic.first_name, result.basic.last_name);
            let person = person.trim();
            if person.is_empty() {
                if result.basic.organization_name.is_empty() {
                    None
                } else {
                    Some(result.basic.organization_name.clone())
                }
            } else {
                Some(person.to_string())
            }
        };

        // Practice location address, falling back to the first listed
        let location = result
            .addresses
            .iter()
            .find(|a| a.address_purpose == "LOCATION")
            .or_else(|| result.addresses.first());
        let (address, phone) = match location {
            Some(a) => (
                Some(format!(
                    "{}, {}, {} {}",
                    a.address_1, a.city, a.state, a.postal_code
                )),
                a.telephone_number.clone(),
            ),
            None => (None, None),
        };

        let taxonomy = result
            .taxonomies
            .iter()
            .find(|t| t.primary)
            .or_else(|| result.taxonomies.first());
        let (specialty, license_number, license_state) = match taxonomy {
            Some(t) => (t.desc.clone(), t.license.clone(), t.state.clone()),
            None => (None, None, None),
        };

        Ok(IdentityMatch {
            matched: true,
            name,
            address,
            phone,
            specialty,
            license_number,
            license_state,
            confidence: self.confidence,
        })
    }
}
