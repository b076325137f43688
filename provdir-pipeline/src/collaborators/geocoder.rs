//! Geocoding and phone confirmation HTTP client
//!
//! Address verification goes through the geocoding endpoint; phone
//! confirmation uses the place search endpoint's phone-number input mode.
//! Both map quota/denial statuses to "unavailable" and empty result sets to
//! "not found" so the verification stage can record distinct evidence.

use super::{CollabResult, CollaboratorError, GeocodedAddress, Geocoder, PhoneVerification};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    geometry: Geometry,
    #[serde(default)]
    partial_match: bool,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct FindPlaceResponse {
    status: String,
    #[serde(default)]
    candidates: Vec<PlaceCandidate>,
}

#[derive(Debug, Deserialize)]
struct PlaceCandidate {
    #[serde(default)]
    #[allow(dead_code)]
    name: Option<String>,
}

/// Geocoding service client
pub struct GeocoderClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeocoderClient {
    /// # Panics
    /// Panics if the HTTP client cannot be built (should not happen with
    /// valid configuration).
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url,
            api_key,
        }
    }

    /// Map an API status to an error. `ZERO_RESULTS` is handled separately
    /// as not-found; everything else non-OK means the service is unusable.
    fn status_error(status: &str) -> CollaboratorError {
        CollaboratorError::Unavailable(format!("geocoder status {}", status))
    }
}

#[async_trait::async_trait]
impl Geocoder for GeocoderClient {
    async fn geocode(&self, address: &str) -> CollabResult<GeocodedAddress> {
        let url = format!("{}/geocode/json", self.base_url);
        let params = [("address", address), ("key", self.api_key.as_str())];

        tracing::debug!(address, "Geocoding address");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("geocoder request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Unavailable(format!(
                "geocoder returned status {}",
                response.status()
            )));
        }

        let body: GeocodeResponse = response.json().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("geocoder response unparsable: {}", e))
        })?;

        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => {
                return Err(CollaboratorError::NotFound(format!(
                    "no geocoding result for {:?}",
                    address
                )));
            }
            other => return Err(Self::status_error(other)),
        }

        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::NotFound("empty geocoding result set".to_string()))?;

        Ok(GeocodedAddress {
            confidence: if result.partial_match { 0.6 } else { 0.9 },
            formatted_address: result.formatted_address,
            lat: result.geometry.location.lat,
            lng: result.geometry.location.lng,
        })
    }

    async fn verify_phone(&self, number: &str) -> CollabResult<PhoneVerification> {
        let url = format!("{}/place/findplacefromtext/json", self.base_url);
        let params = [
            ("input", number),
            ("inputtype", "phonenumber"),
            ("fields", "name"),
            ("key", self.api_key.as_str()),
        ];

        tracing::debug!(number, "Confirming phone number");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("phone lookup failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Unavailable(format!(
                "phone lookup returned status {}",
                response.status()
            )));
        }

        let body: FindPlaceResponse = response.json().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("phone lookup response unparsable: {}", e))
        })?;

        match body.status.as_str() {
            "OK" => Ok(PhoneVerification {
                valid: !body.candidates.is_empty(),
                confidence: if body.candidates.is_empty() { 0.0 } else { 0.85 },
            }),
            "ZERO_RESULTS" => Err(CollaboratorError::NotFound(format!(
                "no listing for phone {:?}",
                number
            ))),
            other => Err(Self::status_error(other)),
        }
    }
}
