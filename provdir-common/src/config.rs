//! Configuration loading, validation, and data directory resolution
//!
//! Composite-score weights and decision thresholds are configuration, not
//! code: they are read from a TOML file and may be overridden per-run through
//! environment variables, so tuning never requires a redeploy. Invalid
//! configuration is fatal before the pipeline runs.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tolerance when checking that scoring weights sum to 1.0
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Top-level TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

/// Per-component weights for the composite confidence score
///
/// Identity carries 0.40, contact information 0.35 (address + phone +
/// specialty), enrichment quality 0.25 (education + services + affiliations).
/// A component with no contributing check scores 0 for its share unless
/// `renormalize_inapplicable` is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub identity_weight: f64,
    pub address_weight: f64,
    pub phone_weight: f64,
    pub specialty_weight: f64,
    pub education_weight: f64,
    pub services_weight: f64,
    pub affiliations_weight: f64,
    /// When true, weights of structurally inapplicable components (no check
    /// attempted and no input data) are redistributed over the rest.
    /// Evaluated-but-failed checks always count as confidence 0.
    pub renormalize_inapplicable: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            identity_weight: 0.40,
            address_weight: 0.15,
            phone_weight: 0.10,
            specialty_weight: 0.10,
            education_weight: 0.05,
            services_weight: 0.10,
            affiliations_weight: 0.10,
            renormalize_inapplicable: false,
        }
    }
}

impl ScoringConfig {
    /// Sum of all component weights
    pub fn weight_sum(&self) -> f64 {
        self.identity_weight
            + self.address_weight
            + self.phone_weight
            + self.specialty_weight
            + self.education_weight
            + self.services_weight
            + self.affiliations_weight
    }
}

/// Decision routing thresholds
///
/// score >= auto => AUTO, score >= review => REVIEW, otherwise HOLD.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub auto: f64,
    pub review: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            auto: 0.90,
            review: 0.60,
        }
    }
}

/// Pipeline execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum records in flight within a single stage
    pub concurrency: usize,
    /// Bounded timeout for each external collaborator call (seconds)
    pub collaborator_timeout_secs: u64,
    /// Maximum put retries after a version conflict before giving up
    pub store_retry_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            collaborator_timeout_secs: 10,
            store_retry_limit: 3,
        }
    }
}

/// External collaborator endpoints and credentials
///
/// Optional endpoints disable the corresponding checks when unset: a missing
/// geocoder key means address/phone checks are recorded as failed, it never
/// aborts a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub registry_base_url: String,
    pub geocoder_base_url: String,
    pub geocoder_api_key: Option<String>,
    pub document_reader_url: Option<String>,
    pub site_extractor_url: Option<String>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            registry_base_url: "https://npiregistry.cms.hhs.gov/api/".to_string(),
            geocoder_base_url: "https://maps.googleapis.com/maps/api".to_string(),
            geocoder_api_key: None,
            document_reader_url: None,
            site_extractor_url: None,
        }
    }
}

impl TomlConfig {
    /// Validate weight and threshold bounds
    ///
    /// Weights must sum to 1.0 within epsilon and each lie in [0, 1];
    /// thresholds must satisfy 0 < review <= auto <= 1.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("identity_weight", self.scoring.identity_weight),
            ("address_weight", self.scoring.address_weight),
            ("phone_weight", self.scoring.phone_weight),
            ("specialty_weight", self.scoring.specialty_weight),
            ("education_weight", self.scoring.education_weight),
            ("services_weight", self.scoring.services_weight),
            ("affiliations_weight", self.scoring.affiliations_weight),
        ];
        for (name, w) in weights {
            if !(0.0..=1.0).contains(&w) {
                return Err(Error::Config(format!(
                    "scoring.{} out of range [0,1]: {}",
                    name, w
                )));
            }
        }

        let sum = self.scoring.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(Error::Config(format!(
                "scoring weights must sum to 1.0 (got {:.6})",
                sum
            )));
        }

        let (auto, review) = (self.thresholds.auto, self.thresholds.review);
        if !(review > 0.0 && review <= auto && auto <= 1.0) {
            return Err(Error::Config(format!(
                "thresholds must satisfy 0 < review <= auto <= 1 (auto={}, review={})",
                auto, review
            )));
        }

        if self.pipeline.concurrency == 0 {
            return Err(Error::Config(
                "pipeline.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides for decision thresholds
    ///
    /// `PROVDIR_TH_AUTO` and `PROVDIR_TH_REVIEW` take precedence over the
    /// TOML values. Unparsable values are rejected, not silently ignored.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var("PROVDIR_TH_AUTO") {
            self.thresholds.auto = raw.parse::<f64>().map_err(|_| {
                Error::Config(format!("PROVDIR_TH_AUTO is not a number: {:?}", raw))
            })?;
            info!(auto = self.thresholds.auto, "AUTO threshold from environment");
        }
        if let Ok(raw) = std::env::var("PROVDIR_TH_REVIEW") {
            self.thresholds.review = raw.parse::<f64>().map_err(|_| {
                Error::Config(format!("PROVDIR_TH_REVIEW is not a number: {:?}", raw))
            })?;
            info!(
                review = self.thresholds.review,
                "REVIEW threshold from environment"
            );
        }
        Ok(())
    }
}

/// Load configuration following the resolution priority order:
/// 1. Explicit path (command-line argument, highest priority)
/// 2. `PROVDIR_CONFIG` environment variable
/// 3. Platform config directory (`<config_dir>/provdir/config.toml`)
/// 4. Compiled defaults (fallback)
///
/// Environment threshold overrides are applied after the file is read, and
/// the merged configuration is validated before being returned.
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_path) {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        Some(path) => {
            // An explicitly named file must exist; the platform default may not
            if cli_path.is_some() || std::env::var("PROVDIR_CONFIG").is_ok() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            warn!(path = %path.display(), "No config file found, using defaults");
            TomlConfig::default()
        }
        None => TomlConfig::default(),
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("PROVDIR_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("provdir").join("config.toml"))
}

/// Resolve the data directory (database, exports) following the same
/// priority order: CLI argument, `PROVDIR_DATA_DIR`, OS-dependent default.
pub fn resolve_data_dir(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("PROVDIR_DATA_DIR") {
        return PathBuf::from(path);
    }
    dirs::data_local_dir()
        .map(|d| d.join("provdir"))
        .unwrap_or_else(|| PathBuf::from("./provdir_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.scoring.weight_sum() - 1.0).abs() < WEIGHT_SUM_EPSILON);
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = TomlConfig::default();
        config.scoring.identity_weight = 0.50;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let mut config = TomlConfig::default();
        config.scoring.identity_weight = 1.4;
        config.scoring.address_weight = -0.45;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let mut config = TomlConfig::default();
        config.thresholds.auto = 0.50;
        config.thresholds.review = 0.60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn equal_thresholds_are_allowed() {
        let mut config = TomlConfig::default();
        config.thresholds.auto = 0.75;
        config.thresholds.review = 0.75;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_review_threshold() {
        let mut config = TomlConfig::default();
        config.thresholds.review = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = TomlConfig::default();
        config.pipeline.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[thresholds]
auto = 0.95
review = 0.55

[pipeline]
concurrency = 4
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.thresholds.auto, 0.95);
        assert_eq!(config.thresholds.review, 0.55);
        assert_eq!(config.pipeline.concurrency, 4);
        // Unspecified sections fall back to defaults
        assert_eq!(config.scoring.identity_weight, 0.40);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(load_config(Some(&path)).is_err());
    }
}
