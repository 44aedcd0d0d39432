use crate::constants::{get_supported_sources, DEFAULT_INDICATOR};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Immutable configuration threaded through every pipeline component.
///
/// `sources` (in ascending merge priority) and `weights` have no defaults and
/// must be supplied explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,
    pub weights: WeightConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub imputation: ImputationConfig,
    #[serde(default)]
    pub inspection: InspectionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default)]
    pub standardization: StandardizationOverrides,
    #[serde(default)]
    pub indicators: IndicatorConfig,
}

fn default_run_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Identifier used in provenance and the manifest
    pub id: String,
    /// Provider family, one of `constants::get_supported_sources()`
    pub kind: String,
    pub base_url: String,
    #[serde(default = "default_indicator")]
    pub indicator: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Extra query parameters forwarded verbatim to the provider
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_indicator() -> String {
    DEFAULT_INDICATOR.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl SourceConfig {
    pub fn new(id: &str, kind: &str, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            base_url: base_url.to_string(),
            indicator: default_indicator(),
            auth: AuthConfig::None,
            request_timeout_secs: default_request_timeout_secs(),
            params: BTreeMap::new(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How a source authenticates. Only environment variable names live in the
/// configuration; values are read at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token_env: String,
    },
    ApiKey {
        header: String,
        key_env: String,
    },
    /// OAuth2 client-credentials exchange; the token endpoint is called with
    /// HTTP basic auth and the returned access token is used as a bearer token.
    ClientCredentials {
        token_url: String,
        key_env: String,
        secret_env: String,
    },
}

/// Credential value that never prints itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(Self(v)),
            _ => Err(PipelineError::MissingSecret(var.to_string())),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Quality score weights. They must sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub completeness: f64,
    pub consistency: f64,
    pub freshness: f64,
}

impl WeightConfig {
    pub fn validate(&self) -> Result<()> {
        let parts = [self.completeness, self.consistency, self.freshness];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::Config(format!(
                "weights must be finite and non-negative, got {:?}",
                self
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(PipelineError::Config(format!(
                "weights must sum to 1, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// Retry schedule for transient source failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputationConfig {
    /// Fields missing in more than this share of records are not imputed
    pub coverage_threshold: f64,
    /// Complete neighbour records required before nearest-neighbour estimation
    pub min_complete_neighbors: usize,
    pub neighbors_k: usize,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.5,
            min_complete_neighbors: 3,
            neighbors_k: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    pub iqr_multiplier: f64,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            iqr_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub freshness_half_life_hours: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            freshness_half_life_hours: 720.0,
        }
    }
}

/// Constants of the derived regional indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Share of 6-17 year olds assumed to have ADHD
    pub prevalence_rate: f64,
    pub poverty_weight: f64,
    pub specialist_shortage_weight: f64,
    pub hospital_access_weight: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            prevalence_rate: 0.035,
            poverty_weight: 0.4,
            specialist_shortage_weight: 0.3,
            hospital_access_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
    pub ttl_hours: u64,
    /// Directory where snapshots are persisted; in-memory only when unset
    pub archive_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            ttl_hours: 168,
            archive_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub target: String,
    pub factor: f64,
}

/// Entries merged over the built-in code tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardizationOverrides {
    pub regions: BTreeMap<String, String>,
    pub drugs: BTreeMap<String, String>,
    pub units: BTreeMap<String, UnitConversion>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Source ids in merge priority order, lowest first.
    pub fn source_order(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config(
                "at least one [[sources]] entry is required".to_string(),
            ));
        }
        let supported = get_supported_sources();
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if !supported.contains(&source.kind.as_str()) {
                return Err(PipelineError::Config(format!(
                    "source '{}' has unknown kind '{}' (expected one of {:?})",
                    source.id, source.kind, supported
                )));
            }
        }
        self.weights.validate()?;

        if self.retry.max_attempts == 0 || self.retry.factor < 1.0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be >= 1 and retry.factor >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.imputation.coverage_threshold) {
            return Err(PipelineError::Config(
                "imputation.coverage_threshold must lie in [0, 1]".to_string(),
            ));
        }
        if self.imputation.neighbors_k == 0 {
            return Err(PipelineError::Config(
                "imputation.neighbors_k must be >= 1".to_string(),
            ));
        }
        if self.scoring.freshness_half_life_hours <= 0.0 {
            return Err(PipelineError::Config(
                "scoring.freshness_half_life_hours must be positive".to_string(),
            ));
        }
        if self.store.capacity == 0 {
            return Err(PipelineError::Config(
                "store.capacity must be >= 1".to_string(),
            ));
        }
        if self.run_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "run_timeout_secs must be >= 1".to_string(),
            ));
        }
        if !(self.indicators.prevalence_rate > 0.0 && self.indicators.prevalence_rate <= 1.0) {
            return Err(PipelineError::Config(
                "indicators.prevalence_rate must lie in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
