//! Configuration types for the volume analysis pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the PLY `opacity` column is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpacityEncoding {
    /// Logits if any value is negative, otherwise linear.
    #[default]
    Auto,
    /// Raw logits; always mapped through the sigmoid.
    Logit,
    /// Already in [0, 1].
    Linear,
}

/// Where scan artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that scan identifiers are resolved against
    #[serde(default = "default_scan_dir")]
    pub scan_dir: PathBuf,
}

fn default_scan_dir() -> PathBuf {
    PathBuf::from("scans")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scan_dir: default_scan_dir(),
        }
    }
}

/// Configuration for the density filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Opacity threshold for single-scan analysis
    #[serde(default = "default_opacity_threshold")]
    pub opacity_threshold: f32,

    /// Opacity threshold for growth analysis when the request omits one
    #[serde(default = "default_growth_threshold")]
    pub growth_threshold: f32,

    /// Encoding of the PLY opacity column
    #[serde(default)]
    pub opacity_encoding: OpacityEncoding,
}

fn default_opacity_threshold() -> f32 {
    0.2
}

fn default_growth_threshold() -> f32 {
    0.5
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            opacity_threshold: default_opacity_threshold(),
            growth_threshold: default_growth_threshold(),
            opacity_encoding: OpacityEncoding::default(),
        }
    }
}

/// Configuration for statistical outlier removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierConfig {
    /// Run outlier removal after the density filter
    #[serde(default = "default_outliers_enabled")]
    pub enabled: bool,

    /// Neighbours used for the mean distance of each point
    #[serde(default = "default_nb_neighbors")]
    pub nb_neighbors: usize,

    /// Points beyond mean + std_ratio * sigma are dropped
    #[serde(default = "default_std_ratio")]
    pub std_ratio: f32,
}

fn default_outliers_enabled() -> bool {
    true
}

fn default_nb_neighbors() -> usize {
    20
}

fn default_std_ratio() -> f32 {
    2.0
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: default_outliers_enabled(),
            nb_neighbors: default_nb_neighbors(),
            std_ratio: default_std_ratio(),
        }
    }
}

/// Configuration for hull construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HullConfig {
    /// Relative tolerance, scaled by the largest bounding box extent
    #[serde(default = "default_hull_epsilon")]
    pub epsilon: f64,
}

fn default_hull_epsilon() -> f64 {
    1e-9
}

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            epsilon: default_hull_epsilon(),
        }
    }
}

/// Configuration for the loaded-scan cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached scans; 0 disables caching
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_entries() -> usize {
    16
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

/// Configuration for response formatting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Decimal places in responses; None keeps full precision
    #[serde(default)]
    pub decimals: Option<u32>,
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub outliers: OutlierConfig,

    #[serde(default)]
    pub hull: HullConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("filter.opacity_threshold", self.filter.opacity_threshold),
            ("filter.growth_threshold", self.filter.growth_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if !(self.outliers.std_ratio.is_finite() && self.outliers.std_ratio > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "outliers.std_ratio must be positive, got {}",
                self.outliers.std_ratio
            )));
        }

        if !(self.hull.epsilon.is_finite() && self.hull.epsilon > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "hull.epsilon must be positive, got {}",
                self.hull.epsilon
            )));
        }

        Ok(())
    }
}
