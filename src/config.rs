//! Publishing Configuration
//!
//! Every field has a default, so a missing file means the standard
//! documentation-site layout.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::raster::GhostscriptRasterizer;
use crate::source::SourceLocator;
use crate::DEFAULT_RMSE_THRESHOLD;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    #[serde(default = "default_compile_list")]
    pub compile_list: PathBuf,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub publish: PublishTarget,
    #[serde(default)]
    pub topic: TopicConfig,
    #[serde(default)]
    pub raster: RasterConfig,
}

fn default_compile_list() -> PathBuf {
    PathBuf::from("scripts/compile_list.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_locator")]
    pub locator: String,
    #[serde(default = "default_ledger_name")]
    pub ledger_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_locator() -> String {
    "https://c-plus-python.github.io/cppy-docs/resources/".to_string()
}

fn default_ledger_name() -> String {
    "std_checksum.toml".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            locator: default_locator(),
            ledger_name: default_ledger_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SourceConfig {
    pub fn locator(&self) -> SourceLocator {
        SourceLocator::parse(&self.locator)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishTarget {
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,
    /// Files removed from the resources directory before promotion.
    #[serde(default = "default_placeholders")]
    pub placeholders: Vec<String>,
    /// Commit even when some artifacts failed, keeping their published
    /// version. Ids with no published version still block the commit.
    #[serde(default)]
    pub allow_partial: bool,
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("pages_src/resources")
}

fn default_placeholders() -> Vec<String> {
    vec!["arbitrary-pdf.pdf".to_string()]
}

impl Default for PublishTarget {
    fn default() -> Self {
        Self {
            resources_dir: default_resources_dir(),
            placeholders: default_placeholders(),
            allow_partial: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_topic_path")]
    pub path: PathBuf,
    #[serde(default = "default_start_marker")]
    pub start_marker: String,
    #[serde(default = "default_end_marker")]
    pub end_marker: String,
}

fn default_true() -> bool {
    true
}

fn default_topic_path() -> PathBuf {
    PathBuf::from("pages_src/topics/standards.topic")
}

fn default_start_marker() -> String {
    "@REPLACE_START".to_string()
}

fn default_end_marker() -> String {
    "@REPLACE_END".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_topic_path(),
            start_marker: default_start_marker(),
            end_marker: default_end_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RasterConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_resolution")]
    pub resolution_dpi: u32,
    #[serde(default = "default_threshold")]
    pub rmse_threshold: f64,
    /// Parent of the per-run scratch directory; system temp when unset.
    #[serde(default)]
    pub scratch_parent: Option<PathBuf>,
}

fn default_program() -> String {
    "gs".to_string()
}

fn default_device() -> String {
    "png16m".to_string()
}

fn default_resolution() -> u32 {
    72
}

fn default_threshold() -> f64 {
    DEFAULT_RMSE_THRESHOLD
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            device: default_device(),
            resolution_dpi: default_resolution(),
            rmse_threshold: default_threshold(),
            scratch_parent: None,
        }
    }
}

impl RasterConfig {
    pub fn rasterizer(&self) -> GhostscriptRasterizer {
        GhostscriptRasterizer {
            program: self.program.clone(),
            device: self.device.clone(),
            resolution_dpi: self.resolution_dpi,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            compile_list: default_compile_list(),
            source: SourceConfig::default(),
            publish: PublishTarget::default(),
            topic: TopicConfig::default(),
            raster: RasterConfig::default(),
        }
    }
}

impl PublishConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.raster.rmse_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Validation(format!(
                "raster.rmse_threshold must be a non-negative number, got {threshold}"
            )));
        }
        if self.raster.resolution_dpi == 0 {
            return Err(ConfigError::Validation(
                "raster.resolution_dpi must be positive".into(),
            ));
        }
        if self.source.ledger_name.trim().is_empty() {
            return Err(ConfigError::Validation("source.ledger_name must not be empty".into()));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Validation("source.timeout_secs must be positive".into()));
        }
        let topic = &self.topic;
        if topic.enabled {
            if topic.start_marker.is_empty() || topic.end_marker.is_empty() {
                return Err(ConfigError::Validation("topic markers must not be empty".into()));
            }
            if topic.start_marker == topic.end_marker {
                return Err(ConfigError::Validation(
                    "topic start and end markers must differ".into(),
                ));
            }
        }
        Ok(())
    }
}
