//! Configuration parsing.
//!
//! Loads the YAML run configuration (with environment variable expansion),
//! applies defaults and validates it.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyColumnsSnafu, EmptyLabelSnafu, EmptyLayerPathSnafu, EnvInterpolationSnafu,
    ReadFileSnafu, YamlParseSnafu,
};

/// Main configuration structure for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub layers: LayersConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Additions to, or replacements of, the built-in column mappings.
    #[serde(default)]
    pub schemas: SchemaOverrides,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Roots of the four storage layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayersConfig {
    pub staging: String,
    pub raw: String,
    pub curated: String,
    pub sandbox: String,
    /// Relative directory of the registry dataset inside each layer.
    /// Example: "Dados_Externos/RFB - Base de CNPJs"
    #[serde(default)]
    pub dataset: String,
}

/// Text encoding of the raw delimited files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// ISO-8859-1, the publisher's encoding.
    #[default]
    Latin1,
    /// UTF-8; invalid sequences are replaced.
    Utf8,
}

impl Encoding {
    /// The decoder for this encoding.
    ///
    /// ISO-8859-1 is read as its Windows-1252 superset.
    pub fn decoder(self) -> &'static encoding_rs::Encoding {
        match self {
            Encoding::Latin1 => encoding_rs::WINDOWS_1252,
            Encoding::Utf8 => encoding_rs::UTF_8,
        }
    }
}

/// Raw-file ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub encoding: Encoding,

    /// Name segment marking a file that follows the legacy raw-CSV naming
    /// (e.g. `F.K03200$W.SIMPLES.CSV.D40511`). Such files do not take part
    /// in version resolution and are never pruned.
    #[serde(default = "default_raw_marker")]
    pub raw_marker: String,

    /// Rows per Arrow batch when converting raw files (default: 8192).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            raw_marker: default_raw_marker(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_raw_marker() -> String {
    "CSV".to_string()
}

fn default_batch_size() -> usize {
    8192
}

/// Overrides applied on top of the built-in schema registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaOverrides {
    /// Suffix whose columns apply to unlisted suffixes (default: SIMPLES).
    #[serde(default)]
    pub generic: Option<String>,
    /// Suffixes that are never converted.
    #[serde(default)]
    pub skip: Vec<String>,
    /// Extra or replacement mappings, suffix -> ordered columns.
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<String>>,
}

/// Remote re-fetch of corrupted archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_enabled")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: default_fetch_enabled(),
            base_url: default_base_url(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_fetch_enabled() -> bool {
    true
}

fn default_base_url() -> String {
    "http://200.152.38.155/CNPJ/".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    600
}

/// Final output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Suffix of the final snapshot and Delta table (default: FINAL).
    #[serde(default = "default_label")]
    pub label: String,

    /// Substring identifying the simplified-tax-regime support file.
    #[serde(default = "default_simples_marker")]
    pub simples_marker: String,

    #[serde(default)]
    pub compression: ParquetCompression,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            simples_marker: default_simples_marker(),
            compression: ParquetCompression::default(),
        }
    }
}

fn default_label() -> String {
    "FINAL".to_string()
}

fn default_simples_marker() -> String {
    "SIMPLES".to_string()
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file, optionally expanding environment variables.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        let content = if interpolate_env {
            vars::expand(&content).map_err(|problems| {
                EnvInterpolationSnafu {
                    message: problems.join("\n"),
                }
                .build()
            })?
        } else {
            content
        };
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let layers = [
            ("staging", &self.layers.staging),
            ("raw", &self.layers.raw),
            ("curated", &self.layers.curated),
            ("sandbox", &self.layers.sandbox),
        ];
        for (layer, path) in layers {
            ensure!(!path.is_empty(), EmptyLayerPathSnafu { layer });
        }
        ensure!(!self.output.label.is_empty(), EmptyLabelSnafu);
        for (suffix, columns) in &self.schemas.tables {
            ensure!(!columns.is_empty(), EmptyColumnsSnafu { suffix });
        }
        Ok(())
    }
}
