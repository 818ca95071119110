//! Enforcer configuration
//!
//! Loaded from defaults, a TOML/YAML/JSON file, or `DOCTRINE_*` environment
//! variables. The configuration is an explicit value handed to the enforcer
//! builder; nothing here is global.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::DoctrineError;
use crate::formatter::envelope::DEFAULT_DOCUMENT_TTL_SECONDS;
use crate::record::DEFAULT_SCHEMA_VERSION;
use crate::violations::DEFAULT_SENSITIVE_FIELDS;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for DoctrineError {
    fn from(err: ConfigError) -> Self {
        DoctrineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Doctrine enforcement configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctrineConfig {
    /// Run validation at all; when off every candidate is passed through
    pub enabled: bool,

    /// Reject invalid candidates instead of repairing them
    pub strict: bool,

    /// Field names stripped from stored violation payloads, in addition to
    /// `password`, `token` and `secret`
    pub sensitive_fields: Vec<String>,

    /// Source id used by records created without one
    pub default_source_id: String,

    /// Schema version hashed into generated signatures
    pub schema_version: String,

    /// Directory violation reports are written to
    pub report_dir: Option<PathBuf>,

    /// JSON-lines file successful enforcements are appended to
    pub audit_log: Option<PathBuf>,

    /// TTL stamped on document-store writes
    pub document_ttl_seconds: u64,
}

impl Default for DoctrineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: true,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect(),
            default_source_id: "doctrine".to_string(),
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            report_dir: None,
            audit_log: None,
            document_ttl_seconds: DEFAULT_DOCUMENT_TTL_SECONDS,
        }
    }
}

impl DoctrineConfig {
    pub fn builder() -> DoctrineConfigBuilder {
        DoctrineConfigBuilder::new()
    }

    /// Load from a `.toml`, `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let config: Self = match extension.as_str() {
            "toml" => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            "json" => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `DOCTRINE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| parse_flag(&v).unwrap_or(default))
                .unwrap_or(default)
        };

        Self {
            enabled: flag("DOCTRINE_ENABLED", defaults.enabled),
            strict: flag("DOCTRINE_STRICT", defaults.strict),
            sensitive_fields: lookup("DOCTRINE_SENSITIVE_FIELDS")
                .map(|v| {
                    v.split(',')
                        .map(|f| f.trim().to_string())
                        .filter(|f| !f.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.sensitive_fields),
            default_source_id: lookup("DOCTRINE_SOURCE_ID").unwrap_or(defaults.default_source_id),
            schema_version: defaults.schema_version,
            report_dir: lookup("DOCTRINE_REPORT_DIR").map(PathBuf::from),
            audit_log: lookup("DOCTRINE_AUDIT_LOG").map(PathBuf::from),
            document_ttl_seconds: defaults.document_ttl_seconds,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_source_id.trim().is_empty() {
            return Err(ConfigError::Invalid("default_source_id must not be empty".to_string()));
        }
        if self.schema_version.trim().is_empty() {
            return Err(ConfigError::Invalid("schema_version must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for DoctrineConfig
#[derive(Debug, Default)]
pub struct DoctrineConfigBuilder {
    config: DoctrineConfig,
}

impl DoctrineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn sensitive_field(mut self, field: impl Into<String>) -> Self {
        self.config.sensitive_fields.push(field.into());
        self
    }

    pub fn default_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.config.default_source_id = source_id.into();
        self
    }

    pub fn schema_version(mut self, version: impl Into<String>) -> Self {
        self.config.schema_version = version.into();
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_dir = Some(dir.into());
        self
    }

    pub fn audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.audit_log = Some(path.into());
        self
    }

    pub fn document_ttl_seconds(mut self, ttl: u64) -> Self {
        self.config.document_ttl_seconds = ttl;
        self
    }

    pub fn build(self) -> Result<DoctrineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
