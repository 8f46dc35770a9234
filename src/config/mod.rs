//! Configuration for regindex

mod data;
mod download;
mod logging;
mod merge;

pub use data::DataConfig;
pub use download::{DownloadConfig, SourceSpec, DEFAULT_BASE_URL};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use merge::{MergeConfig, TraversalConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default user agent for upstream requests
pub const DEFAULT_USER_AGENT: &str = "regindex/0.1 (+https://github.com/regindex)";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory layout
    #[serde(default)]
    pub data: DataConfig,
    /// Upstream files and transfer settings
    #[serde(default)]
    pub download: DownloadConfig,
    /// Merge engine settings
    #[serde(default)]
    pub merge: MergeConfig,
    /// Group traversal settings
    #[serde(default)]
    pub traversal: TraversalConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML (used by `init`)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.data.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }

        // Download validation
        match url::Url::parse(&self.download.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!("base_url must be http(s), got scheme '{}'", url.scheme())),
            Err(e) => errors.push(format!("base_url is not a valid URL: {}", e)),
        }
        if self.download.files.is_empty() {
            errors.push("download.files must list at least one file".to_string());
        }
        let mut seen = HashSet::new();
        for spec in &self.download.files {
            if spec.file_name.is_empty() || spec.file_name.contains('/') || spec.file_name.contains('\\') {
                errors.push(format!("invalid file name '{}'", spec.file_name));
            }
            if !seen.insert(spec.file_name.as_str()) {
                errors.push(format!("file '{}' listed more than once", spec.file_name));
            }
        }
        if self.download.max_concurrent == 0 {
            errors.push("max_concurrent must be positive".to_string());
        }
        if self.download.chunk_size == 0 {
            errors.push("chunk_size must be positive".to_string());
        }
        if self.download.timeout_secs == 0 {
            errors.push("timeout_secs must be positive".to_string());
        }

        // Merge validation
        if self.merge.batch_size == 0 {
            errors.push("batch_size must be positive".to_string());
        }
        if self.merge.max_records == Some(0) {
            errors.push("max_records must be positive when set".to_string());
        }

        // Traversal validation
        if self.traversal.default_max_depth == 0 {
            errors.push("default_max_depth must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
