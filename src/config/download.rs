//! Upstream source and download configuration

use serde::{Deserialize, Serialize};

use super::DEFAULT_USER_AGENT;
use crate::types::Section;

/// Default location of the registry's open-data exports
pub const DEFAULT_BASE_URL: &str = "https://avaandmed.ariregister.rik.ee/sites/default/files/avaandmed/";

/// One upstream export file and the section it supplies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// File name relative to `base_url` (also the local file name)
    pub file_name: String,
    pub section: Section,
}

impl SourceSpec {
    pub fn new(file_name: impl Into<String>, section: Section) -> Self {
        Self {
            file_name: file_name.into(),
            section,
        }
    }
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Base URL the file names are appended to
    pub base_url: String,
    /// Files to keep synchronized
    pub files: Vec<SourceSpec>,
    /// Maximum files transferred at once
    pub max_concurrent: usize,
    /// Bytes written between durable progress updates
    pub chunk_size: usize,
    /// Read timeout (seconds) while a transfer is stalled
    pub timeout_secs: u64,
    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,
    /// User agent string
    pub user_agent: String,
    /// Restarts from zero allowed when upstream content changes mid-transfer
    pub max_restarts: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            files: default_files(),
            max_concurrent: 4,
            chunk_size: 1024 * 1024, // 1 MB
            timeout_secs: 60,
            connect_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_restarts: 1,
        }
    }
}

/// Default export files, in merge order: the flat CSV base first, so that
/// the JSON sections refine it
fn default_files() -> Vec<SourceSpec> {
    vec![
        SourceSpec::new("ettevotja_rekvisiidid__lihtandmed.csv.zip", Section::Basic),
        SourceSpec::new("ettevotja_rekvisiidid__yldandmed.json.zip", Section::General),
        SourceSpec::new("ettevotja_rekvisiidid__osanikud.json.zip", Section::Shareholders),
        SourceSpec::new("ettevotja_rekvisiidid__kasusaajad.json.zip", Section::BeneficialOwners),
        SourceSpec::new(
            "ettevotja_rekvisiidid__kaardile_kantud_isikud.json.zip",
            Section::CardPersons,
        ),
        SourceSpec::new("ettevotja_rekvisiidid__registrikaardid.json.zip", Section::RegistryCards),
    ]
}

impl DownloadConfig {
    /// Full URL of a configured file
    pub fn url_for(&self, spec: &SourceSpec) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), spec.file_name)
    }
}
