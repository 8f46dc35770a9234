//! Data directory layout

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where downloads, extracted files, sync state and the store live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root data directory
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: directories::ProjectDirs::from("", "", "regindex")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".regindex")),
        }
    }
}

impl DataConfig {
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.data_dir.join("extracted")
    }

    /// Transfer state and merge checkpoints
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("registry.sled")
    }
}
