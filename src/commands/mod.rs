//! Command implementations for the regindex binary

mod download;
mod group;
mod index;
mod init;
mod merge;
mod search;
mod stats;
mod status;
mod sync;

pub use download::download_files;
pub use group::{show_group, GroupArgs};
pub use index::build_index;
pub use init::init_config;
pub use merge::merge_files;
pub use search::{search_companies, SearchArgs};
pub use stats::show_stats;
pub use status::show_status;
pub use sync::run_sync;

use anyhow::{Context, Result};
use regindex::config::Config;
use regindex::Workspace;

/// Open the store and state directories under the configured data dir
pub(crate) fn open_workspace(config: Config) -> Result<Workspace> {
    let data_dir = config.data.data_dir.clone();
    Workspace::open(config).with_context(|| format!("Failed to open workspace in {}", data_dir.display()))
}
