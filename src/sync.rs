//! One synchronisation run: download, extract, merge, index
//!
//! [`Workspace`] is the context every command works through. It owns the
//! store handle, the merge checkpoints and the transfer states, and each
//! component gets exactly the part it writes.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, SourceSpec};
use crate::download::{
    extract_document, DownloadManager, DownloadReport, RangeFetcher, TransferError, TransferStateStore,
};
use crate::import::{CheckpointError, CheckpointStore, MergeEngine, MergeReport, SourceFile};
use crate::index::{BuildMode, BuildReport, IndexBuildError, IndexBuilder};
use crate::store::{RegistryStore, SledStore, StoreError};

/// Failures to open the workspace. Everything after that is reported per file.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to open transfer state: {0}")]
    Transfer(#[from] TransferError),
    #[error("failed to open merge state: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How a configured file could not be handed to the merge
#[derive(Debug)]
pub struct SourceProblem {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Re-merge unchanged files and rebuild the index regardless
    pub force: bool,
    pub quiet: bool,
}

/// Everything that happened during one sync
#[derive(Debug)]
pub struct SyncReport {
    pub download: DownloadReport,
    /// Files that were not merged because they are missing or unreadable
    pub skipped: Vec<SourceProblem>,
    pub merge: MergeReport,
    pub index: Result<BuildReport, IndexBuildError>,
}

impl SyncReport {
    pub fn failure_count(&self) -> usize {
        self.download.failures().count()
            + self.skipped.len()
            + self.merge.failures().count()
            + usize::from(self.index.is_err())
    }

    /// Human-readable failure lines
    pub fn failure_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for file in self.download.failures() {
            lines.push(format!("download {}: {}", file.name, file.outcome));
        }
        for problem in &self.skipped {
            lines.push(format!("prepare {}: {}", problem.file_name, problem.reason));
        }
        for source in self.merge.failures() {
            lines.push(format!("merge {}: {}", source.source, source.outcome));
        }
        if let Err(e) = &self.index {
            lines.push(format!("index: {}", e));
        }
        lines
    }
}

/// Store, state directories and configuration of one data directory
pub struct Workspace {
    pub config: Config,
    pub store: Arc<dyn RegistryStore>,
    pub checkpoints: CheckpointStore,
    pub transfers: TransferStateStore,
}

impl Workspace {
    /// Open (creating if needed) every directory and the store
    pub fn open(config: Config) -> Result<Self, SyncError> {
        let store = Arc::new(SledStore::open(config.data.store_dir())?);
        Self::with_store(config, store)
    }

    /// Use an already opened store
    pub fn with_store(config: Config, store: Arc<dyn RegistryStore>) -> Result<Self, SyncError> {
        fs::create_dir_all(config.data.downloads_dir())?;
        fs::create_dir_all(config.data.extracted_dir())?;
        let state_dir = config.data.state_dir();
        let checkpoints = CheckpointStore::open(state_dir.join("merge"))?;
        let transfers = TransferStateStore::open(state_dir.join("transfers"))?;
        Ok(Self {
            config,
            store,
            checkpoints,
            transfers,
        })
    }

    /// Fetch every configured file
    pub async fn download(&self, fetcher: Arc<dyn RangeFetcher>, quiet: bool) -> DownloadReport {
        let targets = DownloadManager::targets(&self.config.download, &self.config.data.downloads_dir());
        info!("Synchronising {} upstream files", targets.len());
        DownloadManager::new(fetcher, self.transfers.clone(), &self.config.download)
            .with_progress(quiet)
            .run(targets)
            .await
    }

    /// Extracted files for every configured file whose download is complete
    pub fn prepare_sources(&self) -> (Vec<SourceFile>, Vec<SourceProblem>) {
        let mut sources = Vec::new();
        let mut problems = Vec::new();
        for spec in &self.config.download.files {
            match self.prepare_source(spec) {
                Ok(source) => sources.push(source),
                Err(reason) => {
                    warn!("Not merging {}: {}", spec.file_name, reason);
                    problems.push(SourceProblem {
                        file_name: spec.file_name.clone(),
                        reason,
                    });
                }
            }
        }
        (sources, problems)
    }

    fn prepare_source(&self, spec: &SourceSpec) -> Result<SourceFile, String> {
        let complete = self
            .transfers
            .load(&spec.file_name)
            .map_err(|e| e.to_string())?
            .is_some_and(|state| state.is_complete());
        if !complete {
            return Err("download is not complete".to_string());
        }
        let archive: PathBuf = self.config.data.downloads_dir().join(&spec.file_name);
        let path = extract_document(&archive, &self.config.data.extracted_dir()).map_err(|e| e.to_string())?;
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.file_name.clone());
        Ok(SourceFile::new(id, spec.section, path))
    }

    pub fn merge_engine(&self, force: bool, quiet: bool) -> MergeEngine {
        MergeEngine::new(self.store.clone(), self.checkpoints.clone(), &self.config.merge)
            .with_force(force)
            .with_quiet(quiet)
    }

    pub fn index_builder(&self, quiet: bool) -> IndexBuilder {
        IndexBuilder::new(self.store.clone(), self.checkpoints.clone()).with_quiet(quiet)
    }

    /// Download, extract, merge and index. Failing files are reported and
    /// the rest of the run continues.
    pub async fn sync(&self, fetcher: Arc<dyn RangeFetcher>, options: SyncOptions) -> SyncReport {
        let download = self.download(fetcher, options.quiet).await;
        let (sources, skipped) = self.prepare_sources();
        let merge = self.merge_engine(options.force, options.quiet).merge_all(&sources);

        let mode = if options.force { BuildMode::Force } else { BuildMode::Incremental };
        let index = self.index_builder(options.quiet).build(mode);
        if let Err(e) = &index {
            warn!("Derived index build failed: {}", e);
        }

        let report = SyncReport {
            download,
            skipped,
            merge,
            index,
        };
        info!("Sync finished with {} failures", report.failure_count());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::RemoteFileState;
    use crate::types::Section;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.data.data_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_only_completed_downloads_are_merged() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::with_store(config(&dir), Arc::new(SledStore::temporary().unwrap())).unwrap();
        let files = workspace.config.download.files.clone();

        // First file complete, second partial, the rest never started
        let downloads = workspace.config.data.downloads_dir();
        crate::download::write_single_entry_zip(
            &downloads.join(&files[0].file_name),
            "lihtandmed.csv",
            b"ariregistri_kood;nimi\n",
        )
        .unwrap();
        let mut complete = RemoteFileState::new("u", downloads.join(&files[0].file_name));
        complete.confirm(10).unwrap();
        complete.mark_complete();
        workspace.transfers.save(&files[0].file_name, &complete).unwrap();

        let mut partial = RemoteFileState::new("u", downloads.join(&files[1].file_name));
        partial.reset(Default::default(), Some(100));
        partial.confirm(50).unwrap();
        workspace.transfers.save(&files[1].file_name, &partial).unwrap();

        let (sources, problems) = workspace.prepare_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "ettevotja_rekvisiidid__lihtandmed.csv");
        assert_eq!(sources[0].section, Section::Basic);
        assert!(sources[0].path.exists());
        assert_eq!(problems.len(), files.len() - 1);
        assert_eq!(problems[0].file_name, files[1].file_name);
    }
}
