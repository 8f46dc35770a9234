//! Concurrent, resumable transfer of the configured upstream files

use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{RangeFetcher, RemoteFileState, TransferError, TransferStateStore};
use crate::config::DownloadConfig;
use crate::util::file_len;

/// One remote file and where its local copy lives
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    /// Stable identity used for the transfer state (the upstream file name)
    pub name: String,
    pub url: String,
    pub dest: PathBuf,
}

/// What happened to one file during a run
#[derive(Debug)]
pub enum TransferOutcome {
    /// Local copy already matched upstream
    Skipped,
    /// Fetched from the first byte
    Downloaded { bytes: u64 },
    /// Continued from a previously confirmed prefix
    Resumed { from: u64, bytes: u64 },
    Failed(TransferError),
}

impl TransferOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TransferOutcome::Failed(_))
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Skipped => write!(f, "up to date"),
            TransferOutcome::Downloaded { bytes } => write!(f, "downloaded {} bytes", bytes),
            TransferOutcome::Resumed { from, bytes } => {
                write!(f, "resumed at byte {}, fetched {} bytes", from, bytes)
            }
            TransferOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct FileTransfer {
    pub name: String,
    pub dest: PathBuf,
    pub outcome: TransferOutcome,
}

/// Per-file results of one download run
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub files: Vec<FileTransfer>,
}

impl DownloadReport {
    pub fn failures(&self) -> impl Iterator<Item = &FileTransfer> {
        self.files.iter().filter(|f| f.outcome.is_failure())
    }

    /// Files whose local copy is complete after this run
    pub fn completed(&self) -> impl Iterator<Item = &FileTransfer> {
        self.files.iter().filter(|f| !f.outcome.is_failure())
    }

    pub fn outcome(&self, name: &str) -> Option<&TransferOutcome> {
        self.files.iter().find(|f| f.name == name).map(|f| &f.outcome)
    }
}

/// Downloads every target with at most `max_concurrent` transfers in flight
pub struct DownloadManager {
    fetcher: Arc<dyn RangeFetcher>,
    states: TransferStateStore,
    chunk_size: usize,
    max_concurrent: usize,
    max_restarts: u32,
    progress: Option<MultiProgress>,
}

impl DownloadManager {
    pub fn new(fetcher: Arc<dyn RangeFetcher>, states: TransferStateStore, config: &DownloadConfig) -> Self {
        Self {
            fetcher,
            states,
            chunk_size: config.chunk_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            max_restarts: config.max_restarts,
            progress: None,
        }
    }

    /// Show one progress bar per file
    pub fn with_progress(mut self, quiet: bool) -> Self {
        self.progress = if quiet { None } else { Some(MultiProgress::new()) };
        self
    }

    /// Targets for every configured file, stored under `downloads_dir`
    pub fn targets(config: &DownloadConfig, downloads_dir: &Path) -> Vec<DownloadTarget> {
        config
            .files
            .iter()
            .map(|spec| DownloadTarget {
                name: spec.file_name.clone(),
                url: config.url_for(spec),
                dest: downloads_dir.join(&spec.file_name),
            })
            .collect()
    }

    /// Transfer all targets. Failures are reported per file and never stop
    /// the other transfers.
    pub async fn run(&self, targets: Vec<DownloadTarget>) -> DownloadReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let worker = FileWorker {
                fetcher: self.fetcher.clone(),
                states: self.states.clone(),
                chunk_size: self.chunk_size,
                max_restarts: self.max_restarts,
                bar: self.progress.as_ref().map(|mp| new_bar(mp, &target.name)),
            };
            let semaphore = semaphore.clone();
            let name = target.name.clone();
            let dest = target.dest.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| TransferError::Task(e.to_string()))?;
                worker.transfer(&target).await
            });
            handles.push((name, dest, handle));
        }

        let mut report = DownloadReport::default();
        for (name, dest, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!("Download of {} failed: {}", name, e);
                    TransferOutcome::Failed(e)
                }
                Err(e) => {
                    warn!("Download task for {} panicked: {}", name, e);
                    TransferOutcome::Failed(TransferError::Task(e.to_string()))
                }
            };
            report.files.push(FileTransfer { name, dest, outcome });
        }
        report
    }
}

fn new_bar(mp: &MultiProgress, name: &str) -> ProgressBar {
    let bar = mp.add(ProgressBar::new(0));
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:50} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_message(name.to_string());
    bar
}

enum Step {
    Finished,
    /// Upstream changed under us; start over from byte zero
    Restart,
}

/// Transfers a single file; owns that file's transfer state for the run
struct FileWorker {
    fetcher: Arc<dyn RangeFetcher>,
    states: TransferStateStore,
    chunk_size: usize,
    max_restarts: u32,
    bar: Option<ProgressBar>,
}

impl FileWorker {
    async fn transfer(&self, target: &DownloadTarget) -> Result<TransferOutcome, TransferError> {
        let meta = self.fetcher.probe(&target.url).await?;
        let mut state = match self.states.load(&target.name)? {
            Some(state) if state.url == target.url => state,
            _ => RemoteFileState::new(&target.url, &target.dest),
        };
        state.local_path = target.dest.clone();
        let local_len = file_len(&target.dest)?;

        let unchanged = state.validator.matches(&meta.validator);
        if unchanged && state.is_complete() && local_len == state.confirmed_bytes {
            debug!("{} is up to date", target.name);
            if let Some(bar) = &self.bar {
                bar.finish_with_message(format!("{} (up to date)", target.name));
            }
            return Ok(TransferOutcome::Skipped);
        }

        if !unchanged {
            if state.confirmed_bytes > 0 {
                info!("{} changed upstream, discarding local copy", target.name);
            }
            state.reset(meta.validator.clone(), meta.total_size);
        } else if state.expected_size.is_none() {
            state.expected_size = meta.total_size;
        }

        // Only the confirmed prefix of the local file is trusted
        state.completed_at = None;
        state.confirmed_bytes = state.confirmed_bytes.min(local_len);
        truncate_to(&target.dest, state.confirmed_bytes).await?;
        self.states.save(&target.name, &state)?;

        let resumed_from = state.confirmed_bytes;
        if resumed_from > 0 {
            info!("Resuming {} at byte {}", target.name, resumed_from);
        }
        if let Some(bar) = &self.bar {
            bar.set_length(state.expected_size.unwrap_or(0));
            bar.set_position(state.confirmed_bytes);
        }

        let mut restarts = 0;
        loop {
            match self.fetch_remaining(target, &mut state).await? {
                Step::Finished => break,
                Step::Restart => {
                    restarts += 1;
                    if restarts > self.max_restarts {
                        return Err(TransferError::ValidatorChanged(target.name.clone()));
                    }
                    warn!("{} changed during transfer, restarting from zero", target.name);
                    let meta = self.fetcher.probe(&target.url).await?;
                    state.reset(meta.validator, meta.total_size);
                    truncate_to(&target.dest, 0).await?;
                    self.states.save(&target.name, &state)?;
                    if let Some(bar) = &self.bar {
                        bar.set_length(state.expected_size.unwrap_or(0));
                        bar.set_position(0);
                    }
                }
            }
        }

        state.mark_complete();
        self.states.save(&target.name, &state)?;
        if let Some(bar) = &self.bar {
            bar.finish();
        }

        let outcome = if restarts == 0 && resumed_from > 0 {
            TransferOutcome::Resumed {
                from: resumed_from,
                bytes: state.confirmed_bytes - resumed_from,
            }
        } else {
            TransferOutcome::Downloaded {
                bytes: state.confirmed_bytes,
            }
        };
        info!("{}: {}", target.name, outcome);
        Ok(outcome)
    }

    /// Fetch everything after the confirmed prefix, confirming every
    /// `chunk_size` bytes before reading on.
    async fn fetch_remaining(
        &self,
        target: &DownloadTarget,
        state: &mut RemoteFileState,
    ) -> Result<Step, TransferError> {
        let start = state.confirmed_bytes;
        if state.expected_size.is_some_and(|total| start >= total) {
            return Ok(Step::Finished);
        }

        let if_range = state.validator.if_range();
        let response = self
            .fetcher
            .fetch_range(&target.url, start, if_range.as_deref())
            .await?;

        if response.meta.validator.conflicts(&state.validator) {
            return Ok(Step::Restart);
        }
        if response.start != start {
            if response.start == 0 {
                // Range ignored or If-Range failed: the server sent the whole entity
                return Ok(Step::Restart);
            }
            return Err(TransferError::Network(format!(
                "{} answered a range request for byte {} with byte {}",
                target.url, start, response.start
            )));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target.dest)
            .await?;
        let mut body = response.body;
        let mut pending: Vec<u8> = Vec::with_capacity(self.chunk_size);

        while let Some(piece) = body.next().await {
            match piece {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    while pending.len() >= self.chunk_size {
                        let rest = pending.split_off(self.chunk_size);
                        self.commit_chunk(&mut file, &pending, &target.name, state).await?;
                        pending = rest;
                    }
                }
                Err(e) => {
                    // Keep what arrived intact before the failure
                    if !pending.is_empty() {
                        self.commit_chunk(&mut file, &pending, &target.name, state).await?;
                    }
                    return Err(e);
                }
            }
        }
        if !pending.is_empty() {
            self.commit_chunk(&mut file, &pending, &target.name, state).await?;
        }

        match state.expected_size {
            Some(expected) if state.confirmed_bytes < expected => Err(TransferError::Incomplete {
                name: target.name.clone(),
                received: state.confirmed_bytes,
                expected,
            }),
            _ => Ok(Step::Finished),
        }
    }

    async fn commit_chunk(
        &self,
        file: &mut File,
        chunk: &[u8],
        name: &str,
        state: &mut RemoteFileState,
    ) -> Result<(), TransferError> {
        file.write_all(chunk).await?;
        file.flush().await?;
        file.sync_data().await?;
        state.confirm(chunk.len() as u64)?;
        self.states.save(name, state)?;
        if let Some(bar) = &self.bar {
            bar.set_position(state.confirmed_bytes);
        }
        Ok(())
    }
}

/// Cut the local file down to `len` bytes, creating it if missing
async fn truncate_to(path: &Path, len: u64) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .await?;
    file.set_len(len).await?;
    file.sync_all().await?;
    Ok(())
}
