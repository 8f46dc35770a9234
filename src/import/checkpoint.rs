//! Durable merge progress
//!
//! Three kinds of state live under `<state_dir>/merge/`:
//! - `checkpoints/<source>.json`: cursor of the last committed batch of a
//!   partially merged file
//! - `merged/<source>.json`: ledger entry for a fully merged file version
//! - `pending_index.json`: files merged since the last index build

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::decoder::Cursor;
use crate::util::{file_stem_for, write_atomic, Fingerprint};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("checkpoint for {file} would move back from record {current} to {proposed}")]
    Regression {
        file: String,
        current: u64,
        proposed: u64,
    },
}

/// Resume point of a partially merged file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeCheckpoint {
    pub source: String,
    /// File version the cursor belongs to
    pub fingerprint: Fingerprint,
    pub cursor: Cursor,
    pub records_committed: u64,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry for a fully merged file version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSource {
    pub source: String,
    pub fingerprint: Fingerprint,
    pub records: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingIndex {
    sources: BTreeSet<String>,
}

/// On-disk checkpoint, ledger and pending-index state
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("checkpoints"))?;
        fs::create_dir_all(dir.join("merged"))?;
        Ok(Self { dir })
    }

    fn checkpoint_path(&self, source: &str) -> PathBuf {
        self.dir.join("checkpoints").join(format!("{}.json", file_stem_for(source)))
    }

    fn merged_path(&self, source: &str) -> PathBuf {
        self.dir.join("merged").join(format!("{}.json", file_stem_for(source)))
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join("pending_index.json")
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Stored checkpoint regardless of file version
    pub fn get(&self, source: &str) -> Result<Option<MergeCheckpoint>, CheckpointError> {
        read_json(&self.checkpoint_path(source))
    }

    /// Checkpoint for this version of the file. A checkpoint recorded against
    /// another version is discarded.
    pub fn load(&self, source: &str, fingerprint: Fingerprint) -> Result<Option<MergeCheckpoint>, CheckpointError> {
        match self.get(source)? {
            Some(checkpoint) if checkpoint.fingerprint == fingerprint => Ok(Some(checkpoint)),
            Some(_) => {
                info!("{} changed since its checkpoint, starting over", source);
                self.clear(source)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Record that everything up to `cursor` is committed. Cursors never move
    /// backwards within one file version.
    pub fn advance(
        &self,
        source: &str,
        fingerprint: Fingerprint,
        cursor: Cursor,
        records_committed: u64,
    ) -> Result<MergeCheckpoint, CheckpointError> {
        if let Some(current) = self.get(source)? {
            if current.fingerprint == fingerprint && cursor < current.cursor {
                return Err(CheckpointError::Regression {
                    file: source.to_string(),
                    current: current.cursor.record_index,
                    proposed: cursor.record_index,
                });
            }
        }
        let checkpoint = MergeCheckpoint {
            source: source.to_string(),
            fingerprint,
            cursor,
            records_committed,
            updated_at: Utc::now(),
        };
        write_atomic(&self.checkpoint_path(source), &serde_json::to_vec_pretty(&checkpoint)?)?;
        Ok(checkpoint)
    }

    pub fn clear(&self, source: &str) -> Result<(), CheckpointError> {
        remove_if_exists(&self.checkpoint_path(source))
    }

    /// All stored checkpoints, sorted by source
    pub fn list(&self) -> Result<Vec<MergeCheckpoint>, CheckpointError> {
        let mut checkpoints: Vec<MergeCheckpoint> = list_json(&self.dir.join("checkpoints"))?;
        checkpoints.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(checkpoints)
    }

    // ========================================================================
    // Merged ledger
    // ========================================================================

    pub fn merged(&self, source: &str) -> Result<Option<MergedSource>, CheckpointError> {
        read_json(&self.merged_path(source))
    }

    /// Whether this exact file version has been merged completely
    pub fn is_merged(&self, source: &str, fingerprint: Fingerprint) -> Result<bool, CheckpointError> {
        Ok(self
            .merged(source)?
            .is_some_and(|entry| entry.fingerprint == fingerprint))
    }

    /// Close out a file: clear its checkpoint, record it in the ledger and
    /// queue it for the next index build.
    pub fn mark_merged(&self, source: &str, fingerprint: Fingerprint, records: u64) -> Result<MergedSource, CheckpointError> {
        let entry = MergedSource {
            source: source.to_string(),
            fingerprint,
            records,
            completed_at: Utc::now(),
        };
        write_atomic(&self.merged_path(source), &serde_json::to_vec_pretty(&entry)?)?;
        self.clear(source)?;
        self.add_pending(source)?;
        Ok(entry)
    }

    pub fn list_merged(&self) -> Result<Vec<MergedSource>, CheckpointError> {
        let mut merged: Vec<MergedSource> = list_json(&self.dir.join("merged"))?;
        merged.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(merged)
    }

    // ========================================================================
    // Pending index set
    // ========================================================================

    pub fn pending(&self) -> Result<BTreeSet<String>, CheckpointError> {
        Ok(read_json::<PendingIndex>(&self.pending_path())?
            .unwrap_or_default()
            .sources)
    }

    pub fn add_pending(&self, source: &str) -> Result<(), CheckpointError> {
        let mut pending = self.pending()?;
        if pending.insert(source.to_string()) {
            self.write_pending(pending)?;
        }
        Ok(())
    }

    /// Remove the sources an index build covered
    pub fn clear_pending(&self, built: &BTreeSet<String>) -> Result<(), CheckpointError> {
        let mut pending = self.pending()?;
        pending.retain(|source| !built.contains(source));
        self.write_pending(pending)
    }

    fn write_pending(&self, sources: BTreeSet<String>) -> Result<(), CheckpointError> {
        let content = serde_json::to_vec_pretty(&PendingIndex { sources })?;
        write_atomic(&self.pending_path(), &content)?;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CheckpointError> {
    match fs::read(path) {
        Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn list_json<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, CheckpointError> {
    let mut items = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            items.extend(read_json(&path)?);
        }
    }
    Ok(items)
}

fn remove_if_exists(path: &Path) -> Result<(), CheckpointError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
