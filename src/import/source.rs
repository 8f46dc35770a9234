//! Merge inputs, outcomes and errors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::checkpoint::CheckpointError;
use super::decoder::DecodeError;
use crate::store::{BatchOutcome, StoreError};
use crate::types::Section;

/// One extracted export file to merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Stable identifier used for checkpoints and the merged ledger
    pub id: String,
    /// Section every record of the file supplies
    pub section: Section,
    pub path: PathBuf,
}

impl SourceFile {
    pub fn new(id: impl Into<String>, section: Section, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            section,
            path: path.into(),
        }
    }
}

/// Errors that stop the merge of one file
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Counters for one merge run of one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Records decoded in this run
    pub records_read: u64,
    /// Records committed in this run
    pub records_committed: u64,
    /// Store transactions committed
    pub batches: u64,
    /// Bytes of the file consumed in this run
    pub bytes: u64,
    #[serde(skip)]
    pub changes: BatchOutcome,
}

impl MergeStats {
    pub fn add(&mut self, other: &MergeStats) {
        self.records_read += other.records_read;
        self.records_committed += other.records_committed;
        self.batches += other.batches;
        self.bytes += other.bytes;
        self.changes.add(other.changes);
    }
}

/// How the merge of one file ended
#[derive(Debug)]
pub enum MergeOutcome {
    /// This file version was merged before
    AlreadyMerged,
    /// Every record committed; the file is in the merged ledger
    Completed,
    /// Stopped at the record limit; the checkpoint continues it next run
    Stopped,
    Failed(MergeError),
}

impl MergeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, MergeOutcome::Failed(_))
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::AlreadyMerged => f.write_str("already merged"),
            MergeOutcome::Completed => f.write_str("merged"),
            MergeOutcome::Stopped => f.write_str("stopped at record limit"),
            MergeOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Result of merging one file
#[derive(Debug)]
pub struct SourceReport {
    pub source: String,
    pub stats: MergeStats,
    pub outcome: MergeOutcome,
}

/// Results of a merge run over several files
#[derive(Debug, Default)]
pub struct MergeReport {
    pub sources: Vec<SourceReport>,
}

impl MergeReport {
    pub fn failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.outcome.is_failure())
    }

    pub fn source(&self, id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == id)
    }

    /// Summed counters of every file
    pub fn totals(&self) -> MergeStats {
        let mut totals = MergeStats::default();
        for source in &self.sources {
            totals.add(&source.stats);
        }
        totals
    }

    /// Whether any file reached the end of its records in this run
    pub fn completed_any(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s.outcome, MergeOutcome::Completed))
    }
}
