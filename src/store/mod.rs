//! Local structured store
//!
//! [`RegistryStore`] is the only surface through which companies and the
//! derived tables are read or written. The merge engine writes companies in
//! batches, the index builder replaces the derived tables, and everything
//! else reads. [`SledStore`] is the default backend.

mod filter;
mod sled_store;

pub use filter::{Bounds, CompanyFilter, PersonFilter, SortKey};
pub use sled_store::SledStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{
    CompanyRecord, DerivedFields, Enrichment, OwnershipEdge, PersonIndexEntry, RegistryCode, UpsertOutcome,
};

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("company {0} not found")]
    NotFound(RegistryCode),
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Which ownership edges of a company to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// Edges whose held company is the given one (its owners)
    Up,
    /// Edges whose holder is the given company (its holdings)
    Down,
}

/// Records staged for one all-or-nothing commit
#[derive(Debug, Default)]
pub struct WriteBatch {
    records: Vec<CompanyRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, record: CompanyRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CompanyRecord] {
        &self.records
    }
}

/// Per-outcome counts of a committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl BatchOutcome {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    pub fn add(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Aggregate counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub companies: u64,
    /// Companies carrying enrichment data
    pub enriched: u64,
    pub ownership_edges: u64,
    pub person_entries: u64,
    /// Generation of the current derived tables (0 = never built)
    pub derived_generation: u64,
    /// Company count per status code
    pub by_status: BTreeMap<String, u64>,
}

/// Sizes of a committed derived-table generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedCounts {
    pub generation: u64,
    pub edges: u64,
    pub persons: u64,
}

/// Builds a replacement for the derived tables. Nothing is visible until
/// [`DerivedWriter::commit`]; dropping the writer discards the staged data.
pub trait DerivedWriter {
    fn add_edge(&mut self, edge: &OwnershipEdge) -> Result<(), StoreError>;
    fn add_person(&mut self, entry: &PersonIndexEntry) -> Result<(), StoreError>;
    /// Replace the current derived tables with the staged ones in one step
    fn commit(self: Box<Self>) -> Result<DerivedCounts, StoreError>;
}

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<CompanyRecord, StoreError>> + 'a>;

/// Storage contract consumed by merge, index build, traversal and queries
pub trait RegistryStore: Send + Sync {
    /// Fold one record into the store
    fn upsert(&self, record: CompanyRecord) -> Result<UpsertOutcome, StoreError> {
        let mut batch = self.begin_batch();
        batch.upsert(record);
        let outcome = self.commit_batch(batch)?;
        Ok(if outcome.inserted > 0 {
            UpsertOutcome::Inserted
        } else if outcome.updated > 0 {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Unchanged
        })
    }

    fn begin_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply every upsert of `batch` or none of them
    fn commit_batch(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError>;

    fn get_by_code(&self, code: RegistryCode) -> Result<Option<CompanyRecord>, StoreError>;

    /// Lazily yield matching companies (code order unless sorted by name)
    fn query(&self, filter: &CompanyFilter) -> RecordIter<'_>;

    /// Replace the derived fields of one company
    fn write_derived_columns(&self, code: RegistryCode, fields: &DerivedFields) -> Result<bool, StoreError>;

    /// Replace the enrichment sub-section of one company
    fn apply_enrichment(&self, code: RegistryCode, enrichment: Enrichment) -> Result<(), StoreError>;

    fn read_ownership_edges(&self, code: RegistryCode, direction: EdgeDirection) -> Result<Vec<OwnershipEdge>, StoreError>;

    fn list_person_entries(&self, filter: &PersonFilter) -> Result<Vec<PersonIndexEntry>, StoreError>;

    fn derived_writer(&self) -> Result<Box<dyn DerivedWriter + '_>, StoreError>;

    /// Every stored registry code in ascending order
    fn scan_codes(&self) -> Box<dyn Iterator<Item = Result<RegistryCode, StoreError>> + '_>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Make committed writes durable
    fn flush(&self) -> Result<(), StoreError>;
}
