//! Ingestion of export files into the store
//!
//! ```text
//! export file ──► RecordSource ──► WriteBatch ──► RegistryStore
//!                    (cursor)                          │
//!                       └──────── CheckpointStore ◄────┘
//!                                (after each commit)
//! ```
//!
//! [`RecordDecoder`] streams one JSON array element at a time and
//! [`CsvDecoder`] one row of the `;`-separated basic export; both normalise
//! through the lenient shapes in [`raw`]. [`MergeEngine`] commits batches
//! and advances the [`CheckpointStore`] only after a commit is durable.

pub mod checkpoint;
pub mod csv_decoder;
pub mod decoder;
pub mod engine;
pub mod progress;
pub mod raw;
pub mod source;

pub use checkpoint::{CheckpointError, CheckpointStore, MergeCheckpoint, MergedSource};
pub use csv_decoder::CsvDecoder;
pub use decoder::{open_source, Cursor, DecodeError, DecodedRecord, RecordDecoder, RecordSource};
pub use engine::MergeEngine;
pub use progress::MergeProgress;
pub use source::{MergeError, MergeOutcome, MergeReport, MergeStats, SourceFile, SourceReport};
