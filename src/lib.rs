//! regindex: business-registry ingestion and ownership indexing
//!
//! Keeps a local structured store in sync with the registry's bulk exports:
//! - Resumable, concurrent download of the zipped JSON export files
//! - Streaming decode of multi-gigabyte JSON arrays with byte-offset cursors
//! - Idempotent per-section merge into canonical company records, with
//!   checkpoints so an interrupted merge resumes at the last committed batch
//! - Derived fields, ownership edges and a person index rebuilt from the
//!   merged data
//! - Breadth-first ownership group traversal over the derived edges

pub mod config;
pub mod download;
pub mod graph;
pub mod import;
pub mod index;
pub mod store;
pub mod sync;
pub mod types;
pub mod util;

pub use config::Config;
pub use sync::{SyncOptions, SyncReport, Workspace};
