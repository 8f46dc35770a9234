//! Resumable download of the upstream export files
//!
//! Each configured file is probed, compared against its persisted
//! [`RemoteFileState`] and fetched with byte-range continuation. Progress is
//! made durable every `chunk_size` bytes, so an interrupted sync resumes from
//! the last confirmed byte.

mod extract;
mod fetcher;
mod manager;
mod state;

pub use extract::{extract_document, extracted_name};
#[cfg(test)]
pub(crate) use extract::write_single_entry_zip;
pub use fetcher::{
    parse_content_range, ByteStream, HttpFetcher, RangeFetcher, RangeResponse, RemoteMeta,
};
pub use manager::{DownloadManager, DownloadReport, DownloadTarget, FileTransfer, TransferOutcome};
pub use state::{RemoteFileState, TransferStateStore, Validator};

use thiserror::Error;

/// Errors raised while transferring or unpacking a remote file
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream content of {0} kept changing during transfer")]
    ValidatorChanged(String),
    #[error("received {received} bytes, more than the expected {expected}")]
    Overrun { received: u64, expected: u64 },
    #[error("transfer of {name} ended at {received} of {expected} bytes")]
    Incomplete { name: String, received: u64, expected: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer state error: {0}")]
    State(#[from] serde_json::Error),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("worker task failed: {0}")]
    Task(String),
}

impl TransferError {
    /// Whether running the sync again may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Http(_)
                | TransferError::Network(_)
                | TransferError::ValidatorChanged(_)
                | TransferError::Incomplete { .. }
                | TransferError::Status { .. }
        )
    }
}

impl From<zip::result::ZipError> for TransferError {
    fn from(e: zip::result::ZipError) -> Self {
        TransferError::Archive(e.to_string())
    }
}
