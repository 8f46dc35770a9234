//! Persisted per-file transfer state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::TransferError;
use crate::util::{file_stem_for, write_atomic};

/// Upstream change markers for a remote file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub size: Option<u64>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl Validator {
    /// Two validators match when every marker present on both sides is equal
    /// and at least one marker could be compared.
    pub fn matches(&self, other: &Validator) -> bool {
        !self.conflicts(other) && self.comparable(other)
    }

    /// Some marker present on both sides differs
    pub fn conflicts(&self, other: &Validator) -> bool {
        fn differs<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            matches!((a, b), (Some(a), Some(b)) if a != b)
        }
        differs(&self.size, &other.size)
            || differs(&self.last_modified, &other.last_modified)
            || differs(&self.etag, &other.etag)
    }

    fn comparable(&self, other: &Validator) -> bool {
        (self.size.is_some() && other.size.is_some())
            || (self.last_modified.is_some() && other.last_modified.is_some())
            || (self.etag.is_some() && other.etag.is_some())
    }

    /// Value for an `If-Range` header. Weak ETags are not allowed there.
    pub fn if_range(&self) -> Option<String> {
        match &self.etag {
            Some(etag) if !etag.starts_with("W/") => Some(etag.clone()),
            _ => self.last_modified.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.last_modified.is_none() && self.etag.is_none()
    }
}

/// What is known about one remote file and its local copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFileState {
    pub url: String,
    pub local_path: PathBuf,
    /// Total size announced by upstream
    pub expected_size: Option<u64>,
    pub validator: Validator,
    /// Length of the contiguous local prefix that is known to be durable
    pub confirmed_bytes: u64,
    /// Set once the whole file has been confirmed
    pub completed_at: Option<DateTime<Utc>>,
}

impl RemoteFileState {
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            local_path: local_path.into(),
            expected_size: None,
            validator: Validator::default(),
            confirmed_bytes: 0,
            completed_at: None,
        }
    }

    /// Start over against a new upstream version
    pub fn reset(&mut self, validator: Validator, expected_size: Option<u64>) {
        self.validator = validator;
        self.expected_size = expected_size;
        self.confirmed_bytes = 0;
        self.completed_at = None;
    }

    /// Record `bytes` more bytes as durable
    pub fn confirm(&mut self, bytes: u64) -> Result<(), TransferError> {
        let received = self.confirmed_bytes + bytes;
        if let Some(expected) = self.expected_size {
            if received > expected {
                return Err(TransferError::Overrun { received, expected });
            }
        }
        self.confirmed_bytes = received;
        Ok(())
    }

    /// All expected bytes are confirmed (unknown size counts once marked complete)
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
            && self.expected_size.map_or(true, |size| size == self.confirmed_bytes)
    }

    pub fn mark_complete(&mut self) {
        if self.expected_size.is_none() {
            self.expected_size = Some(self.confirmed_bytes);
        }
        self.completed_at = Some(Utc::now());
    }

    /// Completion ratio for display
    pub fn progress(&self) -> Option<f64> {
        self.expected_size
            .filter(|size| *size > 0)
            .map(|size| self.confirmed_bytes as f64 / size as f64)
    }
}

/// JSON files under `<state_dir>/transfers/`, one per remote file
#[derive(Debug, Clone)]
pub struct TransferStateStore {
    dir: PathBuf,
}

impl TransferStateStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TransferError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for(name)))
    }

    pub fn load(&self, name: &str) -> Result<Option<RemoteFileState>, TransferError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Durably replace the state of `name`
    pub fn save(&self, name: &str, state: &RemoteFileState) -> Result<(), TransferError> {
        let content = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path_for(name), &content)?;
        Ok(())
    }

    /// Every persisted state, sorted by name
    pub fn list(&self) -> Result<Vec<(String, RemoteFileState)>, TransferError> {
        let mut states = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let state: RemoteFileState = serde_json::from_slice(&fs::read(&path)?)?;
            states.push((name, state));
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn validator(size: u64, modified: &str) -> Validator {
        Validator {
            size: Some(size),
            last_modified: Some(modified.to_string()),
            etag: None,
        }
    }

    #[test]
    fn test_validator_matching() {
        let a = validator(1000, "Mon, 01 Jan 2024 00:00:00 GMT");
        assert!(a.matches(&a.clone()));
        assert!(!a.matches(&validator(1001, "Mon, 01 Jan 2024 00:00:00 GMT")));
        assert!(!a.matches(&validator(1000, "Tue, 02 Jan 2024 00:00:00 GMT")));

        // Nothing comparable never matches
        assert!(!Validator::default().matches(&Validator::default()));

        let size_only = Validator {
            size: Some(1000),
            ..Default::default()
        };
        assert!(a.matches(&size_only));
    }

    #[test]
    fn test_if_range_prefers_strong_etag() {
        let mut v = validator(10, "Mon, 01 Jan 2024 00:00:00 GMT");
        v.etag = Some("\"abc\"".to_string());
        assert_eq!(v.if_range().as_deref(), Some("\"abc\""));
        v.etag = Some("W/\"abc\"".to_string());
        assert_eq!(v.if_range().as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    }

    #[test]
    fn test_confirm_rejects_overrun() {
        let mut state = RemoteFileState::new("http://x/a.zip", "/tmp/a.zip");
        state.reset(validator(100, "x"), Some(100));
        state.confirm(60).unwrap();
        assert!(matches!(
            state.confirm(41),
            Err(TransferError::Overrun { received: 101, expected: 100 })
        ));
        assert_eq!(state.confirmed_bytes, 60);
    }

    #[test]
    fn test_reset_zeroes_progress() {
        let mut state = RemoteFileState::new("http://x/a.zip", "/tmp/a.zip");
        state.reset(validator(100, "x"), Some(100));
        state.confirm(100).unwrap();
        state.mark_complete();
        assert!(state.is_complete());

        state.reset(validator(200, "y"), Some(200));
        assert_eq!(state.confirmed_bytes, 0);
        assert!(!state.is_complete());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = TransferStateStore::open(dir.path()).unwrap();
        assert!(store.load("a.json.zip").unwrap().is_none());

        let mut state = RemoteFileState::new("http://x/a.json.zip", dir.path().join("a.json.zip"));
        state.reset(validator(10, "x"), Some(10));
        state.confirm(4).unwrap();
        store.save("a.json.zip", &state).unwrap();

        let loaded = store.load("a.json.zip").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
