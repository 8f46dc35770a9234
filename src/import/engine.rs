//! Merge engine
//!
//! Streams each export file through the decoder in batches. Every batch is
//! one store transaction, and the checkpoint moves only after the batch is
//! committed and flushed, so an interrupted merge resumes at the last batch
//! boundary and replays nothing that was not already durable.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::checkpoint::CheckpointStore;
use super::decoder::{open_source, Cursor, RecordSource};
use super::progress::MergeProgress;
use super::source::{MergeError, MergeOutcome, MergeReport, MergeStats, SourceFile, SourceReport};
use crate::config::MergeConfig;
use crate::store::{RegistryStore, WriteBatch};
use crate::util::Fingerprint;

/// Folds export files into the store
pub struct MergeEngine {
    store: Arc<dyn RegistryStore>,
    checkpoints: CheckpointStore,
    batch_size: usize,
    max_records: Option<u64>,
    force: bool,
    quiet: bool,
}

/// Position and totals of the file being merged
struct FileRun<'a> {
    source: &'a SourceFile,
    fingerprint: Fingerprint,
    /// Records committed for this file version across runs
    committed_total: u64,
    stats: MergeStats,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RegistryStore>, checkpoints: CheckpointStore, config: &MergeConfig) -> Self {
        Self {
            store,
            checkpoints,
            batch_size: config.batch_size.max(1),
            max_records: config.max_records.map(|n| n as u64),
            force: false,
            quiet: false,
        }
    }

    /// Merge files again even if this version was merged before
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_max_records(mut self, max_records: Option<u64>) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Merge every file in order. A failing file never stops the others.
    pub fn merge_all(&self, sources: &[SourceFile]) -> MergeReport {
        let mut report = MergeReport::default();
        for source in sources {
            let result = self.merge_source(source);
            if let MergeOutcome::Failed(e) = &result.outcome {
                warn!("Merge of {} failed: {}", source.id, e);
            }
            report.sources.push(result);
        }
        report
    }

    /// Merge one file, continuing from its checkpoint
    pub fn merge_source(&self, source: &SourceFile) -> SourceReport {
        let mut stats = MergeStats::default();
        let outcome = match self.run(source, &mut stats) {
            Ok(outcome) => outcome,
            Err(e) => MergeOutcome::Failed(e),
        };
        SourceReport {
            source: source.id.clone(),
            stats,
            outcome,
        }
    }

    fn run(&self, source: &SourceFile, stats: &mut MergeStats) -> Result<MergeOutcome, MergeError> {
        let fingerprint = Fingerprint::of(&source.path)?;

        if !self.force && self.checkpoints.is_merged(&source.id, fingerprint)? {
            info!("{} unchanged since its last merge, skipping", source.id);
            return Ok(MergeOutcome::AlreadyMerged);
        }

        let checkpoint = if self.force {
            self.checkpoints.clear(&source.id)?;
            None
        } else {
            self.checkpoints.load(&source.id, fingerprint)?
        };
        let (resume, committed_total) = match &checkpoint {
            Some(c) => {
                info!(
                    "Resuming {} after record {} (byte {})",
                    source.id, c.cursor.record_index, c.cursor.offset
                );
                (Some(c.cursor), c.records_committed)
            }
            None => {
                info!("Merging {} ({})", source.id, source.section);
                (None, 0)
            }
        };

        let mut decoder = open_source(&source.path, source.section, resume)?;
        let progress = MergeProgress::new(&source.id, decoder.total_bytes(), decoder.offset(), self.quiet);
        let mut run = FileRun {
            source,
            fingerprint,
            committed_total,
            stats: MergeStats::default(),
        };

        let result = self.drain(decoder.as_mut(), &mut run, &progress);
        run.stats.bytes = progress.bytes_since_start(decoder.last_good().offset);
        *stats = run.stats;

        match result {
            Ok(true) => {
                self.checkpoints
                    .mark_merged(&source.id, fingerprint, run.committed_total)?;
                progress.finish(stats);
                info!(
                    "Merged {}: {} records ({} new, {} updated, {} unchanged)",
                    source.id,
                    stats.records_committed,
                    stats.changes.inserted,
                    stats.changes.updated,
                    stats.changes.unchanged
                );
                Ok(MergeOutcome::Completed)
            }
            Ok(false) => {
                progress.finish(stats);
                info!(
                    "Stopped {} after {} records, checkpoint at record {}",
                    source.id,
                    stats.records_committed,
                    decoder.last_good().record_index
                );
                Ok(MergeOutcome::Stopped)
            }
            Err(e) => {
                progress.abandon(&e.to_string());
                Err(e)
            }
        }
    }

    /// Decode and commit until the end of the file (true) or the record
    /// limit (false)
    fn drain(&self, decoder: &mut dyn RecordSource, run: &mut FileRun<'_>, progress: &MergeProgress) -> Result<bool, MergeError> {
        let mut batch = self.store.begin_batch();
        let mut batch_end = decoder.last_good();

        for item in &mut *decoder {
            let decoded = match item {
                Ok(decoded) => decoded,
                Err(e) => {
                    // Everything before the bad element is sound
                    self.commit(run, std::mem::take(&mut batch), batch_end)?;
                    return Err(e.into());
                }
            };
            run.stats.records_read += 1;
            batch.upsert(decoded.record);
            batch_end = decoded.cursor;

            if batch.len() >= self.batch_size {
                self.commit(run, std::mem::take(&mut batch), batch_end)?;
                progress.batch_committed(batch_end.offset, &run.stats);
            }
            if self.max_records.is_some_and(|max| run.stats.records_read >= max) {
                self.commit(run, batch, batch_end)?;
                return Ok(false);
            }
        }

        self.commit(run, batch, batch_end)?;
        Ok(true)
    }

    /// Commit one batch, make it durable, then move the checkpoint past it
    fn commit(&self, run: &mut FileRun<'_>, batch: WriteBatch, end: Cursor) -> Result<(), MergeError> {
        if batch.is_empty() {
            return Ok(());
        }
        let len = batch.len() as u64;
        let outcome = self.store.commit_batch(batch)?;
        self.store.flush()?;

        run.committed_total += len;
        self.checkpoints
            .advance(&run.source.id, run.fingerprint, end, run.committed_total)?;

        run.stats.records_committed += len;
        run.stats.batches += 1;
        run.stats.changes.add(outcome);
        debug!(
            "{}: committed {} records, checkpoint at record {}",
            run.source.id, len, end.record_index
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::decoder::DecodeError;
    use crate::store::{
        BatchOutcome, CompanyFilter, DerivedWriter, EdgeDirection, PersonFilter, RecordIter, SledStore,
        StoreError, StoreStats,
    };
    use crate::types::{
        CompanyRecord, DerivedFields, Enrichment, OwnershipEdge, PersonIndexEntry, RegistryCode, Section,
    };
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SOURCE: &str = "ettevotja_rekvisiidid__yldandmed.json";

    /// Store that fails the n-th batch commit (1-based)
    struct FlakyStore {
        inner: SledStore,
        fail_on: usize,
        commits: AtomicUsize,
    }

    impl RegistryStore for FlakyStore {
        fn commit_batch(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
            if self.commits.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.inner.commit_batch(batch)
        }
        fn get_by_code(&self, code: RegistryCode) -> Result<Option<CompanyRecord>, StoreError> {
            self.inner.get_by_code(code)
        }
        fn query(&self, filter: &CompanyFilter) -> RecordIter<'_> {
            self.inner.query(filter)
        }
        fn write_derived_columns(&self, code: RegistryCode, fields: &DerivedFields) -> Result<bool, StoreError> {
            self.inner.write_derived_columns(code, fields)
        }
        fn apply_enrichment(&self, code: RegistryCode, enrichment: Enrichment) -> Result<(), StoreError> {
            self.inner.apply_enrichment(code, enrichment)
        }
        fn read_ownership_edges(&self, code: RegistryCode, direction: EdgeDirection) -> Result<Vec<OwnershipEdge>, StoreError> {
            self.inner.read_ownership_edges(code, direction)
        }
        fn list_person_entries(&self, filter: &PersonFilter) -> Result<Vec<PersonIndexEntry>, StoreError> {
            self.inner.list_person_entries(filter)
        }
        fn derived_writer(&self) -> Result<Box<dyn DerivedWriter + '_>, StoreError> {
            self.inner.derived_writer()
        }
        fn scan_codes(&self) -> Box<dyn Iterator<Item = Result<RegistryCode, StoreError>> + '_> {
            self.inner.scan_codes()
        }
        fn stats(&self) -> Result<StoreStats, StoreError> {
            self.inner.stats()
        }
        fn flush(&self) -> Result<(), StoreError> {
            self.inner.flush()
        }
    }

    fn export(codes: &[u64]) -> String {
        let records: Vec<String> = codes
            .iter()
            .map(|code| format!(r#"{{"ariregistri_kood": {}, "nimi": "Company {}", "staatus": "R"}}"#, code, code))
            .collect();
        format!("[\n{}\n]", records.join(",\n"))
    }

    fn write_source(dir: &TempDir, content: &str) -> SourceFile {
        let path = dir.path().join(SOURCE);
        fs::write(&path, content).unwrap();
        SourceFile::new(SOURCE, Section::General, path)
    }

    fn engine(dir: &TempDir, store: Arc<dyn RegistryStore>, batch_size: usize) -> MergeEngine {
        let checkpoints = CheckpointStore::open(dir.path().join("merge")).unwrap();
        let config = MergeConfig {
            batch_size,
            max_records: None,
        };
        MergeEngine::new(store, checkpoints, &config).with_quiet(true)
    }

    fn stored_codes(store: &dyn RegistryStore) -> Vec<u64> {
        store.scan_codes().map(|c| c.unwrap().0).collect()
    }

    #[test]
    fn test_merges_file_and_records_ledger() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, &export(&[1, 2, 3, 4, 5]));
        let store = Arc::new(SledStore::temporary().unwrap());
        let engine = engine(&dir, store.clone(), 2);

        let report = engine.merge_source(&source);
        assert!(matches!(report.outcome, MergeOutcome::Completed), "{}", report.outcome);
        assert_eq!(report.stats.records_committed, 5);
        assert_eq!(report.stats.batches, 3);
        assert_eq!(report.stats.changes.inserted, 5);
        assert_eq!(stored_codes(store.as_ref()), vec![1, 2, 3, 4, 5]);

        let fingerprint = Fingerprint::of(&source.path).unwrap();
        assert!(engine.checkpoints().is_merged(SOURCE, fingerprint).unwrap());
        assert!(engine.checkpoints().get(SOURCE).unwrap().is_none());
        assert!(engine.checkpoints().pending().unwrap().contains(SOURCE));

        // Same version again is skipped
        let again = engine.merge_source(&source);
        assert!(matches!(again.outcome, MergeOutcome::AlreadyMerged));
        assert_eq!(again.stats.records_read, 0);
    }

    #[test]
    fn test_malformed_second_record_keeps_first() {
        let dir = TempDir::new().unwrap();
        let content = r#"[
            {"ariregistri_kood": 1, "nimi": "One"},
            {"ariregistri_kood": 2, "nimi": },
            {"ariregistri_kood": 3, "nimi": "Three"}
        ]"#;
        let source = write_source(&dir, content);
        let store = Arc::new(SledStore::temporary().unwrap());
        let engine = engine(&dir, store.clone(), 100);

        let report = engine.merge_source(&source);
        match &report.outcome {
            MergeOutcome::Failed(MergeError::Decode(DecodeError::InvalidRecord { record_index, .. })) => {
                assert_eq!(*record_index, 1)
            }
            other => panic!("unexpected outcome: {}", other),
        }
        assert_eq!(stored_codes(store.as_ref()), vec![1]);

        let checkpoint = engine.checkpoints().get(SOURCE).unwrap().unwrap();
        assert_eq!(checkpoint.cursor.record_index, 1);
        assert_eq!(checkpoint.records_committed, 1);
        assert!(engine.checkpoints().pending().unwrap().is_empty());
    }

    #[test]
    fn test_store_failure_resumes_at_batch_boundary() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, &export(&[1, 2, 3, 4, 5]));
        let flaky: Arc<dyn RegistryStore> = Arc::new(FlakyStore {
            inner: SledStore::open(dir.path().join("registry.sled")).unwrap(),
            fail_on: 2,
            commits: AtomicUsize::new(0),
        });

        let report = engine(&dir, flaky.clone(), 2).merge_source(&source);
        assert!(matches!(report.outcome, MergeOutcome::Failed(MergeError::Store(_))));
        assert_eq!(stored_codes(flaky.as_ref()), vec![1, 2]);

        let checkpoints = CheckpointStore::open(dir.path().join("merge")).unwrap();
        let checkpoint = checkpoints.get(SOURCE).unwrap().unwrap();
        assert_eq!(checkpoint.cursor.record_index, 2);
        drop(flaky);

        let store = Arc::new(SledStore::open(dir.path().join("registry.sled")).unwrap());
        let report = engine(&dir, store.clone(), 2).merge_source(&source);
        assert!(matches!(report.outcome, MergeOutcome::Completed));
        // Only the records after the boundary are read again
        assert_eq!(report.stats.records_read, 3);
        assert_eq!(stored_codes(store.as_ref()), vec![1, 2, 3, 4, 5]);
        let merged = checkpoints.merged(SOURCE).unwrap().unwrap();
        assert_eq!(merged.records, 5);
    }

    #[test]
    fn test_record_limit_stops_and_continues() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, &export(&[1, 2, 3, 4, 5]));
        let store = Arc::new(SledStore::temporary().unwrap());

        let limited = engine(&dir, store.clone(), 2).with_max_records(Some(3));
        let report = limited.merge_source(&source);
        assert!(matches!(report.outcome, MergeOutcome::Stopped));
        assert_eq!(stored_codes(store.as_ref()), vec![1, 2, 3]);
        assert_eq!(limited.checkpoints().get(SOURCE).unwrap().unwrap().cursor.record_index, 3);

        let report = engine(&dir, store.clone(), 2).merge_source(&source);
        assert!(matches!(report.outcome, MergeOutcome::Completed));
        assert_eq!(report.stats.records_read, 2);
        assert_eq!(stored_codes(store.as_ref()), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_forced_remerge_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, &export(&[7, 8, 9]));
        let store = Arc::new(SledStore::temporary().unwrap());

        engine(&dir, store.clone(), 2).merge_source(&source);
        let before: Vec<CompanyRecord> = store.query(&CompanyFilter::new()).map(|r| r.unwrap()).collect();

        let report = engine(&dir, store.clone(), 2).with_force(true).merge_source(&source);
        assert!(matches!(report.outcome, MergeOutcome::Completed));
        assert_eq!(report.stats.changes.unchanged, 3);
        assert_eq!(report.stats.changes.inserted + report.stats.changes.updated, 0);

        let after: Vec<CompanyRecord> = store.query(&CompanyFilter::new()).map(|r| r.unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_merge_all_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let good = write_source(&dir, &export(&[1, 2]));
        let missing = SourceFile::new(
            "ettevotja_rekvisiidid__osanikud.json",
            Section::Shareholders,
            dir.path().join("missing.json"),
        );
        let store = Arc::new(SledStore::temporary().unwrap());

        let report = engine(&dir, store.clone(), 10).merge_all(&[missing, good]);
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.failures().count(), 1);
        assert!(matches!(report.source(SOURCE).unwrap().outcome, MergeOutcome::Completed));
        assert_eq!(report.totals().records_committed, 2);
    }
}
