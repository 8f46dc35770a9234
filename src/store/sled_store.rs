//! Default store backend on sled
//!
//! Layout:
//! - `companies`: big-endian registry code -> bincode `CompanyRecord`
//! - `meta`: `derived_generation` -> big-endian u64
//! - `edges_up.<gen>`: held code ++ seq -> `OwnershipEdge`
//! - `edges_down.<gen>`: holder code ++ held code ++ seq -> `OwnershipEdge`
//! - `persons.<gen>`: lowercased name ++ 0 ++ company code ++ seq -> `PersonIndexEntry`
//!
//! Derived tables are rebuilt into a fresh generation and published by
//! rewriting the generation number, so readers see either the old or the new
//! tables in full.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use super::{
    BatchOutcome, CompanyFilter, DerivedCounts, DerivedWriter, EdgeDirection, PersonFilter, RecordIter,
    RegistryStore, SortKey, StoreError, StoreStats, WriteBatch,
};
use crate::types::{
    CompanyRecord, DerivedFields, Enrichment, Holder, OwnershipEdge, PersonIndexEntry, RegistryCode,
    UpsertOutcome,
};

const COMPANIES_TREE: &str = "companies";
const META_TREE: &str = "meta";
const GENERATION_KEY: &[u8] = b"derived_generation";

const EDGES_UP: &str = "edges_up";
const EDGES_DOWN: &str = "edges_down";
const PERSONS: &str = "persons";
const DERIVED_TABLES: [&str; 3] = [EDGES_UP, EDGES_DOWN, PERSONS];

/// Staged derived rows applied per sled batch
const WRITE_CHUNK: usize = 10_000;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn table_name(table: &str, generation: u64) -> String {
    format!("{}.{}", table, generation)
}

/// Generation of a derived table tree name, if it is one
fn parse_table_name(name: &[u8]) -> Option<u64> {
    let name = std::str::from_utf8(name).ok()?;
    let (table, generation) = name.rsplit_once('.')?;
    if !DERIVED_TABLES.contains(&table) {
        return None;
    }
    generation.parse().ok()
}

fn unwrap_tx<T>(result: TransactionResult<T, StoreError>) -> Result<T, StoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

/// sled-backed [`RegistryStore`]
pub struct SledStore {
    db: sled::Db,
    companies: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    /// In-memory store that is deleted on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let companies = db.open_tree(COMPANIES_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        Ok(Self { db, companies, meta })
    }

    /// Current derived generation (0 = never built)
    pub fn generation(&self) -> Result<u64, StoreError> {
        match self.meta.get(GENERATION_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("derived generation".to_string()))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn derived_tree(&self, table: &str) -> Result<Option<sled::Tree>, StoreError> {
        match self.generation()? {
            0 => Ok(None),
            generation => Ok(Some(self.db.open_tree(table_name(table, generation))?)),
        }
    }

    /// Read-modify-write of one company in a transaction. `f` returns whether
    /// it changed the record.
    fn modify<F>(&self, code: RegistryCode, f: F) -> Result<bool, StoreError>
    where
        F: Fn(&mut CompanyRecord) -> bool,
    {
        let key = code.to_key();
        let result = self.companies.transaction(|tx| {
            let bytes = tx
                .get(&key[..])?
                .ok_or(ConflictableTransactionError::Abort(StoreError::NotFound(code)))?;
            let mut record: CompanyRecord = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            if !f(&mut record) {
                return Ok(false);
            }
            let bytes = encode(&record).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&key[..], bytes)?;
            Ok(true)
        });
        unwrap_tx(result)
    }

    fn records(&self) -> impl Iterator<Item = Result<CompanyRecord, StoreError>> + '_ {
        self.companies
            .iter()
            .values()
            .map(|value| -> Result<CompanyRecord, StoreError> { decode(&value?) })
    }
}

impl RegistryStore for SledStore {
    fn commit_batch(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let records = batch.records();

        // May run more than once on conflict; all state is local to the closure
        let result = self.companies.transaction(|tx| {
            let mut outcome = BatchOutcome::default();
            for incoming in records {
                let key = incoming.code.to_key();
                let (stored, upsert) = match tx.get(&key[..])? {
                    Some(bytes) => {
                        let mut existing: CompanyRecord =
                            decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                        if !existing.absorb(incoming.clone()) {
                            outcome.record(UpsertOutcome::Unchanged);
                            continue;
                        }
                        (existing, UpsertOutcome::Updated)
                    }
                    None => (CompanyRecord::from_incoming(incoming.clone()), UpsertOutcome::Inserted),
                };
                let bytes = encode(&stored).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(&key[..], bytes)?;
                outcome.record(upsert);
            }
            Ok(outcome)
        });

        let outcome = unwrap_tx(result)?;
        debug!(
            "Committed batch: {} inserted, {} updated, {} unchanged",
            outcome.inserted, outcome.updated, outcome.unchanged
        );
        Ok(outcome)
    }

    fn get_by_code(&self, code: RegistryCode) -> Result<Option<CompanyRecord>, StoreError> {
        match self.companies.get(code.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn query(&self, filter: &CompanyFilter) -> RecordIter<'_> {
        let filter = filter.clone();
        let limit = filter.limit.unwrap_or(usize::MAX);
        let order = filter.order;

        if let Some(code) = filter.code {
            let found = match self.get_by_code(code) {
                Ok(Some(record)) if filter.matches(&record) => Some(Ok(record)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            };
            return Box::new(found.into_iter().take(limit));
        }

        let matching = self.records().filter(move |item| match item {
            Ok(record) => filter.matches(record),
            Err(_) => true,
        });

        match order {
            Some(SortKey::Name) => {
                let mut records = Vec::new();
                for item in matching {
                    match item {
                        Ok(record) => records.push(record),
                        Err(e) => return Box::new(std::iter::once(Err(e))),
                    }
                }
                records.sort_by_cached_key(|r| (r.name.to_lowercase(), r.code));
                records.truncate(limit);
                Box::new(records.into_iter().map(Ok))
            }
            Some(SortKey::Code) | None => Box::new(matching.take(limit)),
        }
    }

    fn write_derived_columns(&self, code: RegistryCode, fields: &DerivedFields) -> Result<bool, StoreError> {
        self.modify(code, |record| {
            if record.derived == *fields {
                return false;
            }
            record.derived = fields.clone();
            true
        })
    }

    fn apply_enrichment(&self, code: RegistryCode, enrichment: Enrichment) -> Result<(), StoreError> {
        self.modify(code, |record| {
            if record.enrichment.as_ref() == Some(&enrichment) {
                return false;
            }
            record.enrichment = Some(enrichment.clone());
            true
        })?;
        Ok(())
    }

    fn read_ownership_edges(&self, code: RegistryCode, direction: EdgeDirection) -> Result<Vec<OwnershipEdge>, StoreError> {
        let table = match direction {
            EdgeDirection::Up => EDGES_UP,
            EdgeDirection::Down => EDGES_DOWN,
        };
        let Some(tree) = self.derived_tree(table)? else {
            return Ok(Vec::new());
        };
        tree.scan_prefix(code.to_key())
            .values()
            .map(|value| -> Result<OwnershipEdge, StoreError> { decode(&value?) })
            .collect()
    }

    fn list_person_entries(&self, filter: &PersonFilter) -> Result<Vec<PersonIndexEntry>, StoreError> {
        let Some(tree) = self.derived_tree(PERSONS)? else {
            return Ok(Vec::new());
        };
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        for value in tree.iter().values() {
            if entries.len() >= limit {
                break;
            }
            let entry: PersonIndexEntry = decode(&value?)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn derived_writer(&self) -> Result<Box<dyn DerivedWriter + '_>, StoreError> {
        let generation = self.generation()? + 1;
        // Leftovers of an abandoned build
        for table in DERIVED_TABLES {
            self.db.drop_tree(table_name(table, generation))?;
        }
        Ok(Box::new(SledDerivedWriter {
            store: self,
            generation,
            edges_up: self.db.open_tree(table_name(EDGES_UP, generation))?,
            edges_down: self.db.open_tree(table_name(EDGES_DOWN, generation))?,
            persons: self.db.open_tree(table_name(PERSONS, generation))?,
            up_batch: sled::Batch::default(),
            down_batch: sled::Batch::default(),
            person_batch: sled::Batch::default(),
            staged: 0,
            seq: 0,
            counts: DerivedCounts {
                generation,
                ..Default::default()
            },
            committed: false,
        }))
    }

    fn scan_codes(&self) -> Box<dyn Iterator<Item = Result<RegistryCode, StoreError>> + '_> {
        Box::new(self.companies.iter().keys().map(|key| {
            let key = key?;
            RegistryCode::from_key(&key).ok_or_else(|| StoreError::Corrupt("company key".to_string()))
        }))
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats {
            derived_generation: self.generation()?,
            ..Default::default()
        };
        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        for record in self.records() {
            let record = record?;
            stats.companies += 1;
            if record.enrichment.is_some() {
                stats.enriched += 1;
            }
            let status = record.status.unwrap_or_else(|| "unknown".to_string());
            *by_status.entry(status).or_insert(0) += 1;
        }
        stats.by_status = by_status;
        if let Some(tree) = self.derived_tree(EDGES_UP)? {
            stats.ownership_edges = tree.len() as u64;
        }
        if let Some(tree) = self.derived_tree(PERSONS)? {
            stats.person_entries = tree.len() as u64;
        }
        Ok(stats)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Writes a new derived generation next to the current one
struct SledDerivedWriter<'a> {
    store: &'a SledStore,
    generation: u64,
    edges_up: sled::Tree,
    edges_down: sled::Tree,
    persons: sled::Tree,
    up_batch: sled::Batch,
    down_batch: sled::Batch,
    person_batch: sled::Batch,
    staged: usize,
    /// Insertion sequence; keeps keys unique and ordered by build order
    seq: u64,
    counts: DerivedCounts,
    committed: bool,
}

impl SledDerivedWriter<'_> {
    fn next_seq(&mut self) -> [u8; 8] {
        self.seq += 1;
        self.seq.to_be_bytes()
    }

    fn staged_one(&mut self) -> Result<(), StoreError> {
        self.staged += 1;
        if self.staged >= WRITE_CHUNK {
            self.apply_staged()?;
        }
        Ok(())
    }

    fn apply_staged(&mut self) -> Result<(), StoreError> {
        self.edges_up.apply_batch(std::mem::take(&mut self.up_batch))?;
        self.edges_down.apply_batch(std::mem::take(&mut self.down_batch))?;
        self.persons.apply_batch(std::mem::take(&mut self.person_batch))?;
        self.staged = 0;
        Ok(())
    }
}

impl DerivedWriter for SledDerivedWriter<'_> {
    fn add_edge(&mut self, edge: &OwnershipEdge) -> Result<(), StoreError> {
        let value = encode(edge)?;
        let seq = self.next_seq();

        let mut up_key = edge.held.to_key().to_vec();
        up_key.extend_from_slice(&seq);
        self.up_batch.insert(up_key, value.clone());

        if let Holder::Company(holder) = &edge.holder {
            let mut down_key = holder.to_key().to_vec();
            down_key.extend_from_slice(&edge.held.to_key());
            down_key.extend_from_slice(&seq);
            self.down_batch.insert(down_key, value);
        }

        self.counts.edges += 1;
        self.staged_one()
    }

    fn add_person(&mut self, entry: &PersonIndexEntry) -> Result<(), StoreError> {
        let value = encode(entry)?;
        let seq = self.next_seq();

        let mut key = entry.person.name.to_lowercase().into_bytes();
        key.push(0);
        key.extend_from_slice(&entry.company.to_key());
        key.extend_from_slice(&seq);
        self.person_batch.insert(key, value);

        self.counts.persons += 1;
        self.staged_one()
    }

    fn commit(self: Box<Self>) -> Result<DerivedCounts, StoreError> {
        let mut this = self;
        this.apply_staged()?;
        this.store.db.flush()?;

        this.store
            .meta
            .insert(GENERATION_KEY, &this.generation.to_be_bytes()[..])?;
        this.store.meta.flush()?;
        this.committed = true;

        // Old generations are unreachable now
        for name in this.store.db.tree_names() {
            if let Some(generation) = parse_table_name(&name) {
                if generation != this.generation {
                    this.store.db.drop_tree(&name)?;
                }
            }
        }
        debug!(
            "Published derived generation {} ({} edges, {} person entries)",
            this.generation, this.counts.edges, this.counts.persons
        );
        Ok(this.counts)
    }
}

impl Drop for SledDerivedWriter<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for table in DERIVED_TABLES {
            if let Err(e) = self.store.db.drop_tree(table_name(table, self.generation)) {
                warn!("Failed to discard staged {} table: {}", table, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PersonKey, Section};
    use chrono::Utc;

    fn general(code: u64, name: &str, status: &str) -> CompanyRecord {
        let mut record = CompanyRecord::new(RegistryCode(code), name);
        record.status = Some(status.to_string());
        record.sections.insert(Section::General);
        record
    }

    fn edge(holder: Holder, held: u64) -> OwnershipEdge {
        OwnershipEdge {
            holder,
            held: RegistryCode(held),
            share_percent: Some(50.0),
            valid_from: None,
            valid_to: None,
        }
    }

    #[test]
    fn test_batch_commit_and_lookup() {
        let store = SledStore::temporary().unwrap();
        let mut batch = store.begin_batch();
        batch.upsert(general(2, "Beta AS", "R"));
        batch.upsert(general(1, "Alpha OÜ", "R"));
        let outcome = store.commit_batch(batch).unwrap();
        assert_eq!(outcome.inserted, 2);

        let alpha = store.get_by_code(RegistryCode(1)).unwrap().unwrap();
        assert_eq!(alpha.name, "Alpha OÜ");
        assert!(store.get_by_code(RegistryCode(3)).unwrap().is_none());

        let codes: Vec<_> = store.scan_codes().map(|c| c.unwrap().0).collect();
        assert_eq!(codes, vec![1, 2]);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = SledStore::temporary().unwrap();
        assert_eq!(store.upsert(general(1, "Alpha", "R")).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(general(1, "Alpha", "R")).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.upsert(general(1, "Alpha", "L")).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.get_by_code(RegistryCode(1)).unwrap().unwrap().status.as_deref(), Some("L"));
    }

    #[test]
    fn test_same_code_twice_in_one_batch() {
        let store = SledStore::temporary().unwrap();
        let mut shareholders = CompanyRecord::new(RegistryCode(1), "");
        shareholders.sections.insert(Section::Shareholders);

        let mut batch = store.begin_batch();
        batch.upsert(general(1, "Alpha", "R"));
        batch.upsert(shareholders);
        let outcome = store.commit_batch(batch).unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.updated, 1);
        let stored = store.get_by_code(RegistryCode(1)).unwrap().unwrap();
        assert_eq!(stored.sections.len(), 2);
    }

    #[test]
    fn test_query_filters_orders_and_limits() {
        let store = SledStore::temporary().unwrap();
        for (code, name, status) in [(3, "alpha three", "R"), (1, "Charlie", "R"), (2, "Bravo", "L")] {
            store.upsert(general(code, name, status)).unwrap();
        }

        let active: Vec<_> = store
            .query(&CompanyFilter::new().with_status("R"))
            .map(|r| r.unwrap().code.0)
            .collect();
        assert_eq!(active, vec![1, 3]);

        let by_name: Vec<_> = store
            .query(&CompanyFilter::new().ordered_by(SortKey::Name).with_limit(2))
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(by_name, vec!["alpha three", "Bravo"]);

        let single: Vec<_> = store
            .query(&CompanyFilter::new().with_code(RegistryCode(2)).with_status("R"))
            .collect();
        assert!(single.is_empty());
    }

    #[test]
    fn test_enrichment_touches_only_its_section() {
        let store = SledStore::temporary().unwrap();
        store.upsert(general(1, "Alpha", "R")).unwrap();
        let before = store.get_by_code(RegistryCode(1)).unwrap().unwrap();

        let enrichment = Enrichment {
            persons: Vec::new(),
            enriched_at: Utc::now(),
        };
        store.apply_enrichment(RegistryCode(1), enrichment.clone()).unwrap();

        let after = store.get_by_code(RegistryCode(1)).unwrap().unwrap();
        assert_eq!(after.enrichment, Some(enrichment.clone()));
        assert_eq!(after.name_history, before.name_history);
        assert_eq!(after.ownership, before.ownership);
        assert!(matches!(
            store.apply_enrichment(RegistryCode(9), enrichment),
            Err(StoreError::NotFound(RegistryCode(9)))
        ));
    }

    #[test]
    fn test_derived_columns_report_changes() {
        let store = SledStore::temporary().unwrap();
        store.upsert(general(1, "Alpha", "R")).unwrap();
        let fields = DerivedFields {
            latest_employees: Some(4),
            ..Default::default()
        };
        assert!(store.write_derived_columns(RegistryCode(1), &fields).unwrap());
        assert!(!store.write_derived_columns(RegistryCode(1), &fields).unwrap());
    }

    #[test]
    fn test_derived_writer_swaps_generations() {
        let store = SledStore::temporary().unwrap();
        assert!(store.read_ownership_edges(RegistryCode(2), EdgeDirection::Up).unwrap().is_empty());

        let mut writer = store.derived_writer().unwrap();
        writer.add_edge(&edge(Holder::Company(RegistryCode(1)), 2)).unwrap();
        writer
            .add_edge(&edge(
                Holder::Person(PersonKey { name: "Mari Maasikas".to_string(), id_code: None }),
                2,
            ))
            .unwrap();
        writer
            .add_person(&PersonIndexEntry {
                person: PersonKey { name: "Mari Maasikas".to_string(), id_code: None },
                company: RegistryCode(2),
                role: "shareholder".to_string(),
                section: Section::Shareholders,
            })
            .unwrap();
        // Not visible before commit
        assert!(store.read_ownership_edges(RegistryCode(2), EdgeDirection::Up).unwrap().is_empty());
        let counts = writer.commit().unwrap();
        assert_eq!(counts, DerivedCounts { generation: 1, edges: 2, persons: 1 });

        assert_eq!(store.read_ownership_edges(RegistryCode(2), EdgeDirection::Up).unwrap().len(), 2);
        let down = store.read_ownership_edges(RegistryCode(1), EdgeDirection::Down).unwrap();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].held, RegistryCode(2));
        assert_eq!(store.list_person_entries(&PersonFilter::new().with_name("mari")).unwrap().len(), 1);

        // Abandoned rebuild leaves the published tables alone
        {
            let mut writer = store.derived_writer().unwrap();
            writer.add_edge(&edge(Holder::Company(RegistryCode(5)), 6)).unwrap();
        }
        assert_eq!(store.generation().unwrap(), 1);
        assert_eq!(store.read_ownership_edges(RegistryCode(2), EdgeDirection::Up).unwrap().len(), 2);
        assert!(store.read_ownership_edges(RegistryCode(6), EdgeDirection::Up).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let store = SledStore::temporary().unwrap();
        store.upsert(general(1, "Alpha", "R")).unwrap();
        store.upsert(general(2, "Beta", "L")).unwrap();
        store.upsert(general(3, "Gamma", "R")).unwrap();
        store
            .apply_enrichment(RegistryCode(3), Enrichment { persons: Vec::new(), enriched_at: Utc::now() })
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.companies, 3);
        assert_eq!(stats.enriched, 1);
        assert_eq!(stats.by_status.get("R"), Some(&2));
        assert_eq!(stats.derived_generation, 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("registry.sled");
        {
            let store = SledStore::open(&path).unwrap();
            store.upsert(general(1, "Alpha", "R")).unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert!(store.get_by_code(RegistryCode(1)).unwrap().is_some());
    }

    #[test]
    fn test_parse_table_name() {
        assert_eq!(parse_table_name(b"edges_up.3"), Some(3));
        assert_eq!(parse_table_name(b"companies"), None);
        assert_eq!(parse_table_name(b"persons.x"), None);
    }
}
