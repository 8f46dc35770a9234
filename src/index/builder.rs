//! Derived index builder
//!
//! Recomputes everything derivable from the stored companies: per-company
//! derived fields, the ownership edge tables and the person index. The output
//! is a pure function of primary data, so a failed build can simply be run
//! again.

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::import::{CheckpointError, CheckpointStore};
use crate::store::{CompanyFilter, DerivedCounts, RegistryStore, StoreError};
use crate::types::{
    CompanyRecord, DerivedFields, Holder, OwnershipEdge, PartyKind, PartyRef, PersonIndexEntry, PersonKey,
    RegistryCode, Validity,
};

/// Role code prefix of management board positions
const BOARD_ROLE_PREFIX: &str = "JUH";
/// Role description fragment of management board positions
const BOARD_ROLE_TEXT: &str = "juhatuse";

#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// When to rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Only when files were merged since the last build
    Incremental,
    /// Always
    Force,
}

/// Summary of one build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    /// Nothing was pending, so no build ran
    pub skipped: bool,
    pub companies: u64,
    /// Companies whose derived fields changed
    pub derived_updated: u64,
    pub counts: DerivedCounts,
    /// Merged files the build covered
    pub sources: BTreeSet<String>,
}

/// Rebuilds the derived tables from the store
pub struct IndexBuilder {
    store: Arc<dyn RegistryStore>,
    checkpoints: CheckpointStore,
    quiet: bool,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn RegistryStore>, checkpoints: CheckpointStore) -> Self {
        Self {
            store,
            checkpoints,
            quiet: false,
        }
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn build(&self, mode: BuildMode) -> Result<BuildReport, IndexBuildError> {
        let pending = self.checkpoints.pending()?;
        if mode == BuildMode::Incremental && pending.is_empty() {
            info!("No newly merged files, derived index is current");
            return Ok(BuildReport {
                skipped: true,
                ..Default::default()
            });
        }

        info!("Building derived index ({} merged files pending)", pending.len());

        // Pass 1: holders can only resolve to companies that exist
        let known: HashSet<RegistryCode> = self.store.scan_codes().collect::<Result<_, _>>()?;
        let progress = self.progress_bar(known.len() as u64);

        // Pass 2
        let mut report = BuildReport::default();
        let mut writer = self.store.derived_writer()?;
        for item in self.store.query(&CompanyFilter::new()) {
            let record = item?;
            report.companies += 1;

            let fields = derive_fields(&record);
            if self.store.write_derived_columns(record.code, &fields)? {
                report.derived_updated += 1;
            }
            for edge in ownership_edges(&record, &known) {
                writer.add_edge(&edge)?;
            }
            for entry in person_entries(&record) {
                writer.add_person(&entry)?;
            }

            if let Some(ref pb) = progress {
                pb.inc(1);
            }
        }
        report.counts = writer.commit()?;
        self.store.flush()?;

        self.checkpoints.clear_pending(&pending)?;
        report.sources = pending;

        if let Some(pb) = progress {
            pb.finish_with_message(format!(
                "{} edges, {} person entries",
                report.counts.edges, report.counts.persons
            ));
        }
        info!(
            "Derived index generation {}: {} companies, {} edges, {} person entries, {} derived updates",
            report.counts.generation,
            report.companies,
            report.counts.edges,
            report.counts.persons,
            report.derived_updated
        );
        Ok(report)
    }

    fn progress_bar(&self, total: u64) -> Option<ProgressBar> {
        if self.quiet {
            return None;
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} companies {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    }
}

/// Derived fields of one company
pub fn derive_fields(record: &CompanyRecord) -> DerivedFields {
    let (latest, previous) = record.employee_counts();
    let employee_delta = match (latest, previous) {
        (Some(latest), Some(previous)) => Some(i64::from(latest) - i64::from(previous)),
        _ => None,
    };

    let shareholders: HashSet<PersonKey> = record.active_ownership().map(|o| o.holder.key()).collect();
    let board: HashSet<PersonKey> = record
        .personnel
        .iter()
        .filter(|r| r.is_open() && is_board_role(&r.role, r.role_text.as_deref()))
        .map(|r| r.person.key())
        .collect();

    DerivedFields {
        latest_employees: latest,
        previous_employees: previous,
        employee_delta,
        growing: employee_delta.is_some_and(|d| d > 0),
        active_shareholders: shareholders.len() as u32,
        active_board_members: board.len() as u32,
    }
}

fn is_board_role(role: &str, role_text: Option<&str>) -> bool {
    role.to_ascii_uppercase().starts_with(BOARD_ROLE_PREFIX)
        || role_text.is_some_and(|t| t.to_lowercase().contains(BOARD_ROLE_TEXT))
}

/// Resolve the holding party of an ownership entry
pub fn resolve_holder(party: &PartyRef, known: &HashSet<RegistryCode>) -> Holder {
    if let Some(code) = party.company_code().filter(|code| known.contains(code)) {
        return Holder::Company(code);
    }
    match party.kind {
        PartyKind::Legal => Holder::External(party.key()),
        PartyKind::Natural | PartyKind::Unknown => Holder::Person(party.key()),
    }
}

/// One edge per ownership entry, historical ones included
fn ownership_edges(record: &CompanyRecord, known: &HashSet<RegistryCode>) -> Vec<OwnershipEdge> {
    record
        .ownership
        .iter()
        .map(|entry| OwnershipEdge {
            holder: resolve_holder(&entry.holder, known),
            held: record.code,
            share_percent: entry.share_percent,
            valid_from: entry.valid_from,
            valid_to: entry.valid_to,
        })
        .collect()
}

/// Person index entries of one company, without duplicates
fn person_entries(record: &CompanyRecord) -> Vec<PersonIndexEntry> {
    let mut entries: Vec<PersonIndexEntry> = Vec::new();
    for party in record.parties() {
        let entry = PersonIndexEntry {
            person: party.party.key(),
            company: record.code,
            role: party.role.to_string(),
            section: party.section,
        };
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    if entries.len() > 1 {
        debug!("{}: {} person entries", record.code, entries.len());
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EdgeDirection, PersonFilter, SledStore};
    use crate::types::{AnnualReport, OwnershipEntry, PersonnelRole, Section};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn party(kind: PartyKind, name: &str, id: &str) -> PartyRef {
        PartyRef {
            kind,
            first_name: None,
            name: name.to_string(),
            id_code: Some(id.to_string()),
        }
    }

    fn holding(holder: PartyRef, percent: f64, valid_to: Option<NaiveDate>) -> OwnershipEntry {
        OwnershipEntry {
            holder,
            share_percent: Some(percent),
            share_amount: None,
            currency: None,
            valid_from: None,
            valid_to,
        }
    }

    fn company(code: u64, name: &str) -> CompanyRecord {
        let mut record = CompanyRecord::new(RegistryCode(code), name);
        record.sections.insert(Section::General);
        record
    }

    /// 1 is held by company 2 and a person; 2 is held by a foreign entity
    fn seed(store: &SledStore) {
        let mut one = company(1, "Alpha OÜ");
        one.sections.insert(Section::Shareholders);
        one.ownership.push(holding(party(PartyKind::Legal, "Beta AS", "2"), 60.0, None));
        one.ownership.push(holding(party(PartyKind::Natural, "Tamm", "38001010000"), 40.0, None));
        one.ownership.push(holding(
            party(PartyKind::Natural, "Kask", "49001010000"),
            10.0,
            NaiveDate::from_ymd_opt(2015, 1, 1),
        ));
        one.annual_reports = vec![
            AnnualReport { year: 2022, employees: Some(4) },
            AnnualReport { year: 2023, employees: Some(7) },
        ];
        one.personnel.push(PersonnelRole {
            person: party(PartyKind::Natural, "Tamm", "38001010000"),
            role: "JUHL".to_string(),
            role_text: Some("Juhatuse liige".to_string()),
            valid_from: None,
            valid_to: None,
        });
        store.upsert(one).unwrap();

        let mut two = company(2, "Beta AS");
        two.sections.insert(Section::Shareholders);
        two.ownership.push(holding(party(PartyKind::Legal, "Foreign Holdings Ltd", "HRB 1234"), 100.0, None));
        store.upsert(two).unwrap();
    }

    fn builder(dir: &TempDir, store: Arc<SledStore>) -> IndexBuilder {
        let checkpoints = CheckpointStore::open(dir.path()).unwrap();
        IndexBuilder::new(store, checkpoints).with_quiet(true)
    }

    #[test]
    fn test_derive_fields() {
        let store = SledStore::temporary().unwrap();
        seed(&store);
        let record = store.get_by_code(RegistryCode(1)).unwrap().unwrap();

        let fields = derive_fields(&record);
        assert_eq!(fields.latest_employees, Some(7));
        assert_eq!(fields.previous_employees, Some(4));
        assert_eq!(fields.employee_delta, Some(3));
        assert!(fields.growing);
        assert_eq!(fields.active_shareholders, 2);
        assert_eq!(fields.active_board_members, 1);
    }

    #[test]
    fn test_resolve_holder() {
        let known: HashSet<RegistryCode> = [RegistryCode(2)].into_iter().collect();
        assert_eq!(
            resolve_holder(&party(PartyKind::Legal, "Beta AS", "2"), &known),
            Holder::Company(RegistryCode(2))
        );
        assert!(matches!(
            resolve_holder(&party(PartyKind::Legal, "Gamma AS", "3"), &known),
            Holder::External(_)
        ));
        // A personal code never resolves to a company
        assert!(matches!(
            resolve_holder(&party(PartyKind::Natural, "Tamm", "2"), &known),
            Holder::Person(_)
        ));
    }

    #[test]
    fn test_build_writes_edges_and_persons() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::temporary().unwrap());
        seed(&store);

        let report = builder(&dir, store.clone()).build(BuildMode::Force).unwrap();
        assert!(!report.skipped);
        assert_eq!(report.companies, 2);
        assert_eq!(report.derived_updated, 2);
        assert_eq!(report.counts.edges, 4);
        assert_eq!(report.counts.persons, 5);

        let up = store.read_ownership_edges(RegistryCode(1), EdgeDirection::Up).unwrap();
        assert_eq!(up.len(), 3);
        assert_eq!(up[0].holder, Holder::Company(RegistryCode(2)));
        let down = store.read_ownership_edges(RegistryCode(2), EdgeDirection::Down).unwrap();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].held, RegistryCode(1));
        let foreign = store.read_ownership_edges(RegistryCode(2), EdgeDirection::Up).unwrap();
        assert!(matches!(foreign[0].holder, Holder::External(_)));

        let tamm = store
            .list_person_entries(&PersonFilter::new().with_id_code("38001010000"))
            .unwrap();
        let roles: Vec<_> = tamm.iter().map(|e| e.role.as_str()).collect();
        assert_eq!(roles, vec!["JUHL", "shareholder"]);

        let stored = store.get_by_code(RegistryCode(1)).unwrap().unwrap();
        assert_eq!(stored.derived.active_board_members, 1);
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::temporary().unwrap());
        seed(&store);
        let builder = builder(&dir, store.clone());

        let first = builder.build(BuildMode::Force).unwrap();
        let edges_before = store.read_ownership_edges(RegistryCode(1), EdgeDirection::Up).unwrap();
        let persons_before = store.list_person_entries(&PersonFilter::new()).unwrap();

        let second = builder.build(BuildMode::Force).unwrap();
        assert_eq!(second.counts.edges, first.counts.edges);
        assert_eq!(second.counts.persons, first.counts.persons);
        assert_eq!(second.counts.generation, first.counts.generation + 1);
        assert_eq!(second.derived_updated, 0);
        assert_eq!(store.read_ownership_edges(RegistryCode(1), EdgeDirection::Up).unwrap(), edges_before);
        assert_eq!(store.list_person_entries(&PersonFilter::new()).unwrap(), persons_before);
    }

    #[test]
    fn test_incremental_runs_only_when_pending() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::temporary().unwrap());
        seed(&store);
        let builder = builder(&dir, store.clone());

        assert!(builder.build(BuildMode::Incremental).unwrap().skipped);

        let checkpoints = CheckpointStore::open(dir.path()).unwrap();
        checkpoints.add_pending("ettevotja_rekvisiidid__osanikud.json").unwrap();
        let report = builder.build(BuildMode::Incremental).unwrap();
        assert!(!report.skipped);
        assert!(report.sources.contains("ettevotja_rekvisiidid__osanikud.json"));
        assert!(checkpoints.pending().unwrap().is_empty());
        assert!(builder.build(BuildMode::Incremental).unwrap().skipped);
    }
}
