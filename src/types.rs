//! Core types for the registry index
//!
//! `CompanyRecord` is the canonical entity. Every record decoded from an
//! upstream export carries exactly one [`Section`]; the store folds sections
//! into the stored record with [`CompanyRecord::absorb`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identity
// ============================================================================

/// Unique registry code of a company. Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryCode(pub u64);

impl RegistryCode {
    /// Parse a registry code from a digit string (surrounding whitespace allowed)
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        trimmed.parse().ok().map(RegistryCode)
    }

    /// Big-endian key bytes, so that store iteration order equals code order
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode a code from the first eight bytes of a store key
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
        Some(RegistryCode(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for RegistryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RegistryCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RegistryCode::parse(s).ok_or_else(|| format!("invalid registry code: {:?}", s))
    }
}

/// Source section a record was decoded from. Each upstream export file
/// supplies exactly one section for every company it lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Identity, status, address/name/capital history, annual report figures
    General,
    /// Shareholders and their holdings
    Shareholders,
    /// Beneficial owners
    BeneficialOwners,
    /// Persons entered on the registry card (board members, procurators, ...)
    CardPersons,
    /// Raw registry card log entries
    RegistryCards,
    // Variant indices are part of the stored encoding; append only
    /// Flat identity columns of the simplified CSV export
    Basic,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Basic,
        Section::General,
        Section::Shareholders,
        Section::BeneficialOwners,
        Section::CardPersons,
        Section::RegistryCards,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::General => "general",
            Self::Shareholders => "shareholders",
            Self::BeneficialOwners => "beneficial_owners",
            Self::CardPersons => "card_persons",
            Self::RegistryCards => "registry_cards",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| format!("unknown section: {}", s))
    }
}

// ============================================================================
// Parties
// ============================================================================

/// Whether a party is a natural person or a legal entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Natural,
    Legal,
    Unknown,
}

impl PartyKind {
    /// Map the upstream person-type marker (`F` natural, `J` legal)
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker.map(|m| m.trim().to_ascii_uppercase()) {
            Some(m) if m == "F" => PartyKind::Natural,
            Some(m) if m == "J" => PartyKind::Legal,
            _ => PartyKind::Unknown,
        }
    }
}

/// A person or entity referenced from a company's sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRef {
    pub kind: PartyKind,
    pub first_name: Option<String>,
    /// Surname for natural persons, business name for legal entities
    pub name: String,
    /// National identifier or registry code (may be masked upstream)
    pub id_code: Option<String>,
}

impl PartyRef {
    /// Full display name ("First Last" for natural persons)
    pub fn display_name(&self) -> String {
        match &self.first_name {
            Some(first) if !first.is_empty() => format!("{} {}", first, self.name),
            _ => self.name.clone(),
        }
    }

    /// Identity used by the person index and for ownership terminals
    pub fn key(&self) -> PersonKey {
        PersonKey {
            name: self.display_name(),
            id_code: self.id_code.clone(),
        }
    }

    /// Registry code of a legal-entity party, when its identifier is one
    pub fn company_code(&self) -> Option<RegistryCode> {
        if self.kind == PartyKind::Natural {
            return None;
        }
        self.id_code.as_deref().and_then(RegistryCode::parse)
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.first_name.cmp(&other.first_name))
            .then_with(|| self.id_code.cmp(&other.id_code))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

/// Person identity: name plus optional national identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersonKey {
    pub name: String,
    pub id_code: Option<String>,
}

impl fmt::Display for PersonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id_code {
            Some(id) => write!(f, "{} ({})", self.name, id),
            None => f.write_str(&self.name),
        }
    }
}

// ============================================================================
// Validity
// ============================================================================

/// Entries that hold over a date interval
pub trait Validity {
    fn valid_from(&self) -> Option<NaiveDate>;
    fn valid_to(&self) -> Option<NaiveDate>;

    /// No end date recorded
    fn is_open(&self) -> bool {
        self.valid_to().is_none()
    }

    /// Valid on the given date (missing bounds are unbounded)
    fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.valid_from().map_or(true, |from| from <= date)
            && self.valid_to().map_or(true, |to| to >= date)
    }
}

macro_rules! impl_validity {
    ($($ty:ty),*) => {
        $(impl Validity for $ty {
            fn valid_from(&self) -> Option<NaiveDate> {
                self.valid_from
            }
            fn valid_to(&self) -> Option<NaiveDate> {
                self.valid_to
            }
        })*
    };
}

// ============================================================================
// Sections
// ============================================================================

/// Current registered address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub county: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
}

impl Location {
    /// Lowercased "county city street" haystack for substring filters
    pub fn haystack(&self) -> String {
        [&self.county, &self.city, &self.street]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Current share capital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capital {
    pub amount: f64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    pub county: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalEntry {
    pub amount: f64,
    pub currency: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

/// Figures reported in an annual report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualReport {
    pub year: i32,
    pub employees: Option<u32>,
}

/// One logged entry on a registry card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardEntry {
    pub card_number: Option<String>,
    pub card_type: Option<String>,
    pub entry_number: Option<String>,
    pub entry_type: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub text: Option<String>,
}

/// A person holding a role in a company
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonnelRole {
    pub person: PartyRef,
    /// Upstream role code (e.g. `JUHL` for management board member)
    pub role: String,
    pub role_text: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

/// A holding in the company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEntry {
    pub holder: PartyRef,
    pub share_percent: Option<f64>,
    pub share_amount: Option<f64>,
    pub currency: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeneficialOwner {
    pub person: PartyRef,
    pub control_method: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

impl_validity!(NameEntry, AddressEntry, CapitalEntry, PersonnelRole, OwnershipEntry, BeneficialOwner);

/// Identifiers recovered by the enrichment collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub persons: Vec<EnrichedPerson>,
    pub enriched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedPerson {
    pub personal_id: String,
    pub name: String,
    pub context: String,
}

/// Values recomputed from primary data by the index builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFields {
    /// Employee count from the most recent annual report that has one
    pub latest_employees: Option<u32>,
    /// Employee count from the report before that
    pub previous_employees: Option<u32>,
    pub employee_delta: Option<i64>,
    pub growing: bool,
    pub active_shareholders: u32,
    pub active_board_members: u32,
}

// ============================================================================
// Company record
// ============================================================================

/// Canonical company entity keyed by registry code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub code: RegistryCode,
    pub name: String,
    pub status: Option<String>,
    pub legal_form: Option<String>,
    pub registered_on: Option<NaiveDate>,
    pub location: Option<Location>,
    pub capital: Option<Capital>,

    // History sequences: chronological, never rewritten
    pub name_history: Vec<NameEntry>,
    pub address_history: Vec<AddressEntry>,
    pub capital_history: Vec<CapitalEntry>,
    pub annual_reports: Vec<AnnualReport>,
    pub registry_cards: Vec<CardEntry>,

    // Set sections: replaced whenever their source file supplies them
    pub personnel: Vec<PersonnelRole>,
    pub ownership: Vec<OwnershipEntry>,
    pub beneficiaries: Vec<BeneficialOwner>,

    pub enrichment: Option<Enrichment>,
    pub derived: DerivedFields,
    /// Sections merged into this record so far
    pub sections: BTreeSet<Section>,
}

/// Role name used for shareholders in the person index
pub const ROLE_SHAREHOLDER: &str = "shareholder";
/// Role name used for beneficial owners in the person index
pub const ROLE_BENEFICIAL_OWNER: &str = "beneficial_owner";

/// A party together with the role it holds in one company
#[derive(Debug, Clone, Copy)]
pub struct PartyRole<'a> {
    pub party: &'a PartyRef,
    pub role: &'a str,
    pub role_text: Option<&'a str>,
    pub section: Section,
    /// No end date recorded
    pub open: bool,
}

impl PartyRole<'_> {
    /// Case-insensitive match against the role code or its description
    pub fn role_matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.role.to_lowercase().contains(&needle)
            || self.role_text.is_some_and(|t| t.to_lowercase().contains(&needle))
    }

    /// Case-insensitive match against the name or identifier
    pub fn person_matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.party.display_name().to_lowercase().contains(&needle)
            || self.party.id_code.as_ref().is_some_and(|id| id.to_lowercase().contains(&needle))
    }
}

/// Result of folding an incoming record into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl CompanyRecord {
    /// Create an empty record
    pub fn new(code: RegistryCode, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            status: None,
            legal_form: None,
            registered_on: None,
            location: None,
            capital: None,
            name_history: Vec::new(),
            address_history: Vec::new(),
            capital_history: Vec::new(),
            annual_reports: Vec::new(),
            registry_cards: Vec::new(),
            personnel: Vec::new(),
            ownership: Vec::new(),
            beneficiaries: Vec::new(),
            enrichment: None,
            derived: DerivedFields::default(),
            sections: BTreeSet::new(),
        }
    }

    /// Build the stored form of a record that is not in the store yet
    pub fn from_incoming(incoming: CompanyRecord) -> Self {
        let mut record = CompanyRecord::new(incoming.code, String::new());
        record.absorb(incoming);
        record
    }

    /// Fold an incoming single-section record into this one.
    ///
    /// Identity fields supplied by the incoming section replace stored ones.
    /// Values from the basic section only fill gaps once the general section
    /// has been seen. History entries are inserted at their chronological
    /// position only if an identical entry is not already present, and a
    /// closed entry replaces its stored open copy, so replaying the same
    /// record is a no-op. Enrichment and derived fields are untouched.
    pub fn absorb(&mut self, incoming: CompanyRecord) -> bool {
        let before = self.clone();
        let fill_only = incoming.sections.contains(&Section::Basic) && self.sections.contains(&Section::General);

        if !incoming.name.is_empty() && !(fill_only && !self.name.is_empty()) {
            self.name = incoming.name;
        }

        for section in &incoming.sections {
            match section {
                Section::Basic => {
                    overlay(&mut self.status, &incoming.status, fill_only);
                    overlay(&mut self.legal_form, &incoming.legal_form, fill_only);
                    overlay(&mut self.registered_on, &incoming.registered_on, fill_only);
                    overlay(&mut self.location, &incoming.location, fill_only);
                }
                Section::General => {
                    overlay(&mut self.status, &incoming.status, false);
                    overlay(&mut self.legal_form, &incoming.legal_form, false);
                    overlay(&mut self.registered_on, &incoming.registered_on, false);
                    overlay(&mut self.location, &incoming.location, false);
                    overlay(&mut self.capital, &incoming.capital, false);
                    merge_intervals(&mut self.name_history, &incoming.name_history, |a, b| a.name == b.name);
                    merge_intervals(&mut self.address_history, &incoming.address_history, |a, b| {
                        a.address == b.address
                    });
                    merge_intervals(&mut self.capital_history, &incoming.capital_history, |a, b| {
                        a.amount == b.amount && a.currency == b.currency
                    });
                    merge_history(&mut self.annual_reports, &incoming.annual_reports, |e| {
                        NaiveDate::from_ymd_opt(e.year, 12, 31)
                    });
                }
                Section::Shareholders => {
                    self.ownership = incoming.ownership.clone();
                    sort_dedup(&mut self.ownership, cmp_ownership);
                }
                Section::BeneficialOwners => {
                    self.beneficiaries = incoming.beneficiaries.clone();
                    sort_dedup(&mut self.beneficiaries, cmp_beneficiary);
                }
                Section::CardPersons => {
                    self.personnel = incoming.personnel.clone();
                    sort_dedup(&mut self.personnel, cmp_personnel);
                }
                Section::RegistryCards => {
                    merge_history(&mut self.registry_cards, &incoming.registry_cards, |e| e.entry_date);
                }
            }
        }
        self.sections.extend(incoming.sections.iter().copied());

        *self != before
    }

    /// Active (open-ended) ownership entries
    pub fn active_ownership(&self) -> impl Iterator<Item = &OwnershipEntry> {
        self.ownership.iter().filter(|entry| entry.is_open())
    }

    /// Every party attached to the record with the role it holds
    pub fn parties(&self) -> impl Iterator<Item = PartyRole<'_>> {
        let personnel = self.personnel.iter().map(|r| PartyRole {
            party: &r.person,
            role: r.role.as_str(),
            role_text: r.role_text.as_deref(),
            section: Section::CardPersons,
            open: r.is_open(),
        });
        let ownership = self.ownership.iter().map(|o| PartyRole {
            party: &o.holder,
            role: ROLE_SHAREHOLDER,
            role_text: None,
            section: Section::Shareholders,
            open: o.is_open(),
        });
        let beneficiaries = self.beneficiaries.iter().map(|b| PartyRole {
            party: &b.person,
            role: ROLE_BENEFICIAL_OWNER,
            role_text: b.control_method.as_deref(),
            section: Section::BeneficialOwners,
            open: b.is_open(),
        });
        personnel.chain(ownership).chain(beneficiaries)
    }

    /// Employee counts from the latest annual report that states one and
    /// from the latest earlier year
    pub fn employee_counts(&self) -> (Option<u32>, Option<u32>) {
        let mut reports: Vec<(i32, u32)> = self
            .annual_reports
            .iter()
            .filter_map(|r| r.employees.map(|n| (r.year, n)))
            .collect();
        // Stable: a later entry for the same year wins
        reports.sort_by_key(|(year, _)| *year);
        let Some(&(latest_year, latest)) = reports.last() else {
            return (None, None);
        };
        let previous = reports
            .iter()
            .rev()
            .find(|(year, _)| *year < latest_year)
            .map(|(_, n)| *n);
        (Some(latest), previous)
    }

    /// Every person name and identifier mentioned by the record, lowercased
    pub fn person_haystack(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut push = |party: &PartyRef| {
            parts.push(party.display_name());
            if let Some(id) = &party.id_code {
                parts.push(id.clone());
            }
        };
        self.personnel.iter().for_each(|r| push(&r.person));
        self.ownership.iter().for_each(|o| push(&o.holder));
        self.beneficiaries.iter().for_each(|b| push(&b.person));
        if let Some(enrichment) = &self.enrichment {
            for person in &enrichment.persons {
                parts.push(person.name.clone());
                parts.push(person.personal_id.clone());
            }
        }
        parts.join("\n").to_lowercase()
    }
}

/// Replace `slot` with a present value; with `fill_only` only an empty slot
fn overlay<T: Clone>(slot: &mut Option<T>, value: &Option<T>, fill_only: bool) {
    if value.is_some() && !(fill_only && slot.is_some()) {
        *slot = value.clone();
    }
}

/// Insert entries not already present, keeping chronological order.
/// Entries without a date sort first; equal dates keep arrival order.
fn merge_history<T, F>(existing: &mut Vec<T>, incoming: &[T], date: F)
where
    T: PartialEq + Clone,
    F: Fn(&T) -> Option<NaiveDate>,
{
    for entry in incoming {
        if !existing.contains(entry) {
            insert_chronological(existing, entry.clone(), &date);
        }
    }
}

/// [`merge_history`] for validity intervals. An incoming closed entry with
/// the same start date and `same` identity as a stored open entry replaces
/// it in place instead of being added next to it.
fn merge_intervals<T, S>(existing: &mut Vec<T>, incoming: &[T], same: S)
where
    T: Validity + PartialEq + Clone,
    S: Fn(&T, &T) -> bool,
{
    for entry in incoming {
        if existing.contains(entry) {
            continue;
        }
        if !entry.is_open() {
            let stale = existing.iter_mut().find(|current| {
                current.is_open() && current.valid_from() == entry.valid_from() && same(&**current, entry)
            });
            if let Some(stale) = stale {
                *stale = entry.clone();
                continue;
            }
        }
        insert_chronological(existing, entry.clone(), |e: &T| e.valid_from());
    }
}

fn insert_chronological<T, F>(existing: &mut Vec<T>, entry: T, date: F)
where
    F: Fn(&T) -> Option<NaiveDate>,
{
    let key = date(&entry);
    let position = existing
        .iter()
        .position(|current| date(current) > key)
        .unwrap_or(existing.len());
    existing.insert(position, entry);
}

fn sort_dedup<T: PartialEq>(items: &mut Vec<T>, cmp: fn(&T, &T) -> Ordering) {
    items.sort_by(cmp);
    items.dedup();
}

fn cmp_personnel(a: &PersonnelRole, b: &PersonnelRole) -> Ordering {
    a.role
        .cmp(&b.role)
        .then_with(|| a.person.cmp_key(&b.person))
        .then_with(|| a.valid_from.cmp(&b.valid_from))
        .then_with(|| a.valid_to.cmp(&b.valid_to))
        .then_with(|| a.role_text.cmp(&b.role_text))
}

fn cmp_ownership(a: &OwnershipEntry, b: &OwnershipEntry) -> Ordering {
    a.holder
        .cmp_key(&b.holder)
        .then_with(|| a.valid_from.cmp(&b.valid_from))
        .then_with(|| a.valid_to.cmp(&b.valid_to))
        .then_with(|| cmp_f64(a.share_percent, b.share_percent))
        .then_with(|| cmp_f64(a.share_amount, b.share_amount))
        .then_with(|| a.currency.cmp(&b.currency))
}

fn cmp_beneficiary(a: &BeneficialOwner, b: &BeneficialOwner) -> Ordering {
    a.person
        .cmp_key(&b.person)
        .then_with(|| a.valid_from.cmp(&b.valid_from))
        .then_with(|| a.valid_to.cmp(&b.valid_to))
        .then_with(|| a.control_method.cmp(&b.control_method))
}

fn cmp_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

// ============================================================================
// Derived index rows
// ============================================================================

/// One person/company/role association in the person index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonIndexEntry {
    pub person: PersonKey,
    pub company: RegistryCode,
    pub role: String,
    pub section: Section,
}

/// The holding side of an ownership edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Holder {
    /// Another company in the store
    Company(RegistryCode),
    /// A natural person
    Person(PersonKey),
    /// A legal entity that is not in the store (e.g. foreign)
    External(PersonKey),
}

impl Holder {
    pub fn company(&self) -> Option<RegistryCode> {
        match self {
            Holder::Company(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::Company(code) => write!(f, "company {}", code),
            Holder::Person(key) => write!(f, "person {}", key),
            Holder::External(key) => write!(f, "external {}", key),
        }
    }
}

/// Directed relation holder → held company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEdge {
    pub holder: Holder,
    pub held: RegistryCode,
    pub share_percent: Option<f64>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

impl_validity!(OwnershipEdge);

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }

    fn general(code: u64, names: &[(&str, &str)]) -> CompanyRecord {
        let mut record = CompanyRecord::new(RegistryCode(code), "Alpha OÜ");
        record.sections.insert(Section::General);
        record.status = Some("R".to_string());
        record.name_history = names
            .iter()
            .map(|(name, from)| NameEntry {
                name: name.to_string(),
                valid_from: date(from),
                valid_to: None,
            })
            .collect();
        record
    }

    #[test]
    fn test_registry_code_parse() {
        assert_eq!(RegistryCode::parse(" 10001234 "), Some(RegistryCode(10001234)));
        assert_eq!(RegistryCode::parse("12a"), None);
        assert_eq!(RegistryCode::parse(""), None);
        let code = RegistryCode(42);
        assert_eq!(RegistryCode::from_key(&code.to_key()), Some(code));
    }

    #[test]
    fn test_absorb_is_idempotent() {
        let incoming = general(1, &[("Alpha", "2001-01-01"), ("Beta", "2010-05-01")]);
        let mut stored = CompanyRecord::from_incoming(incoming.clone());
        assert_eq!(stored.name_history.len(), 2);

        let changed = stored.absorb(incoming);
        assert!(!changed);
        assert_eq!(stored.name_history.len(), 2);
    }

    #[test]
    fn test_history_appends_in_chronological_position() {
        let mut stored = CompanyRecord::from_incoming(general(1, &[("Beta", "2010-05-01")]));
        stored.absorb(general(1, &[("Alpha", "2001-01-01"), ("Gamma", "2020-01-01")]));

        let names: Vec<_> = stored.name_history.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_closed_entry_replaces_open_copy() {
        let mut stored = CompanyRecord::from_incoming(general(1, &[("Alpha", "2001-01-01")]));
        assert!(stored.name_history[0].is_open());

        let mut update = general(1, &[("Alpha", "2001-01-01"), ("Beta", "2015-03-01")]);
        update.name_history[0].valid_to = date("2015-02-28");
        assert!(stored.absorb(update.clone()));

        assert_eq!(stored.name_history.len(), 2);
        assert_eq!(stored.name_history[0].name, "Alpha");
        assert_eq!(stored.name_history[0].valid_to, date("2015-02-28"));
        assert!(stored.name_history[1].is_open());

        assert!(!stored.absorb(update));
        assert_eq!(stored.name_history.len(), 2);
    }

    #[test]
    fn test_open_entry_with_other_start_is_kept() {
        let mut stored = CompanyRecord::from_incoming(general(1, &[("Alpha", "2001-01-01")]));
        let mut update = general(1, &[("Alpha", "1999-01-01")]);
        update.name_history[0].valid_to = date("2000-12-31");
        stored.absorb(update);

        assert_eq!(stored.name_history.len(), 2);
        assert!(!stored.name_history[0].is_open());
        assert!(stored.name_history[1].is_open());
    }

    fn basic(code: u64, name: &str, status: &str, county: &str) -> CompanyRecord {
        let mut record = CompanyRecord::new(RegistryCode(code), name);
        record.sections.insert(Section::Basic);
        record.status = Some(status.to_string());
        record.legal_form = Some("OÜ".to_string());
        record.location = Some(Location {
            county: Some(county.to_string()),
            ..Location::default()
        });
        record
    }

    #[test]
    fn test_general_section_overrides_basic_values() {
        let mut stored = CompanyRecord::from_incoming(basic(1, "Alpha osaühing", "L", "Tartu maakond"));
        assert_eq!(stored.status.as_deref(), Some("L"));

        // general has a status but no location: the basic location survives
        stored.absorb(general(1, &[]));
        assert_eq!(stored.name, "Alpha OÜ");
        assert_eq!(stored.status.as_deref(), Some("R"));
        assert_eq!(stored.legal_form.as_deref(), Some("OÜ"));
        let county = stored.location.as_ref().and_then(|l| l.county.as_deref());
        assert_eq!(county, Some("Tartu maakond"));

        // a later basic record only fills gaps
        stored.absorb(basic(1, "Other name", "K", "Harju maakond"));
        assert_eq!(stored.name, "Alpha OÜ");
        assert_eq!(stored.status.as_deref(), Some("R"));
        let county = stored.location.as_ref().and_then(|l| l.county.as_deref());
        assert_eq!(county, Some("Tartu maakond"));
        assert!(stored.sections.contains(&Section::Basic));
    }

    #[test]
    fn test_basic_section_replaces_values_without_general() {
        let mut stored = CompanyRecord::from_incoming(basic(2, "Beta", "R", "Harju maakond"));
        stored.absorb(basic(2, "Beta AS", "K", "Harju maakond"));
        assert_eq!(stored.name, "Beta AS");
        assert_eq!(stored.status.as_deref(), Some("K"));
    }

    #[test]
    fn test_sections_are_independent() {
        let mut stored = CompanyRecord::from_incoming(general(7, &[]));

        let mut shareholders = CompanyRecord::new(RegistryCode(7), "");
        shareholders.sections.insert(Section::Shareholders);
        shareholders.ownership.push(OwnershipEntry {
            holder: PartyRef {
                kind: PartyKind::Legal,
                first_name: None,
                name: "Holding AS".to_string(),
                id_code: Some("10000001".to_string()),
            },
            share_percent: Some(100.0),
            share_amount: None,
            currency: None,
            valid_from: None,
            valid_to: None,
        });
        stored.absorb(shareholders);

        assert_eq!(stored.name, "Alpha OÜ");
        assert_eq!(stored.status.as_deref(), Some("R"));
        assert_eq!(stored.ownership.len(), 1);
        assert_eq!(stored.ownership[0].holder.company_code(), Some(RegistryCode(10000001)));
        assert!(stored.sections.contains(&Section::General));
        assert!(stored.sections.contains(&Section::Shareholders));
    }

    #[test]
    fn test_employee_counts_skip_years_without_figures() {
        let mut record = CompanyRecord::new(RegistryCode(1), "x");
        assert_eq!(record.employee_counts(), (None, None));

        record.annual_reports = vec![
            AnnualReport { year: 2020, employees: Some(5) },
            AnnualReport { year: 2022, employees: Some(9) },
            AnnualReport { year: 2021, employees: None },
            AnnualReport { year: 2022, employees: Some(10) },
        ];
        assert_eq!(record.employee_counts(), (Some(10), Some(5)));
    }

    #[test]
    fn test_parties_cover_all_person_sections() {
        let person = PartyRef {
            kind: PartyKind::Natural,
            first_name: Some("Mari".to_string()),
            name: "Maasikas".to_string(),
            id_code: Some("48001010000".to_string()),
        };
        let mut record = CompanyRecord::new(RegistryCode(1), "x");
        record.personnel.push(PersonnelRole {
            person: person.clone(),
            role: "JUHL".to_string(),
            role_text: Some("Juhatuse liige".to_string()),
            valid_from: None,
            valid_to: None,
        });
        record.beneficiaries.push(BeneficialOwner {
            person,
            control_method: None,
            valid_from: None,
            valid_to: date("2020-01-01"),
        });

        let parties: Vec<_> = record.parties().collect();
        assert_eq!(parties.len(), 2);
        assert!(parties[0].role_matches("juhatuse"));
        assert!(parties[0].person_matches("maasikas"));
        assert_eq!(parties[1].role, ROLE_BENEFICIAL_OWNER);
        assert!(!parties[1].open);
    }

    #[test]
    fn test_validity_window() {
        let entry = NameEntry {
            name: "x".to_string(),
            valid_from: date("2020-01-01"),
            valid_to: date("2020-12-31"),
        };
        assert!(entry.is_valid_on(NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()));
        assert!(!entry.is_valid_on(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()));
        assert!(!entry.is_open());
    }
}
