//! Query filters over stored companies and person index entries

use chrono::NaiveDate;

use crate::types::{CompanyRecord, PersonIndexEntry, RegistryCode};

/// Inclusive bounds; a missing side is unbounded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for Bounds<T> {
    fn default() -> Self {
        Self { min: None, max: None }
    }
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// A bounded range never matches a missing value
    pub fn contains(&self, value: Option<T>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        match value {
            Some(v) => self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max),
            None => false,
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Code,
    Name,
}

/// Predicate over stored companies. Text fields match case-insensitive
/// substrings; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct CompanyFilter {
    /// Current name or any historical name
    pub name: Option<String>,
    pub code: Option<RegistryCode>,
    /// County, city or street of the current address
    pub location: Option<String>,
    pub status: Option<String>,
    /// Name or identifier of any related person
    pub person: Option<String>,
    /// Role held by the matched person (or by anyone when `person` is unset)
    pub role: Option<String>,
    pub registered: Bounds<NaiveDate>,
    pub capital: Bounds<f64>,
    /// Employee count of the latest annual report
    pub employees: Bounds<u32>,
    pub order: Option<SortKey>,
    pub limit: Option<usize>,
}

impl CompanyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_code(mut self, code: RegistryCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_person(mut self, person: impl Into<String>) -> Self {
        self.person = Some(person.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_registered(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.registered = Bounds::new(from, to);
        self
    }

    pub fn with_capital(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.capital = Bounds::new(min, max);
        self
    }

    pub fn with_employees(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.employees = Bounds::new(min, max);
        self
    }

    pub fn ordered_by(mut self, key: SortKey) -> Self {
        self.order = Some(key);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` satisfies every set criterion
    pub fn matches(&self, record: &CompanyRecord) -> bool {
        if self.code.is_some_and(|code| code != record.code) {
            return false;
        }
        if let Some(name) = &self.name {
            let needle = name.to_lowercase();
            let current = record.name.to_lowercase().contains(&needle);
            if !current
                && !record
                    .name_history
                    .iter()
                    .any(|entry| entry.name.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        if let Some(location) = &self.location {
            let haystack = record.location.as_ref().map(|l| l.haystack()).unwrap_or_default();
            if !haystack.contains(&location.to_lowercase()) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            let matched = record
                .status
                .as_ref()
                .is_some_and(|s| s.to_lowercase().contains(&status.to_lowercase()));
            if !matched {
                return false;
            }
        }
        if !self.matches_people(record) {
            return false;
        }
        self.registered.contains(record.registered_on)
            && self.capital.contains(record.capital.as_ref().map(|c| c.amount))
            && self.employees.contains(record.employee_counts().0)
    }

    fn matches_people(&self, record: &CompanyRecord) -> bool {
        match (&self.person, &self.role) {
            (None, None) => true,
            (Some(person), None) => {
                record.parties().any(|p| p.person_matches(person))
                    || record.enrichment.as_ref().is_some_and(|e| {
                        let needle = person.to_lowercase();
                        e.persons.iter().any(|p| {
                            p.name.to_lowercase().contains(&needle) || p.personal_id.contains(&needle)
                        })
                    })
            }
            (None, Some(role)) => record.parties().any(|p| p.role_matches(role)),
            (Some(person), Some(role)) => record
                .parties()
                .any(|p| p.person_matches(person) && p.role_matches(role)),
        }
    }
}

/// Predicate over person index entries
#[derive(Debug, Clone, Default)]
pub struct PersonFilter {
    /// Name substring (case-insensitive)
    pub name: Option<String>,
    /// Exact identifier
    pub id_code: Option<String>,
    /// Role substring (case-insensitive)
    pub role: Option<String>,
    pub company: Option<RegistryCode>,
    pub limit: Option<usize>,
}

impl PersonFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_id_code(mut self, id_code: impl Into<String>) -> Self {
        self.id_code = Some(id_code.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_company(mut self, company: RegistryCode) -> Self {
        self.company = Some(company);
        self
    }

    pub fn matches(&self, entry: &PersonIndexEntry) -> bool {
        self.name
            .as_ref()
            .map_or(true, |n| entry.person.name.to_lowercase().contains(&n.to_lowercase()))
            && self
                .id_code
                .as_ref()
                .map_or(true, |id| entry.person.id_code.as_deref() == Some(id.as_str()))
            && self
                .role
                .as_ref()
                .map_or(true, |r| entry.role.to_lowercase().contains(&r.to_lowercase()))
            && self.company.map_or(true, |c| entry.company == c)
    }
}
