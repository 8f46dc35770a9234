//! Upstream record shapes and their normalisation
//!
//! The export files use Estonian field names and are loose about types:
//! codes and percentages arrive as numbers or strings, lists may be `null`,
//! dates are `DD.MM.YYYY` or ISO. Everything here is lenient about the shape
//! of individual fields; only a missing registry code rejects a record.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::types::{
    AddressEntry, AnnualReport, BeneficialOwner, Capital, CapitalEntry, CardEntry, CompanyRecord,
    Location, NameEntry, OwnershipEntry, PartyKind, PartyRef, PersonnelRole, RegistryCode, Section,
};

/// One element of an export array
#[derive(Debug, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "code")]
    pub ariregistri_kood: Option<RegistryCode>,
    #[serde(default, deserialize_with = "text")]
    pub nimi: Option<String>,

    #[serde(default)]
    pub yldandmed: Option<RawGeneral>,
    // Flat general fields used by the simplified exports
    #[serde(default, deserialize_with = "text")]
    pub staatus: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub ettevotja_oiguslik_vorm: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub esmakande_kuupaev: Option<NaiveDate>,
    #[serde(default, deserialize_with = "text")]
    pub aadress_maakond: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub aadress_linn: Option<String>,

    #[serde(default, deserialize_with = "list")]
    pub osanikud: Vec<RawParty>,
    #[serde(default, deserialize_with = "list")]
    pub kasusaajad: Vec<RawBeneficiary>,
    #[serde(default, deserialize_with = "list")]
    pub kaardile_kantud_isikud: Vec<RawParty>,
    #[serde(default, deserialize_with = "list")]
    pub registrikaardid: Vec<RawCard>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGeneral {
    #[serde(default, deserialize_with = "text")]
    pub staatus: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub staatus_tekstina: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub oiguslik_vorm: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub oiguslik_vorm_tekstina: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub esmaregistreerimise_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "list")]
    pub aadressid: Vec<RawAddress>,
    #[serde(default, deserialize_with = "list")]
    pub arinimed: Vec<RawName>,
    #[serde(default, deserialize_with = "list")]
    pub kapitalid: Vec<RawCapital>,
    #[serde(default, deserialize_with = "list")]
    pub info_majandusaasta_aruannetest: Vec<RawAnnualReport>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawAddress {
    #[serde(
        default,
        rename = "aadress_ads__ads_normaliseeritud_taisaadress",
        deserialize_with = "text"
    )]
    pub full_address: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub tanav_maja_korter: Option<String>,
    /// e.g. "Kesklinna linnaosa, Tallinn, Harju maakond"
    #[serde(default, deserialize_with = "text")]
    pub ehak_nimetus: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub postiindeks: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub algus_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "date")]
    pub lopp_kpv: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawName {
    #[serde(default, deserialize_with = "text")]
    pub sisu: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub algus_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "date")]
    pub lopp_kpv: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCapital {
    #[serde(default, deserialize_with = "number")]
    pub kapitali_suurus: Option<f64>,
    #[serde(default, deserialize_with = "text")]
    pub kapitali_valuuta: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub algus_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "date")]
    pub lopp_kpv: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawAnnualReport {
    #[serde(default, deserialize_with = "number")]
    pub aruandeaasta: Option<f64>,
    #[serde(default, deserialize_with = "date")]
    pub majandusaasta_perioodi_lopp_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "number")]
    pub tootajate_arv: Option<f64>,
}

/// Shareholder or person entered on the registry card
#[derive(Debug, Default, Deserialize)]
pub struct RawParty {
    #[serde(default, deserialize_with = "text")]
    pub isiku_tyyp: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub isiku_roll: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub isiku_roll_tekstina: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub eesnimi: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub nimi_arinimi: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub isikukood_registrikood: Option<String>,
    #[serde(default, deserialize_with = "number")]
    pub osaluse_protsent: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub osaluse_suurus: Option<f64>,
    #[serde(default, deserialize_with = "text")]
    pub osaluse_valuuta: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub algus_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "date")]
    pub lopp_kpv: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawBeneficiary {
    #[serde(default, deserialize_with = "text")]
    pub eesnimi: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub nimi: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub isikukood: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub kontrolli_teostamise_viis_tekstina: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub kontrolli_teostamise_viis: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub algus_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "date")]
    pub lopp_kpv: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCard {
    #[serde(default, deserialize_with = "text")]
    pub kaardi_nr: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub kaardi_tyyp: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub kande_nr: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub kandeliik_tekstina: Option<String>,
    #[serde(default, deserialize_with = "date")]
    pub kande_kpv: Option<NaiveDate>,
    #[serde(default, deserialize_with = "text")]
    pub sisu: Option<String>,
}

/// One row of the simplified CSV export (`;`-separated, header row first).
/// Older exports use the short column names accepted as aliases.
#[derive(Debug, Default, Deserialize)]
pub struct RawBasicRow {
    #[serde(default)]
    pub ariregistri_kood: Option<String>,
    #[serde(default)]
    pub nimi: Option<String>,
    #[serde(default, alias = "staatus")]
    pub ettevotja_staatus: Option<String>,
    #[serde(default, alias = "oiguslik_vorm")]
    pub ettevotja_oiguslik_vorm: Option<String>,
    #[serde(default, alias = "esmakande_kuupaev")]
    pub ettevotja_esmakande_kpv: Option<String>,
    #[serde(default)]
    pub ettevotja_aadress: Option<String>,
    #[serde(default)]
    pub ads_normaliseeritud_taisaadress: Option<String>,
    /// e.g. "Tartu linn, Tartu maakond"
    #[serde(default)]
    pub asukoha_ehak_tekstina: Option<String>,
    #[serde(default, alias = "postiindeks")]
    pub indeks_ettevotja_aadressis: Option<String>,
    #[serde(default)]
    pub aadress_maakond: Option<String>,
    #[serde(default)]
    pub aadress_linn: Option<String>,
}

impl RawBasicRow {
    /// Convert into a record carrying only the basic section
    pub fn into_record(self) -> Result<CompanyRecord, String> {
        let code = self
            .ariregistri_kood
            .as_deref()
            .and_then(RegistryCode::parse)
            .ok_or_else(|| "missing or invalid ariregistri_kood".to_string())?;
        let mut record = CompanyRecord::new(code, non_empty(self.nimi).unwrap_or_default());
        record.sections.insert(Section::Basic);

        record.status = non_empty(self.ettevotja_staatus);
        record.legal_form = non_empty(self.ettevotja_oiguslik_vorm);
        record.registered_on = self.ettevotja_esmakande_kpv.as_deref().and_then(parse_date);

        let (ehak_county, ehak_city) = split_ehak(self.asukoha_ehak_tekstina.as_deref());
        let location = Location {
            county: non_empty(self.aadress_maakond).or(ehak_county),
            city: non_empty(self.aadress_linn).or(ehak_city),
            street: non_empty(self.ads_normaliseeritud_taisaadress).or(non_empty(self.ettevotja_aadress)),
            postal_code: non_empty(self.indeks_ettevotja_aadressis),
        };
        record.location = (location != Location::default()).then_some(location);
        Ok(record)
    }
}

// ============================================================================
// Normalisation
// ============================================================================

impl RawRecord {
    /// Convert into a record carrying exactly `section`
    pub fn into_record(self, section: Section) -> Result<CompanyRecord, String> {
        let code = self
            .ariregistri_kood
            .ok_or_else(|| "missing or invalid ariregistri_kood".to_string())?;
        let mut record = CompanyRecord::new(code, self.nimi.clone().unwrap_or_default());
        record.sections.insert(section);

        match section {
            Section::Basic => self.fill_basic(&mut record),
            Section::General => self.fill_general(&mut record),
            Section::Shareholders => {
                record.ownership = self.osanikud.into_iter().map(RawParty::into_ownership).collect();
            }
            Section::BeneficialOwners => {
                record.beneficiaries = self
                    .kasusaajad
                    .into_iter()
                    .map(RawBeneficiary::into_owner)
                    .collect();
            }
            Section::CardPersons => {
                record.personnel = self
                    .kaardile_kantud_isikud
                    .into_iter()
                    .map(RawParty::into_role)
                    .collect();
            }
            Section::RegistryCards => {
                record.registry_cards = self.registrikaardid.into_iter().map(RawCard::into_entry).collect();
            }
        }
        Ok(record)
    }

    /// Flat identity fields only (JSON rendition of the basic export)
    fn fill_basic(self, record: &mut CompanyRecord) {
        record.status = self.staatus;
        record.legal_form = self.ettevotja_oiguslik_vorm;
        record.registered_on = self.esmakande_kuupaev;
        record.location = (self.aadress_maakond.is_some() || self.aadress_linn.is_some()).then(|| Location {
            county: self.aadress_maakond,
            city: self.aadress_linn,
            street: None,
            postal_code: None,
        });
    }

    fn fill_general(self, record: &mut CompanyRecord) {
        let general = self.yldandmed.unwrap_or_default();

        record.status = general.staatus.or(self.staatus);
        record.legal_form = general
            .oiguslik_vorm_tekstina
            .or(general.oiguslik_vorm)
            .or(self.ettevotja_oiguslik_vorm);
        record.registered_on = general.esmaregistreerimise_kpv.or(self.esmakande_kuupaev);

        record.name_history = general
            .arinimed
            .into_iter()
            .filter_map(|n| {
                Some(NameEntry {
                    name: n.sisu?,
                    valid_from: n.algus_kpv,
                    valid_to: n.lopp_kpv,
                })
            })
            .collect();

        record.address_history = general
            .aadressid
            .into_iter()
            .filter_map(|a| {
                let (county, city) = split_ehak(a.ehak_nimetus.as_deref());
                Some(AddressEntry {
                    address: a.full_address.or(a.tanav_maja_korter)?,
                    county,
                    city,
                    postal_code: a.postiindeks,
                    valid_from: a.algus_kpv,
                    valid_to: a.lopp_kpv,
                })
            })
            .collect();

        record.capital_history = general
            .kapitalid
            .into_iter()
            .filter_map(|c| {
                Some(CapitalEntry {
                    amount: c.kapitali_suurus?,
                    currency: c.kapitali_valuuta,
                    valid_from: c.algus_kpv,
                    valid_to: c.lopp_kpv,
                })
            })
            .collect();

        record.annual_reports = general
            .info_majandusaasta_aruannetest
            .into_iter()
            .filter_map(|r| {
                let year = r
                    .aruandeaasta
                    .map(|y| y as i32)
                    .or_else(|| r.majandusaasta_perioodi_lopp_kpv.map(|d| chrono::Datelike::year(&d)))?;
                Some(AnnualReport {
                    year,
                    employees: r.tootajate_arv.filter(|n| *n >= 0.0).map(|n| n as u32),
                })
            })
            .collect();

        record.location = current(&record.address_history, |a| a.valid_from, |a| a.valid_to.is_none())
            .map(|a| Location {
                county: a.county.clone(),
                city: a.city.clone(),
                street: Some(a.address.clone()),
                postal_code: a.postal_code.clone(),
            })
            .or_else(|| {
                (self.aadress_maakond.is_some() || self.aadress_linn.is_some()).then(|| Location {
                    county: self.aadress_maakond.clone(),
                    city: self.aadress_linn.clone(),
                    street: None,
                    postal_code: None,
                })
            });

        record.capital = current(&record.capital_history, |c| c.valid_from, |c| c.valid_to.is_none()).map(|c| {
            Capital {
                amount: c.amount,
                currency: c.currency.clone(),
            }
        });

        if record.name.is_empty() {
            if let Some(entry) = current(&record.name_history, |n| n.valid_from, |n| n.valid_to.is_none()) {
                record.name = entry.name.clone();
            }
        }
    }
}

/// Latest open entry, or the latest entry when none is open
fn current<T>(
    entries: &[T],
    start: impl Fn(&T) -> Option<NaiveDate>,
    open: impl Fn(&T) -> bool,
) -> Option<&T> {
    entries
        .iter()
        .filter(|e| open(e))
        .max_by_key(|e| start(e))
        .or_else(|| entries.iter().max_by_key(|e| start(e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Split an administrative unit name into (county, city)
fn split_ehak(ehak: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(ehak) = ehak else {
        return (None, None);
    };
    let parts: Vec<&str> = ehak.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    match parts.iter().rposition(|p| p.ends_with("maakond")) {
        Some(i) => (
            Some(parts[i].to_string()),
            i.checked_sub(1).map(|j| parts[j].to_string()),
        ),
        None => (None, parts.last().map(|p| p.to_string())),
    }
}

/// Upstream marks natural persons `F` and legal persons `J`. When the marker
/// is missing, an 11-digit identifier is a personal code and an 8-digit one
/// a registry code.
fn party_kind(marker: Option<&str>, id: Option<&str>) -> PartyKind {
    match PartyKind::from_marker(marker) {
        PartyKind::Unknown => match id.map(str::trim) {
            Some(id) if id.len() == 11 && id.bytes().all(|b| b.is_ascii_digit()) => PartyKind::Natural,
            Some(id) if id.len() == 8 && id.bytes().all(|b| b.is_ascii_digit()) => PartyKind::Legal,
            _ => PartyKind::Unknown,
        },
        kind => kind,
    }
}

impl RawParty {
    fn party(&self) -> PartyRef {
        PartyRef {
            kind: party_kind(self.isiku_tyyp.as_deref(), self.isikukood_registrikood.as_deref()),
            first_name: self.eesnimi.clone(),
            name: self.nimi_arinimi.clone().unwrap_or_default(),
            id_code: self.isikukood_registrikood.clone(),
        }
    }

    fn into_ownership(self) -> OwnershipEntry {
        OwnershipEntry {
            holder: self.party(),
            share_percent: self.osaluse_protsent,
            share_amount: self.osaluse_suurus,
            currency: self.osaluse_valuuta,
            valid_from: self.algus_kpv,
            valid_to: self.lopp_kpv,
        }
    }

    fn into_role(self) -> PersonnelRole {
        PersonnelRole {
            person: self.party(),
            role: self
                .isiku_roll
                .clone()
                .or_else(|| self.isiku_roll_tekstina.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            role_text: self.isiku_roll_tekstina,
            valid_from: self.algus_kpv,
            valid_to: self.lopp_kpv,
        }
    }
}

impl RawBeneficiary {
    fn into_owner(self) -> BeneficialOwner {
        BeneficialOwner {
            person: PartyRef {
                kind: PartyKind::Natural,
                first_name: self.eesnimi,
                name: self.nimi.unwrap_or_default(),
                id_code: self.isikukood,
            },
            control_method: self.kontrolli_teostamise_viis_tekstina.or(self.kontrolli_teostamise_viis),
            valid_from: self.algus_kpv,
            valid_to: self.lopp_kpv,
        }
    }
}

impl RawCard {
    fn into_entry(self) -> CardEntry {
        CardEntry {
            card_number: self.kaardi_nr,
            card_type: self.kaardi_tyyp,
            entry_number: self.kande_nr,
            entry_type: self.kandeliik_tekstina,
            entry_date: self.kande_kpv,
            text: self.sisu,
        }
    }
}

// ============================================================================
// Lenient field parsers
// ============================================================================

/// Parse `DD.MM.YYYY`, `YYYY-MM-DD` or an ISO timestamp
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d"))
        .ok()
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(' ', "").replace(',', ".").parse().ok(),
        _ => None,
    })
}

fn date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => parse_date(&s),
        _ => None,
    })
}

fn code<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RegistryCode>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64().map(RegistryCode),
        Some(Value::String(s)) => RegistryCode::parse(&s),
        _ => None,
    })
}

fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str, section: Section) -> CompanyRecord {
        serde_json::from_str::<RawRecord>(json)
            .unwrap()
            .into_record(section)
            .unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(1996, 3, 12);
        assert_eq!(parse_date("12.03.1996"), expected);
        assert_eq!(parse_date("1996-03-12"), expected);
        assert_eq!(parse_date("1996-03-12T00:00:00"), expected);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn test_general_section() {
        let record = decode(
            r#"{
                "ariregistri_kood": "10000001",
                "nimi": "Alpha OÜ",
                "yldandmed": {
                    "staatus": "R",
                    "oiguslik_vorm_tekstina": "Osaühing",
                    "esmaregistreerimise_kpv": "01.02.2001",
                    "aadressid": [
                        {"aadress_ads__ads_normaliseeritud_taisaadress": "Vana tn 1", "ehak_nimetus": "Tartu linn, Tartu maakond", "algus_kpv": "01.02.2001", "lopp_kpv": "01.01.2010"},
                        {"aadress_ads__ads_normaliseeritud_taisaadress": "Uus tn 2", "ehak_nimetus": "Kesklinna linnaosa, Tallinn, Harju maakond", "postiindeks": "10111", "algus_kpv": "02.01.2010", "lopp_kpv": null}
                    ],
                    "kapitalid": [{"kapitali_suurus": "2500,00", "kapitali_valuuta": "EUR", "algus_kpv": "2001-02-01"}],
                    "info_majandusaasta_aruannetest": [{"aruandeaasta": 2022, "tootajate_arv": 12}],
                    "arinimed": null
                }
            }"#,
            Section::General,
        );

        assert_eq!(record.code, RegistryCode(10000001));
        assert_eq!(record.status.as_deref(), Some("R"));
        assert_eq!(record.registered_on, NaiveDate::from_ymd_opt(2001, 2, 1));
        assert_eq!(record.address_history.len(), 2);
        let location = record.location.unwrap();
        assert_eq!(location.county.as_deref(), Some("Harju maakond"));
        assert_eq!(location.city.as_deref(), Some("Tallinn"));
        assert_eq!(location.street.as_deref(), Some("Uus tn 2"));
        assert_eq!(record.capital.unwrap().amount, 2500.0);
        assert_eq!(record.annual_reports, vec![AnnualReport { year: 2022, employees: Some(12) }]);
        assert!(record.name_history.is_empty());
        assert!(record.sections.contains(&Section::General));
    }

    #[test]
    fn test_basic_row_maps_identity_columns() {
        let row: RawBasicRow = serde_json::from_str(
            r#"{
                "ariregistri_kood": " 10000003 ",
                "nimi": "Gamma OÜ",
                "ettevotja_staatus": "R",
                "ettevotja_oiguslik_vorm": "Osaühing",
                "ettevotja_esmakande_kpv": "15.06.2015",
                "asukoha_ehak_tekstina": "Tartu linn, Tartu maakond",
                "ads_normaliseeritud_taisaadress": "",
                "ettevotja_aadress": "Rüütli 1",
                "indeks_ettevotja_aadressis": "51007"
            }"#,
        )
        .unwrap();
        let record = row.into_record().unwrap();

        assert_eq!(record.code, RegistryCode(10000003));
        assert_eq!(record.name, "Gamma OÜ");
        assert_eq!(record.status.as_deref(), Some("R"));
        assert_eq!(record.registered_on, NaiveDate::from_ymd_opt(2015, 6, 15));
        let location = record.location.unwrap();
        assert_eq!(location.county.as_deref(), Some("Tartu maakond"));
        assert_eq!(location.city.as_deref(), Some("Tartu linn"));
        assert_eq!(location.street.as_deref(), Some("Rüütli 1"));
        assert_eq!(location.postal_code.as_deref(), Some("51007"));
        assert_eq!(record.sections.iter().collect::<Vec<_>>(), vec![&Section::Basic]);
    }

    #[test]
    fn test_basic_row_without_code_is_rejected() {
        let row: RawBasicRow = serde_json::from_str(r#"{"nimi": "x", "ariregistri_kood": "n/a"}"#).unwrap();
        assert!(row.into_record().is_err());
    }

    #[test]
    fn test_flat_json_basic_section() {
        let record = decode(
            r#"{"ariregistri_kood": 5, "nimi": "Delta", "staatus": "L", "aadress_linn": "Narva"}"#,
            Section::Basic,
        );
        assert_eq!(record.status.as_deref(), Some("L"));
        assert_eq!(record.location.unwrap().city.as_deref(), Some("Narva"));
        assert!(record.name_history.is_empty());
    }

    #[test]
    fn test_shareholders_section() {
        let record = decode(
            r#"{"ariregistri_kood": 10000002, "nimi": "Beta AS", "osanikud": [
                {"isiku_tyyp": "J", "nimi_arinimi": "Alpha OÜ", "isikukood_registrikood": "10000001", "osaluse_protsent": "60.5"},
                {"eesnimi": "Mari", "nimi_arinimi": "Maasikas", "isikukood_registrikood": 48001010000, "osaluse_protsent": 39.5}
            ]}"#,
            Section::Shareholders,
        );

        assert_eq!(record.ownership.len(), 2);
        assert_eq!(record.ownership[0].holder.company_code(), Some(RegistryCode(10000001)));
        assert_eq!(record.ownership[0].share_percent, Some(60.5));
        assert_eq!(record.ownership[1].holder.kind, PartyKind::Natural);
        assert_eq!(record.ownership[1].holder.display_name(), "Mari Maasikas");
        assert!(record.personnel.is_empty());
    }

    #[test]
    fn test_card_persons_and_beneficiaries() {
        let persons = decode(
            r#"{"ariregistri_kood": 1, "kaardile_kantud_isikud": [
                {"isiku_tyyp": "F", "isiku_roll": "JUHL", "isiku_roll_tekstina": "Juhatuse liige", "eesnimi": "Jaan", "nimi_arinimi": "Tamm"}
            ]}"#,
            Section::CardPersons,
        );
        assert_eq!(persons.personnel[0].role, "JUHL");
        assert_eq!(persons.personnel[0].role_text.as_deref(), Some("Juhatuse liige"));

        let owners = decode(
            r#"{"ariregistri_kood": 1, "kasusaajad": [{"eesnimi": "Jaan", "nimi": "Tamm", "isikukood": "38001010000"}]}"#,
            Section::BeneficialOwners,
        );
        assert_eq!(owners.beneficiaries[0].person.id_code.as_deref(), Some("38001010000"));
    }

    #[test]
    fn test_missing_code_is_rejected() {
        let raw: RawRecord = serde_json::from_str(r#"{"nimi": "No Code"}"#).unwrap();
        assert!(raw.into_record(Section::General).is_err());
    }

    #[test]
    fn test_party_kind_fallback() {
        assert_eq!(party_kind(None, Some("10000001")), PartyKind::Legal);
        assert_eq!(party_kind(None, Some("38001010000")), PartyKind::Natural);
        assert_eq!(party_kind(Some("F"), Some("10000001")), PartyKind::Natural);
        assert_eq!(party_kind(None, Some("3800101****")), PartyKind::Unknown);
    }
}
