//! Resolution of a form record into the concrete values that go on the form
//!
//! This is where the account-type branching lives. A record either resolves
//! to exactly one name placement and one TIN source, or resolution fails and
//! nothing is drawn.

use super::custodian::custodian_details;
use super::model::{AccountType, FormRecord, LlcClass, Signature, TaxClassification, TinType};
use crate::error::{Error, Result};
use chrono::NaiveDate;

/// Which of the two TIN box groups a number belongs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TinKind {
    Ssn,
    Ein,
}

impl TinKind {
    /// Digit group lengths as printed on the form
    pub fn groups(&self) -> &'static [usize] {
        match self {
            TinKind::Ssn => &[3, 2, 4],
            TinKind::Ein => &[2, 7],
        }
    }
}

/// Nine TIN digits with formatting removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TinDigits {
    kind: TinKind,
    digits: [u8; 9],
}

impl TinDigits {
    /// Strip everything but digits; `None` unless exactly nine remain
    pub fn parse(kind: TinKind, formatted: &str) -> Option<Self> {
        let mut digits = [0u8; 9];
        let mut count = 0;
        for c in formatted.chars() {
            if let Some(d) = c.to_digit(10) {
                if count == digits.len() {
                    return None;
                }
                digits[count] = d as u8;
                count += 1;
            }
        }
        (count == digits.len()).then_some(Self { kind, digits })
    }

    pub fn kind(&self) -> TinKind {
        self.kind
    }

    pub fn digits(&self) -> &[u8; 9] {
        &self.digits
    }

    /// Digits split into the form's groups, e.g. `[[1,2,3],[4,5],[6,7,8,9]]`
    pub fn grouped(&self) -> Vec<&[u8]> {
        self.split(self.kind.groups())
    }

    /// Digits split into arbitrary consecutive runs. Runs past the ninth
    /// digit come back short or empty.
    pub fn split(&self, lengths: &[usize]) -> Vec<&[u8]> {
        let mut out = Vec::with_capacity(lengths.len());
        let mut start = 0;
        for &len in lengths {
            let begin = start.min(self.digits.len());
            let end = (start + len).min(self.digits.len());
            out.push(&self.digits[begin..end]);
            start += len;
        }
        out
    }

    /// `123-45-6789` or `12-3456789`
    pub fn formatted(&self) -> String {
        self.grouped()
            .iter()
            .map(|g| digits_to_string(g))
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Render digit values as text
pub fn digits_to_string(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

/// TIN boxes to fill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TinPlacement {
    Ssn(TinDigits),
    Ein(TinDigits),
    /// Disregarded LLC: owner SSN and LLC EIN
    SsnAndEin { ssn: TinDigits, ein: TinDigits },
}

impl TinPlacement {
    pub fn ssn(&self) -> Option<&TinDigits> {
        match self {
            TinPlacement::Ssn(ssn) | TinPlacement::SsnAndEin { ssn, .. } => Some(ssn),
            TinPlacement::Ein(_) => None,
        }
    }

    pub fn ein(&self) -> Option<&TinDigits> {
        match self {
            TinPlacement::Ein(ein) | TinPlacement::SsnAndEin { ein, .. } => Some(ein),
            TinPlacement::Ssn(_) => None,
        }
    }
}

/// Which rule produced lines 1 and 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    /// Custodian on line 1, "FBO ... IRA" on line 2
    IraCustodian,
    /// Entity on line 1, line 2 empty
    EntityOnly,
    /// Owner on line 1, LLC on line 2
    DisregardedEntity,
    /// Person on line 1, optional business on line 2
    Individual,
}

/// Mailing address lines (form lines 5 and 6)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressLines {
    pub street: String,
    pub city_state_zip: String,
}

/// Classification entries for line 3a
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationMark {
    pub classification: TaxClassification,
    pub llc_class: Option<LlcClass>,
    pub other_description: Option<String>,
}

/// Signature after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSignature {
    Typed(String),
    /// Undecoded image payload; decoding happens at fill time
    Drawn(String),
}

/// The values the engine places, one per logical form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedForm {
    pub name_rule: NameRule,
    pub line1: String,
    pub line2: Option<String>,
    pub classification: Option<ClassificationMark>,
    pub exempt_payee_code: Option<String>,
    pub fatca_code: Option<String>,
    pub address: AddressLines,
    pub requester_name_address: Option<String>,
    pub account_numbers: Option<String>,
    pub tin: TinPlacement,
    pub signature: Option<ResolvedSignature>,
    pub signature_date: Option<NaiveDate>,
    pub display_name: String,
}

/// Resolve a record or refuse it.
///
/// Fails with [`Error::UnresolvableRecord`] when the record does not yield
/// exactly one name placement and one TIN source.
pub fn resolve(record: &FormRecord) -> Result<ResolvedForm> {
    let account_type = record
        .account_type
        .ok_or_else(|| unresolvable("account type is missing"))?;

    let (name_rule, line1, line2) = resolve_names(account_type, record)?;
    let address = resolve_address(account_type, record)?;
    let tin = resolve_tin(account_type, record)?;

    let classification = record.tax_classification.map(|classification| ClassificationMark {
        classification,
        llc_class: record
            .llc_classification
            .filter(|_| classification == TaxClassification::Llc),
        other_description: non_empty(&record.other_description)
            .filter(|_| classification == TaxClassification::Other),
    });

    let signature = record.signature.as_ref().and_then(|s| match s {
        _ if s.is_blank() => None,
        Signature::Typed(text) => Some(ResolvedSignature::Typed(text.trim().to_string())),
        Signature::Drawn(data) => Some(ResolvedSignature::Drawn(data.trim().to_string())),
    });

    Ok(ResolvedForm {
        name_rule,
        line1,
        line2,
        classification,
        exempt_payee_code: non_empty(&record.exempt_payee_code),
        fatca_code: non_empty(&record.fatca_exemption_code),
        address,
        requester_name_address: non_empty(&record.requester_name_address),
        account_numbers: non_empty(&record.account_numbers),
        tin,
        signature,
        signature_date: record.signature_date,
        display_name: record.display_name().to_string(),
    })
}

fn resolve_names(
    account_type: AccountType,
    record: &FormRecord,
) -> Result<(NameRule, String, Option<String>)> {
    let personal = non_empty(&record.personal_name);
    let entity = non_empty(&record.entity_name);

    if account_type == AccountType::Ira {
        let custodian = custodian_details(record)
            .ok_or_else(|| unresolvable("IRA account has no custodian"))?;
        let owner = personal.ok_or_else(|| unresolvable("IRA account has no owner name"))?;
        return Ok((
            NameRule::IraCustodian,
            custodian.name,
            Some(format!("FBO {} IRA", owner)),
        ));
    }

    if account_type == AccountType::Llc && record.llc_type.is_none() {
        return Err(unresolvable("LLC account has no LLC type"));
    }

    if record.is_disregarded_llc() {
        let owner = personal.ok_or_else(|| unresolvable("disregarded LLC has no owner name"))?;
        let llc = entity.ok_or_else(|| unresolvable("disregarded LLC has no LLC name"))?;
        return Ok((NameRule::DisregardedEntity, owner, Some(llc)));
    }

    let entity_only = record.is_standard_llc()
        || matches!(
            account_type,
            AccountType::Trust | AccountType::Corporation | AccountType::Plan401k
        );
    if entity_only {
        let entity = entity.ok_or_else(|| unresolvable("entity account has no entity name"))?;
        return Ok((NameRule::EntityOnly, entity, None));
    }

    let person = personal.ok_or_else(|| unresolvable("individual account has no name"))?;
    Ok((NameRule::Individual, person, entity))
}

fn resolve_address(account_type: AccountType, record: &FormRecord) -> Result<AddressLines> {
    if account_type == AccountType::Ira {
        let custodian = custodian_details(record)
            .ok_or_else(|| unresolvable("IRA account has no custodian"))?;
        return Ok(AddressLines {
            street: custodian.address,
            city_state_zip: join_city_state_zip(&custodian.city, &custodian.state, &custodian.zip),
        });
    }

    Ok(AddressLines {
        street: record.address.trim().to_string(),
        city_state_zip: join_city_state_zip(&record.city, &record.state, &record.zip_code),
    })
}

fn resolve_tin(account_type: AccountType, record: &FormRecord) -> Result<TinPlacement> {
    if account_type == AccountType::Ira {
        return Ok(TinPlacement::Ein(parse_tin(TinKind::Ein, &record.ira_ein, "IRA EIN")?));
    }

    if record.is_disregarded_llc() {
        return Ok(TinPlacement::SsnAndEin {
            ssn: parse_tin(TinKind::Ssn, &record.ssn, "owner SSN")?,
            ein: parse_tin(TinKind::Ein, &record.ein, "LLC EIN")?,
        });
    }

    if record.is_standard_llc()
        || matches!(account_type, AccountType::Corporation | AccountType::Plan401k)
    {
        return Ok(TinPlacement::Ein(parse_tin(TinKind::Ein, &record.ein, "EIN")?));
    }

    match record.tin_type {
        TinType::Ssn => Ok(TinPlacement::Ssn(parse_tin(TinKind::Ssn, &record.ssn, "SSN")?)),
        TinType::Ein => Ok(TinPlacement::Ein(parse_tin(TinKind::Ein, &record.ein, "EIN")?)),
    }
}

fn parse_tin(kind: TinKind, value: &str, label: &str) -> Result<TinDigits> {
    TinDigits::parse(kind, value)
        .ok_or_else(|| unresolvable(&format!("{} does not have exactly 9 digits", label)))
}

fn join_city_state_zip(city: &str, state: &str, zip: &str) -> String {
    [city.trim(), state.trim(), zip.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn unresolvable(reason: &str) -> Error {
    Error::UnresolvableRecord {
        reason: reason.to_string(),
    }
}
