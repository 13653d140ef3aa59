//! Per-step validation of wizard input
//!
//! Validation never fails with an `Err`: each step yields a map from field
//! name to message, and an empty map means the step is complete.

use super::model::{AccountType, CustodianId, FormRecord, TaxClassification, TinType};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

// `\d` in `regex` matches every Unicode digit; the form only takes ASCII ones
static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{3}-?[0-9]{2}-?[0-9]{4}$").expect("valid SSN regex"));
static EIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{2}-?[0-9]{7}$").expect("valid EIN regex"));
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{5}(-[0-9]{4})?$").expect("valid ZIP regex"));

/// Longest exempt payee code on the current form ("13")
pub const EXEMPT_PAYEE_CODE_MAX_LEN: usize = 2;
/// FATCA exemption codes are single letters A-M
pub const FATCA_CODE_MAX_LEN: usize = 1;

/// Postal codes accepted for the state field (50 states plus DC)
pub const US_STATES: [&str; 51] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC",
];

/// Field name to message, sorted by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_string(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge another map in; entries already present win
    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, message) in other.0 {
            self.0.entry(field).or_insert(message);
        }
    }
}

/// Wizard steps, numbered the way the wizard numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum WizardStep {
    AccountType,
    Custodian,
    Identity,
    TaxClassification,
    AddressTin,
    Signature,
    LlcType,
}

impl WizardStep {
    pub fn index(&self) -> u8 {
        match self {
            WizardStep::AccountType => 0,
            WizardStep::Custodian => 1,
            WizardStep::Identity => 2,
            WizardStep::TaxClassification => 3,
            WizardStep::AddressTin => 4,
            WizardStep::Signature => 5,
            WizardStep::LlcType => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Some(match index {
            0 => WizardStep::AccountType,
            1 => WizardStep::Custodian,
            2 => WizardStep::Identity,
            3 => WizardStep::TaxClassification,
            4 => WizardStep::AddressTin,
            5 => WizardStep::Signature,
            6 => WizardStep::LlcType,
            _ => return None,
        })
    }

    pub fn title(&self) -> &'static str {
        match self {
            WizardStep::AccountType => "Account Type",
            WizardStep::Custodian => "Custodian",
            WizardStep::Identity => "Identity",
            WizardStep::TaxClassification => "Tax Classification",
            WizardStep::AddressTin => "Address & TIN",
            WizardStep::Signature => "Signature",
            WizardStep::LlcType => "LLC Type",
        }
    }

    /// Steps a wizard walks for the given account type, in order.
    ///
    /// The custodian step only applies to IRAs and the LLC type step only to
    /// LLCs. Without an account type only the first step is known.
    pub fn sequence_for(account_type: Option<AccountType>) -> Vec<WizardStep> {
        let Some(account_type) = account_type else {
            return vec![WizardStep::AccountType];
        };

        let mut steps = vec![WizardStep::AccountType];
        match account_type {
            AccountType::Ira => steps.push(WizardStep::Custodian),
            AccountType::Llc => steps.push(WizardStep::LlcType),
            _ => {}
        }
        steps.extend([
            WizardStep::Identity,
            WizardStep::TaxClassification,
            WizardStep::AddressTin,
            WizardStep::Signature,
        ]);
        steps
    }
}

/// Validate one wizard step
pub fn validate_step(step: WizardStep, record: &FormRecord) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    match step {
        WizardStep::AccountType => {
            if record.account_type.is_none() {
                errors.insert("accountType", "Account type is required");
            }
        }
        WizardStep::Custodian => validate_custodian(record, &mut errors),
        WizardStep::Identity => validate_identity(record, &mut errors),
        WizardStep::TaxClassification => validate_classification(record, &mut errors),
        WizardStep::AddressTin => {
            validate_address(record, &mut errors);
            validate_tin(record, &mut errors);
        }
        WizardStep::Signature => {
            if record.signature.as_ref().map_or(true, |s| s.is_blank()) {
                errors.insert("signature", "Signature is required");
            }
            if record.signature_date.is_none() {
                errors.insert("signatureDate", "Date is required");
            }
        }
        WizardStep::LlcType => {
            if record.account_type == Some(AccountType::Llc) && record.llc_type.is_none() {
                errors.insert("llcType", "Please select your LLC type");
            }
        }
    }
    errors
}

/// Validate every step that applies to the record's account type
pub fn validate_all(record: &FormRecord) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    for step in WizardStep::sequence_for(record.account_type) {
        errors.merge(validate_step(step, record));
    }
    errors
}

fn validate_custodian(record: &FormRecord, errors: &mut ValidationErrors) {
    if record.account_type != Some(AccountType::Ira) {
        return;
    }

    match record.custodian {
        None => errors.insert("custodian", "Custodian selection is required"),
        Some(CustodianId::Other) => {
            require(errors, "custodianName", &record.custodian_name, "Custodian name is required");
            require(errors, "custodianAddress", &record.custodian_address, "Address is required");
            require(errors, "custodianCity", &record.custodian_city, "City is required");
            require(errors, "custodianState", &record.custodian_state, "State is required");
            require(errors, "custodianZip", &record.custodian_zip, "ZIP code is required");
        }
        Some(_) => {}
    }

    require(
        errors,
        "iraAccountNumber",
        &record.ira_account_number,
        "IRA account number is required",
    );
}

fn validate_identity(record: &FormRecord, errors: &mut ValidationErrors) {
    let entity_label = match record.account_type {
        Some(AccountType::Trust) => Some("Trust name is required"),
        Some(AccountType::Llc) => Some("LLC name is required"),
        Some(AccountType::Corporation) => Some("Corporation name is required"),
        Some(AccountType::Plan401k) => Some("401k plan name is required"),
        _ => None,
    };

    match entity_label {
        Some(message) => {
            if record.is_disregarded_llc() {
                require(errors, "name", &record.personal_name, "Name is required");
            }
            require(errors, "businessName", &record.entity_name, message);
        }
        None => require(errors, "name", &record.personal_name, "Name is required"),
    }
}

fn validate_classification(record: &FormRecord, errors: &mut ValidationErrors) {
    match record.tax_classification {
        None => errors.insert("taxClassification", "Tax classification is required"),
        Some(TaxClassification::Llc) if record.llc_classification.is_none() => {
            errors.insert("llcClassification", "LLC tax classification is required")
        }
        Some(TaxClassification::Other) if record.other_description.trim().is_empty() => {
            errors.insert("otherDescription", "Please describe your entity type")
        }
        Some(_) => {}
    }

    if record.exempt_payee_code.trim().chars().count() > EXEMPT_PAYEE_CODE_MAX_LEN {
        errors.insert("exemptPayeeCode", "Exempt payee code is too long");
    }
    if record.fatca_exemption_code.trim().chars().count() > FATCA_CODE_MAX_LEN {
        errors.insert("fatcaExemptionCode", "FATCA exemption code is too long");
    }
}

fn validate_address(record: &FormRecord, errors: &mut ValidationErrors) {
    // IRA accounts use the custodian's address
    if record.account_type == Some(AccountType::Ira) {
        return;
    }

    require(errors, "address", &record.address, "Address is required");
    require(errors, "city", &record.city, "City is required");

    let state = record.state.trim();
    if state.is_empty() {
        errors.insert("state", "State is required");
    } else if !US_STATES.contains(&state) {
        errors.insert("state", "Invalid state");
    }

    let zip = record.zip_code.trim();
    if zip.is_empty() {
        errors.insert("zipCode", "ZIP code is required");
    } else if !ZIP_RE.is_match(zip) {
        errors.insert("zipCode", "Invalid ZIP code format");
    }
}

fn validate_tin(record: &FormRecord, errors: &mut ValidationErrors) {
    if record.account_type == Some(AccountType::Ira) {
        check_ein(errors, "iraEin", &record.ira_ein, "IRA EIN is required");
    } else if record.is_disregarded_llc() {
        check_ssn(errors, &record.ssn);
        check_ein(errors, "ein", &record.ein, "LLC EIN is required");
    } else if record.is_standard_llc() {
        check_ein(errors, "ein", &record.ein, "LLC EIN is required");
    } else if matches!(
        record.account_type,
        Some(AccountType::Corporation) | Some(AccountType::Plan401k)
    ) {
        check_ein(errors, "ein", &record.ein, "Employer Identification Number is required");
    } else {
        match record.tin_type {
            TinType::Ssn => check_ssn(errors, &record.ssn),
            TinType::Ein => check_ein(
                errors,
                "ein",
                &record.ein,
                "Employer Identification Number is required",
            ),
        }
    }
}

fn check_ssn(errors: &mut ValidationErrors, value: &str) {
    let compact = strip_whitespace(value);
    if compact.is_empty() {
        errors.insert("ssn", "Social Security Number is required");
    } else if !SSN_RE.is_match(&compact) {
        errors.insert("ssn", "Invalid SSN format (XXX-XX-XXXX)");
    }
}

fn check_ein(errors: &mut ValidationErrors, field: &str, value: &str, missing: &str) {
    let compact = strip_whitespace(value);
    if compact.is_empty() {
        errors.insert(field, missing);
    } else if !EIN_RE.is_match(&compact) {
        errors.insert(field, "Invalid EIN format (XX-XXXXXXX)");
    }
}

fn require(errors: &mut ValidationErrors, field: &str, value: &str, message: &str) {
    if value.trim().is_empty() {
        errors.insert(field, message);
    }
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::model::{LlcClass, LlcType, Signature};
    use chrono::NaiveDate;
    use rstest::rstest;

    fn individual() -> FormRecord {
        FormRecord {
            account_type: Some(AccountType::Individual),
            personal_name: "John A. Doe".to_string(),
            tax_classification: Some(TaxClassification::Individual),
            address: "123 Main Street".to_string(),
            city: "New York".to_string(),
            state: "NY".to_string(),
            zip_code: "10001".to_string(),
            ssn: "123-45-6789".to_string(),
            signature: Some(Signature::Typed("John A. Doe".to_string())),
            signature_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..FormRecord::default()
        }
    }

    #[test]
    fn test_complete_individual_is_valid() {
        assert!(validate_all(&individual()).is_empty());
    }

    #[test]
    fn test_other_classification_needs_description() {
        let record = FormRecord {
            tax_classification: Some(TaxClassification::Other),
            ..individual()
        };
        let errors = validate_step(WizardStep::TaxClassification, &record);
        assert!(!errors.is_empty());
        assert_eq!(
            errors.get("otherDescription"),
            Some("Please describe your entity type")
        );
    }

    #[test]
    fn test_llc_classification_needs_letter() {
        let mut record = FormRecord {
            tax_classification: Some(TaxClassification::Llc),
            ..individual()
        };
        let errors = validate_step(WizardStep::TaxClassification, &record);
        assert!(errors.contains("llcClassification"));

        record.llc_classification = Some(LlcClass::P);
        assert!(validate_step(WizardStep::TaxClassification, &record).is_empty());
    }

    #[test]
    fn test_individual_requires_address() {
        let record = FormRecord {
            address: String::new(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
            ..individual()
        };
        let errors = validate_step(WizardStep::AddressTin, &record);
        for field in ["address", "city", "state", "zipCode"] {
            assert!(errors.contains(field), "missing error for {}", field);
        }
    }

    #[test]
    fn test_ira_does_not_require_address() {
        let record = FormRecord {
            account_type: Some(AccountType::Ira),
            custodian: Some(CustodianId::EquityTrust),
            ira_account_number: "200123".to_string(),
            ira_ein: "98-7654321".to_string(),
            address: String::new(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
            ..individual()
        };
        assert!(validate_step(WizardStep::AddressTin, &record).is_empty());
        assert!(validate_all(&record).is_empty());
    }

    #[rstest]
    #[case("123-45-6789", true)]
    #[case("123456789", true)]
    #[case("123 45 6789", true)]
    #[case("12-345-6789", false)]
    #[case("1234-5678", false)]
    #[case("abc-de-fghi", false)]
    #[case("\u{661}\u{662}\u{663}-\u{664}\u{665}-\u{666}\u{667}\u{668}\u{669}", false)]
    #[case("\u{ff11}23-45-6789", false)]
    fn test_ssn_format(#[case] ssn: &str, #[case] valid: bool) {
        let record = FormRecord {
            ssn: ssn.to_string(),
            ..individual()
        };
        let errors = validate_step(WizardStep::AddressTin, &record);
        assert_eq!(!errors.contains("ssn"), valid, "ssn {:?}", ssn);
    }

    #[rstest]
    #[case("10001", true)]
    #[case("10001-1234", true)]
    #[case("1000", false)]
    #[case("10001-12", false)]
    #[case("ABCDE", false)]
    #[case("\u{661}\u{660}\u{660}\u{660}\u{661}", false)]
    #[case("10001-\u{966}\u{967}\u{968}\u{969}", false)]
    fn test_zip_format(#[case] zip: &str, #[case] valid: bool) {
        let record = FormRecord {
            zip_code: zip.to_string(),
            ..individual()
        };
        let errors = validate_step(WizardStep::AddressTin, &record);
        assert_eq!(!errors.contains("zipCode"), valid, "zip {:?}", zip);
    }

    #[rstest]
    #[case("12-3456789", true)]
    #[case("123456789", true)]
    #[case("123-456789", false)]
    #[case("\u{661}\u{662}-\u{663}\u{664}\u{665}\u{666}\u{667}\u{668}\u{669}", false)]
    fn test_ein_format(#[case] ein: &str, #[case] valid: bool) {
        let record = FormRecord {
            tin_type: TinType::Ein,
            ein: ein.to_string(),
            ..individual()
        };
        let errors = validate_step(WizardStep::AddressTin, &record);
        assert_eq!(!errors.contains("ein"), valid, "ein {:?}", ein);
    }

    #[test]
    fn test_unknown_state_rejected() {
        let record = FormRecord {
            state: "XX".to_string(),
            ..individual()
        };
        let errors = validate_step(WizardStep::AddressTin, &record);
        assert_eq!(errors.get("state"), Some("Invalid state"));
    }

    #[test]
    fn test_disregarded_llc_requires_both_tins_and_names() {
        let record = FormRecord {
            account_type: Some(AccountType::Llc),
            llc_type: Some(LlcType::Disregarded),
            personal_name: String::new(),
            entity_name: String::new(),
            ssn: String::new(),
            ein: String::new(),
            ..individual()
        };
        let identity = validate_step(WizardStep::Identity, &record);
        assert!(identity.contains("name"));
        assert_eq!(identity.get("businessName"), Some("LLC name is required"));

        let tin = validate_step(WizardStep::AddressTin, &record);
        assert!(tin.contains("ssn"));
        assert_eq!(tin.get("ein"), Some("LLC EIN is required"));
    }

    #[test]
    fn test_entity_accounts_require_entity_name_only() {
        for account_type in [
            AccountType::Trust,
            AccountType::Corporation,
            AccountType::Plan401k,
        ] {
            let record = FormRecord {
                account_type: Some(account_type),
                personal_name: String::new(),
                entity_name: "Entity".to_string(),
                ..individual()
            };
            assert!(
                validate_step(WizardStep::Identity, &record).is_empty(),
                "{:?}",
                account_type
            );
        }

        let standard_llc = FormRecord {
            account_type: Some(AccountType::Llc),
            llc_type: Some(LlcType::SCorp),
            personal_name: String::new(),
            entity_name: "Widgets LLC".to_string(),
            ..individual()
        };
        assert!(validate_step(WizardStep::Identity, &standard_llc).is_empty());
    }

    #[test]
    fn test_corporation_requires_ein_even_with_ssn_selected() {
        let record = FormRecord {
            account_type: Some(AccountType::Corporation),
            tin_type: TinType::Ssn,
            ein: String::new(),
            ..individual()
        };
        let errors = validate_step(WizardStep::AddressTin, &record);
        assert!(errors.contains("ein"));
        assert!(!errors.contains("ssn"));
    }

    #[test]
    fn test_other_custodian_requires_details() {
        let record = FormRecord {
            account_type: Some(AccountType::Ira),
            custodian: Some(CustodianId::Other),
            ..FormRecord::default()
        };
        let errors = validate_step(WizardStep::Custodian, &record);
        for field in [
            "custodianName",
            "custodianAddress",
            "custodianCity",
            "custodianState",
            "custodianZip",
            "iraAccountNumber",
        ] {
            assert!(errors.contains(field), "missing error for {}", field);
        }
    }

    #[test]
    fn test_custodian_step_ignored_for_non_ira() {
        assert!(validate_step(WizardStep::Custodian, &individual()).is_empty());
    }

    #[test]
    fn test_signature_step() {
        let record = FormRecord {
            signature: Some(Signature::Typed("   ".to_string())),
            signature_date: None,
            ..individual()
        };
        let errors = validate_step(WizardStep::Signature, &record);
        assert!(errors.contains("signature"));
        assert!(errors.contains("signatureDate"));
    }

    #[test]
    fn test_exemption_code_length() {
        let record = FormRecord {
            exempt_payee_code: "123".to_string(),
            fatca_exemption_code: "AB".to_string(),
            ..individual()
        };
        let errors = validate_step(WizardStep::TaxClassification, &record);
        assert!(errors.contains("exemptPayeeCode"));
        assert!(errors.contains("fatcaExemptionCode"));
    }

    #[test]
    fn test_sequence_for_account_types() {
        assert_eq!(
            WizardStep::sequence_for(Some(AccountType::Ira))
                .iter()
                .map(WizardStep::index)
                .collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
        assert_eq!(
            WizardStep::sequence_for(Some(AccountType::Llc))
                .iter()
                .map(WizardStep::index)
                .collect::<Vec<_>>(),
            vec![0, 6, 2, 3, 4, 5]
        );
        assert_eq!(WizardStep::sequence_for(None), vec![WizardStep::AccountType]);
    }

    #[test]
    fn test_step_index_roundtrip() {
        for index in 0..7 {
            assert_eq!(WizardStep::from_index(index).unwrap().index(), index);
        }
        assert!(WizardStep::from_index(7).is_none());
    }

    #[test]
    fn test_missing_account_type() {
        let errors = validate_all(&FormRecord::default());
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("accountType"));
    }
}
