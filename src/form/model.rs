//! W-9 form record as produced by the wizard

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of account the W-9 is collected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Individual,
    Ira,
    Trust,
    Llc,
    Corporation,
    #[serde(rename = "401k", alias = "plan401k")]
    Plan401k,
}

/// How an LLC is treated for federal tax purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LlcType {
    /// Single-member LLC taxed as its owner
    Disregarded,
    CCorp,
    SCorp,
    Partnership,
}

/// Federal tax classification (form line 3a)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum TaxClassification {
    Individual,
    #[serde(alias = "cCorp")]
    CCorporation,
    #[serde(alias = "sCorp")]
    SCorporation,
    Partnership,
    TrustEstate,
    Llc,
    Other,
}

impl TaxClassification {
    pub const ALL: [TaxClassification; 7] = [
        TaxClassification::Individual,
        TaxClassification::CCorporation,
        TaxClassification::SCorporation,
        TaxClassification::Partnership,
        TaxClassification::TrustEstate,
        TaxClassification::Llc,
        TaxClassification::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TaxClassification::Individual => "Individual/sole proprietor or single-member LLC",
            TaxClassification::CCorporation => "C Corporation",
            TaxClassification::SCorporation => "S Corporation",
            TaxClassification::Partnership => "Partnership",
            TaxClassification::TrustEstate => "Trust/estate",
            TaxClassification::Llc => "Limited liability company (LLC)",
            TaxClassification::Other => "Other",
        }
    }
}

/// LLC tax classification letter entered next to the LLC box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LlcClass {
    C,
    S,
    P,
}

impl LlcClass {
    pub fn letter(&self) -> &'static str {
        match self {
            LlcClass::C => "C",
            LlcClass::S => "S",
            LlcClass::P => "P",
        }
    }
}

/// IRA custodian choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CustodianId {
    EquityTrust,
    IraInnovations,
    IraFinancial,
    /// Custodian not in the canonical table; details are typed in
    Other,
}

/// Which TIN the submitter chose when the account type leaves it open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TinType {
    #[default]
    Ssn,
    Ein,
}

/// Certification signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Signature {
    /// Raster image, as a `data:image/png;base64,...` URL or bare base64
    Drawn(String),
    /// Name typed by the signer
    Typed(String),
}

impl Signature {
    pub fn is_blank(&self) -> bool {
        match self {
            Signature::Drawn(data) => data.trim().is_empty(),
            Signature::Typed(text) => text.trim().is_empty(),
        }
    }
}

/// Everything the wizard collects for one W-9.
///
/// Every field is optional on the wire so partially filled wizard state can be
/// validated step by step. Field names follow the wizard's camelCase JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FormRecord {
    pub account_type: Option<AccountType>,

    // IRA
    pub custodian: Option<CustodianId>,
    pub custodian_name: String,
    pub custodian_address: String,
    pub custodian_city: String,
    pub custodian_state: String,
    pub custodian_zip: String,
    pub ira_account_number: String,
    pub ira_ein: String,

    // LLC
    pub llc_type: Option<LlcType>,

    // Identity
    #[serde(alias = "name")]
    pub personal_name: String,
    #[serde(alias = "businessName")]
    pub entity_name: String,

    // Tax classification
    pub tax_classification: Option<TaxClassification>,
    #[serde(alias = "llcSubclass")]
    pub llc_classification: Option<LlcClass>,
    pub other_description: String,

    // Exemptions
    pub exempt_payee_code: String,
    #[serde(alias = "fatcaCode")]
    pub fatca_exemption_code: String,

    // Address
    pub address: String,
    pub city: String,
    pub state: String,
    #[serde(alias = "zip")]
    pub zip_code: String,

    // Optional requester fields
    pub requester_name_address: String,
    pub account_numbers: String,

    // TIN
    pub tin_type: TinType,
    pub ssn: String,
    pub ein: String,

    // Certification
    pub signature: Option<Signature>,
    pub signature_date: Option<NaiveDate>,
}

impl FormRecord {
    /// LLC that is not disregarded (C corp, S corp or partnership election)
    pub fn is_standard_llc(&self) -> bool {
        self.account_type == Some(AccountType::Llc)
            && matches!(self.llc_type, Some(t) if t != LlcType::Disregarded)
    }

    pub fn is_disregarded_llc(&self) -> bool {
        self.account_type == Some(AccountType::Llc) && self.llc_type == Some(LlcType::Disregarded)
    }

    /// Name used for file names and delivery metadata: the person if known,
    /// otherwise the entity.
    pub fn display_name(&self) -> &str {
        let personal = self.personal_name.trim();
        if !personal.is_empty() {
            personal
        } else {
            self.entity_name.trim()
        }
    }
}
