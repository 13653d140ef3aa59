//! Known IRA custodians and their mailing addresses

use super::model::{CustodianId, FormRecord};

/// Canonical name and address of a custodian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodianInfo {
    pub name: &'static str,
    pub address: &'static str,
    pub city: &'static str,
    pub state: &'static str,
    pub zip: &'static str,
}

const EQUITY_TRUST: CustodianInfo = CustodianInfo {
    name: "Equity Trust Company",
    address: "1 Equity Way",
    city: "Westlake",
    state: "OH",
    zip: "44145",
};

const IRA_INNOVATIONS: CustodianInfo = CustodianInfo {
    name: "IRA Innovations",
    address: "4905 Pine Cone Dr Ste 2",
    city: "Durham",
    state: "NC",
    zip: "27707",
};

const IRA_FINANCIAL: CustodianInfo = CustodianInfo {
    name: "IRA Financial Trust Company",
    address: "1691 Michigan Ave Ste 305",
    city: "Miami Beach",
    state: "FL",
    zip: "33139",
};

impl CustodianId {
    /// Canonical entry, `None` for [`CustodianId::Other`]
    pub fn canonical(&self) -> Option<&'static CustodianInfo> {
        match self {
            CustodianId::EquityTrust => Some(&EQUITY_TRUST),
            CustodianId::IraInnovations => Some(&IRA_INNOVATIONS),
            CustodianId::IraFinancial => Some(&IRA_FINANCIAL),
            CustodianId::Other => None,
        }
    }
}

/// Custodian details as they go on the form, owned so free-text entries fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodianDetails {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl From<&CustodianInfo> for CustodianDetails {
    fn from(info: &CustodianInfo) -> Self {
        Self {
            name: info.name.to_string(),
            address: info.address.to_string(),
            city: info.city.to_string(),
            state: info.state.to_string(),
            zip: info.zip.to_string(),
        }
    }
}

/// Look up the custodian a record points at.
///
/// Known ids come from the canonical table regardless of what the free-text
/// fields contain. `Other` uses the typed-in fields and yields `None` when no
/// custodian name was given.
pub fn custodian_details(record: &FormRecord) -> Option<CustodianDetails> {
    let id = record.custodian?;
    if let Some(info) = id.canonical() {
        return Some(info.into());
    }

    let name = record.custodian_name.trim();
    if name.is_empty() {
        return None;
    }

    Some(CustodianDetails {
        name: name.to_string(),
        address: record.custodian_address.trim().to_string(),
        city: record.custodian_city.trim().to_string(),
        state: record.custodian_state.trim().to_string(),
        zip: record.custodian_zip.trim().to_string(),
    })
}
