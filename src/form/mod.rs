//! W-9 data model, validation and resolution
//!
//! A [`FormRecord`] is validated step by step while the wizard runs, then
//! [`resolve`]d once into the concrete values the fill engine places.

pub mod custodian;
pub mod model;
pub mod resolve;
pub mod validate;

pub use custodian::{custodian_details, CustodianDetails, CustodianInfo};
pub use model::{
    AccountType, CustodianId, FormRecord, LlcClass, LlcType, Signature, TaxClassification, TinType,
};
pub use resolve::{
    digits_to_string, resolve, AddressLines, ClassificationMark, NameRule, ResolvedForm,
    ResolvedSignature, TinDigits, TinKind, TinPlacement,
};
pub use validate::{validate_all, validate_step, ValidationErrors, WizardStep};
