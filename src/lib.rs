//! W-9 MCP Server Library
//!
//! Fills the IRS W-9 PDF from wizard form data and hands the result to
//! delivery adapters. Exposed as MCP tools:
//! - `validate_w9`: Check a form record, whole or one wizard step
//! - `fill_w9`: Fill the template and cache the output
//! - `preview_w9`: Render a filled page as PNG
//! - `deliver_w9`: Send a filled form to the email relay and/or webhook
//! - `track_form_event`: Report wizard lifecycle events
//! - `generate_form_link`: Build an investor-specific form link

pub mod delivery;
pub mod error;
pub mod form;
pub mod pdf;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use form::{validate_all, validate_step, FormRecord, ValidationErrors, WizardStep};
pub use pdf::{fill, FieldRegistry, FillEngine, FilledDocument, Template};
pub use server::{run_server, run_server_with_config, ServerConfig, W9Server};
