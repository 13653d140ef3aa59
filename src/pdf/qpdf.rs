//! qpdf FFI wrapper for template normalization
//!
//! Templates downloaded from the IRS are sometimes encrypted (owner password
//! only) or packed into object streams. qpdf rewrites them into a plain file
//! the fill engine can edit.

use crate::error::{Error, Result};
use qpdf::{ObjectStreamMode, QPdf};

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Helper: open a QPdf from memory, optionally with password
fn open_qpdf(data: &[u8], password: Option<&str>) -> Result<QPdf> {
    match password {
        Some(pwd) => QPdf::read_from_memory_encrypted(data, pwd).map_err(map_qpdf_error),
        None => QPdf::read_from_memory(data).map_err(map_qpdf_error),
    }
}

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

impl QpdfWrapper {
    /// Rewrite a template without encryption or object streams
    ///
    /// # Arguments
    /// * `input_data` - Raw PDF bytes
    /// * `password` - Optional password for encrypted templates
    ///
    /// # Returns
    /// The normalized PDF as bytes
    pub fn normalize(input_data: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
        let qpdf = open_qpdf(input_data, password)?;

        let mut writer = qpdf.writer();
        writer
            .object_stream_mode(ObjectStreamMode::Disable)
            .preserve_unreferenced_objects(false)
            .preserve_encryption(false);
        writer.write_to_memory().map_err(map_qpdf_error)
    }
}
