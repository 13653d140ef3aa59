//! Error types for the W-9 fill service

use thiserror::Error;

/// Result type alias for the W-9 fill service
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the W-9 fill service
///
/// Field-level validation problems are not errors: they are returned as
/// [`ValidationErrors`](crate::form::ValidationErrors). Placement problems on a
/// single field are not errors either; they surface as
/// [`FieldPlacementWarning`](crate::pdf::FieldPlacementWarning)s next to the
/// output.
#[derive(Error, Debug)]
pub enum Error {
    /// The template could not be fetched or parsed. Fatal: nothing to fill.
    #[error("Failed to load W-9 template: {reason}")]
    TemplateLoad { reason: String },

    /// The record cannot be mapped to exactly one name placement and TIN source
    #[error("Form record cannot be resolved: {reason}")]
    UnresolvableRecord { reason: String },

    /// Writing the filled document failed
    #[error("Failed to serialize filled PDF: {reason}")]
    Serialization { reason: String },

    /// Placement registry is malformed
    #[error("Invalid placement registry: {reason}")]
    Registry { reason: String },

    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    /// Source resolution error
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// Request argument rejected before any work was done
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A delivery adapter gave up
    #[error("Delivery failed: {reason}")]
    Delivery { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Template password missing or wrong
    #[error("Incorrect password for encrypted PDF")]
    IncorrectPassword,

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Path access denied (outside allowed output directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },

    /// Download too large
    #[error("Download too large: {size} bytes (max: {max_size} bytes)")]
    DownloadTooLarge { size: u64, max_size: u64 },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, form contents) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::TemplateLoad { .. } => "W-9 template is unavailable".to_string(),
            Error::UnresolvableRecord { reason } => {
                format!("Form record cannot be resolved: {}", reason)
            }
            Error::Serialization { .. } => "Failed to produce the filled PDF".to_string(),
            Error::Registry { reason } => format!("Invalid placement registry: {}", reason),
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::SourceResolution { .. } => "Failed to resolve PDF source".to_string(),
            Error::InvalidInput { reason } => format!("Invalid input: {}", reason),
            Error::Delivery { .. } => "Delivery failed".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdfium { .. } => "PDF rendering error".to_string(),
            Error::Json(_) => "Serialization error".to_string(),
            Error::IncorrectPassword => "Incorrect password for encrypted PDF".to_string(),
            Error::QpdfError { .. } => "PDF processing error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }
        }
    }

    /// Whether the caller gets nothing back (as opposed to a partial result)
    pub fn is_fatal_fill_error(&self) -> bool {
        matches!(
            self,
            Error::TemplateLoad { .. }
                | Error::UnresolvableRecord { .. }
                | Error::Serialization { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_template_detail() {
        let err = Error::TemplateLoad {
            reason: "/srv/assets/fw9.pdf: permission denied".to_string(),
        };
        assert!(!err.client_message().contains("/srv"));
        assert!(err.to_string().contains("/srv"));
    }

    #[test]
    fn test_unresolvable_reason_is_reported() {
        let err = Error::UnresolvableRecord {
            reason: "IRA account has no custodian".to_string(),
        };
        assert!(err.client_message().contains("no custodian"));
        assert!(err.is_fatal_fill_error());
    }

    #[test]
    fn test_io_error_not_fatal_fill_error() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!err.is_fatal_fill_error());
        assert_eq!(err.client_message(), "I/O error");
    }
}
