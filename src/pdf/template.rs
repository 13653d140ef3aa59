//! Parsed-once W-9 template

use super::acroform::AcroFormIndex;
use super::qpdf::QpdfWrapper;
use crate::error::{Error, Result};
use lopdf::{Document, ObjectId};
use std::path::Path;

/// Template bytes checked to be a PDF with at least one page.
///
/// Immutable once built. Every fill parses its own [`Document`] from the
/// shared bytes, so one `Arc<Template>` serves any number of fills.
#[derive(Debug, Clone)]
pub struct Template {
    bytes: Vec<u8>,
    source_name: String,
    page_count: usize,
    form_fields: usize,
}

impl Template {
    pub fn from_bytes(bytes: Vec<u8>, source_name: impl Into<String>) -> Result<Self> {
        let source_name = source_name.into();
        let doc = Document::load_mem(&bytes).map_err(|e| Error::TemplateLoad {
            reason: format!("{}: {}", source_name, e),
        })?;

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(Error::TemplateLoad {
                reason: format!("{}: document has no pages", source_name),
            });
        }
        let form_fields = AcroFormIndex::build(&doc).map_or(0, |index| index.len());

        tracing::info!(
            source = %source_name,
            pages = page_count,
            form_fields,
            "Loaded W-9 template"
        );

        Ok(Self {
            bytes,
            source_name,
            page_count,
            form_fields,
        })
    }

    /// Run the bytes through qpdf first (decrypt, drop object streams)
    pub fn normalized(
        bytes: &[u8],
        password: Option<&str>,
        source_name: impl Into<String>,
    ) -> Result<Self> {
        let source_name = source_name.into();
        let normalized = QpdfWrapper::normalize(bytes, password).map_err(|e| Error::TemplateLoad {
            reason: format!("{}: {}", source_name, e),
        })?;
        Self::from_bytes(normalized, source_name)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| Error::TemplateLoad {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_bytes(bytes, path.display().to_string())
    }

    /// Fresh, independently editable copy of the document and its first page
    pub fn open(&self) -> Result<(Document, ObjectId)> {
        let doc = Document::load_mem(&self.bytes).map_err(|e| Error::TemplateLoad {
            reason: format!("{}: {}", self.source_name, e),
        })?;
        let first_page = doc
            .get_pages()
            .into_iter()
            .next()
            .map(|(_, id)| id)
            .ok_or_else(|| Error::TemplateLoad {
                reason: format!("{}: document has no pages", self.source_name),
            })?;
        Ok((doc, first_page))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Number of terminal AcroForm fields, zero for flat templates
    pub fn form_field_count(&self) -> usize {
        self.form_fields
    }
}
