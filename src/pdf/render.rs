//! Preview rendering through PDFium

use crate::error::{Error, Result};
use base64::Engine;
use pdfium_render::prelude::*;

/// Default preview width in pixels
pub const DEFAULT_PREVIEW_WIDTH: u16 = 1200;

/// Rendered page image data
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Page number (1-indexed)
    pub page: u32,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Base64-encoded PNG image data
    pub data_base64: String,
    /// MIME type (always "image/png")
    pub mime_type: String,
}

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Render one page of a filled W-9 as a PNG, with form field values drawn
pub fn render_preview(data: &[u8], page_num: u32, width: Option<u16>) -> Result<RenderedPage> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }

    let pdfium = create_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(data, None)
        .map_err(|e| Error::Pdfium {
            reason: format!("{}", e),
        })?;

    let pages = document.pages();
    let page_count = pages.len() as u32;
    if page_num < 1 || page_num > page_count {
        return Err(Error::InvalidPdf {
            reason: format!("page {} out of range (1-{})", page_num, page_count),
        });
    }

    let page = pages
        .get((page_num - 1) as u16)
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page {}: {}", page_num, e),
        })?;

    let config = PdfRenderConfig::new()
        .set_target_width(width.unwrap_or(DEFAULT_PREVIEW_WIDTH) as i32)
        .render_form_data(true)
        .render_annotations(true);

    let bitmap = page.render_with_config(&config).map_err(|e| Error::Pdfium {
        reason: format!("Failed to render page {}: {}", page_num, e),
    })?;

    let dynamic_image = bitmap.as_image();
    let mut png_bytes = Vec::new();
    dynamic_image
        .write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to encode page {} as PNG: {}", page_num, e),
        })?;

    tracing::debug!(page = page_num, bytes = png_bytes.len(), "Rendered preview");

    Ok(RenderedPage {
        page: page_num,
        width: dynamic_image.width(),
        height: dynamic_image.height(),
        data_base64: base64::engine::general_purpose::STANDARD.encode(&png_bytes),
        mime_type: "image/png".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_pdf_before_loading_pdfium() {
        let err = render_preview(b"PNG", 1, None).unwrap_err();
        assert!(matches!(err, Error::InvalidPdf { .. }));
    }
}
