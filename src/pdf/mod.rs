//! PDF processing layer
//!
//! Filling goes through lopdf; qpdf normalizes templates and PDFium renders
//! previews.

pub mod acroform;
pub mod content;
pub mod engine;
mod qpdf;
pub mod registry;
pub mod render;
pub mod signature;
pub mod template;

pub use acroform::AcroFormIndex;
pub use engine::{
    fill, format_signature_date, suggested_filename, FieldPlacementWarning, FillEngine,
    FilledDocument, Placement, PlacementTarget, WarningKind,
};
pub use qpdf::QpdfWrapper;
pub use registry::{
    DigitGroup, FieldRegistry, FontWeight, NamedGroup, PlacementMode, SignatureSlot, Slot,
    TextAnchor, TextField, TinSlot, PRESET_NAMES,
};
pub use render::{render_preview, RenderedPage, DEFAULT_PREVIEW_WIDTH};
pub use signature::{ImageDecodeError, SignatureImage, SIGNATURE_PLACEHOLDER};
pub use template::Template;
