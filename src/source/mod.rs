//! Template sources and the filled-output cache

pub mod cache;
pub mod resolver;

pub use cache::{FillCache, StoredFill};
pub use resolver::{
    resolve_base64, resolve_path, resolve_template, resolve_url, ResolvedPdf, SourceLimits,
    TemplateSource,
};
