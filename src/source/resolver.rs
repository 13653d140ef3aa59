//! Template source resolution
//!
//! A template comes from a local path, an HTTP(S) URL or an inline base64
//! blob. URL downloads are checked against private address ranges and capped
//! in size while streaming.

use crate::error::{Error, Result};
use base64::Engine;
use futures_util::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// Where template bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    /// Local file path
    Path(String),
    /// HTTP(S) URL
    Url(String),
    /// Inline base64 PDF
    Base64(String),
}

impl TemplateSource {
    /// Name safe to log: base64 payloads are not echoed
    pub fn display_name(&self) -> String {
        match self {
            TemplateSource::Path(path) => path.clone(),
            TemplateSource::Url(url) => url.clone(),
            TemplateSource::Base64(_) => "<base64>".to_string(),
        }
    }
}

/// Download restrictions for URL sources
#[derive(Debug, Clone, Copy)]
pub struct SourceLimits {
    pub allow_private_urls: bool,
    pub max_download_bytes: u64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            allow_private_urls: false,
            max_download_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Raw template bytes and where they came from
#[derive(Debug)]
pub struct ResolvedPdf {
    pub data: Vec<u8>,
    pub source_name: String,
}

pub async fn resolve_template(source: &TemplateSource, limits: SourceLimits) -> Result<ResolvedPdf> {
    match source {
        TemplateSource::Path(path) => {
            let path = path.clone();
            tokio::task::spawn_blocking(move || resolve_path(path))
                .await
                .map_err(|e| Error::SourceResolution {
                    reason: format!("Task join error: {}", e),
                })?
        }
        TemplateSource::Url(url) => resolve_url(url, limits).await,
        TemplateSource::Base64(data) => resolve_base64(data),
    }
}

fn ensure_pdf_header(data: &[u8], what: &str) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: format!("{} is not a PDF file", what),
        });
    }
    Ok(())
}

pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path)?;
    ensure_pdf_header(&data, &path.display().to_string())?;

    Ok(ResolvedPdf {
        data,
        source_name: path.display().to_string(),
    })
}

/// Accepts bare base64 or a `data:application/pdf;base64,` URL
pub fn resolve_base64(encoded: &str) -> Result<ResolvedPdf> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let data = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    ensure_pdf_header(&data, "Decoded data")?;

    Ok(ResolvedPdf {
        data,
        source_name: "<base64>".to_string(),
    })
}

/// Loopback, private, link-local, CGNAT and unspecified addresses
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254/16, includes cloud metadata
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFE00) == 0xFC00 // fc00::/7
                || (first & 0xFFC0) == 0xFE80 // fe80::/10
        }
    }
}

async fn check_ssrf(url: &url::Url) -> Result<()> {
    let host = url.host_str().ok_or_else(|| Error::SourceResolution {
        reason: "URL has no host".to_string(),
    })?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::SourceResolution {
            reason: format!("DNS resolution failed for {}: {}", host, e),
        })?;

    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(Error::SsrfBlocked {
                url: url.to_string(),
            });
        }
    }
    Ok(())
}

pub async fn resolve_url(url: &str, limits: SourceLimits) -> Result<ResolvedPdf> {
    let parsed = url::Url::parse(url).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL: {}", e),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::SourceResolution {
            reason: format!("unsupported URL scheme '{}'", parsed.scheme()),
        });
    }
    if !limits.allow_private_urls {
        check_ssrf(&parsed).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;
    let response = client.get(parsed.clone()).send().await?;

    if !response.status().is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", response.status()),
        });
    }

    let max = limits.max_download_bytes;
    if let Some(content_length) = response.content_length() {
        if content_length > max {
            return Err(Error::DownloadTooLarge {
                size: content_length,
                max_size: max,
            });
        }
    }

    let mut data = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
        if data.len() as u64 > max {
            return Err(Error::DownloadTooLarge {
                size: data.len() as u64,
                max_size: max,
            });
        }
    }
    ensure_pdf_header(&data, "Downloaded data")?;

    tracing::info!(url = %parsed, bytes = data.len(), "Downloaded template");
    Ok(ResolvedPdf {
        data,
        source_name: parsed.to_string(),
    })
}
