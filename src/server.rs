//! MCP Server implementation using rmcp

use crate::delivery::{
    Delivery, DeliveryConfig, DeliveryPolicy, DeliveryReport, DeliveryStatus, FormSummary,
    GeneratedLink, Investor, PdfAttachment, Progress, WebhookEvent,
};
use crate::error::Error;
use crate::form::{validate_all, validate_step, FormRecord, ValidationErrors, WizardStep};
use crate::pdf::{
    render_preview, FieldPlacementWarning, FieldRegistry, FillEngine, Placement, Template,
    DEFAULT_PREVIEW_WIDTH,
};
use crate::source::{resolve_template, FillCache, SourceLimits, StoredFill, TemplateSource};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Configuration for the W-9 MCP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Template to fill. Loaded on first use.
    pub template: Option<TemplateSource>,
    /// Password for an encrypted template
    pub template_password: Option<String>,
    /// Run the template through qpdf before use (default: false)
    pub normalize_template: bool,
    /// Built-in registry preset, used unless `registry_path` is set
    pub registry_preset: String,
    /// JSON registry file, overrides `registry_preset`
    pub registry_path: Option<PathBuf>,
    /// Delivery adapter settings
    pub delivery: DeliveryConfig,
    /// Directories `fill_w9` may write into. Empty disables file output.
    pub output_dirs: Vec<String>,
    /// Restrictions on template downloads
    pub source_limits: SourceLimits,
    /// Maximum total bytes of filled PDFs kept for chaining (default: 64MB)
    pub cache_max_bytes: usize,
    /// Maximum number of filled PDFs kept for chaining (default: 50)
    pub cache_max_entries: usize,
    /// Upper bound on preview width in pixels (default: 2400)
    pub max_preview_width: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            template: None,
            template_password: None,
            normalize_template: false,
            registry_preset: "coordinates-2024".to_string(),
            registry_path: None,
            delivery: DeliveryConfig::default(),
            output_dirs: Vec::new(),
            source_limits: SourceLimits::default(),
            cache_max_bytes: 64 * 1024 * 1024, // 64MB
            cache_max_entries: 50,
            max_preview_width: 2400,
        }
    }
}

impl ServerConfig {
    /// Whether templates go through qpdf. A password can only be applied
    /// there, so setting one implies normalization.
    pub fn normalizes_template(&self) -> bool {
        self.normalize_template || self.template_password.is_some()
    }

    /// Read `W9_*` variables from the process environment
    pub fn from_env() -> crate::error::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> crate::error::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        config.template = match (var("W9_TEMPLATE_PATH"), var("W9_TEMPLATE_URL")) {
            (Some(path), _) => Some(TemplateSource::Path(path)),
            (None, Some(url)) => Some(TemplateSource::Url(url)),
            (None, None) => None,
        };
        config.template_password = var("W9_TEMPLATE_PASSWORD");
        if let Some(v) = var("W9_NORMALIZE_TEMPLATE") {
            config.normalize_template = parse_bool("W9_NORMALIZE_TEMPLATE", &v)?;
        }
        if let Some(v) = var("W9_REGISTRY") {
            config.registry_preset = v;
        }
        config.registry_path = var("W9_REGISTRY_PATH").map(PathBuf::from);

        config.delivery.api_url = var("W9_API_URL");
        config.delivery.webhook_url = var("W9_WEBHOOK_URL");
        if let Some(v) = var("W9_FORM_BASE_URL") {
            config.delivery.form_base_url = v;
        }
        config.delivery.anonymous_recipient = var("W9_ANONYMOUS_RECIPIENT");
        if let Some(v) = var("W9_DELIVERY_POLICY") {
            config.delivery.policy = DeliveryPolicy::from_str(&v)?;
        }
        if let Some(v) = var("W9_DELIVERY_ATTEMPTS") {
            config.delivery.max_attempts = parse_number("W9_DELIVERY_ATTEMPTS", &v)?;
        }

        if let Some(v) = var("W9_OUTPUT_DIRS") {
            config.output_dirs = v
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = var("W9_ALLOW_PRIVATE_URLS") {
            config.source_limits.allow_private_urls = parse_bool("W9_ALLOW_PRIVATE_URLS", &v)?;
        }
        if let Some(v) = var("W9_MAX_DOWNLOAD_BYTES") {
            config.source_limits.max_download_bytes = parse_number("W9_MAX_DOWNLOAD_BYTES", &v)?;
        }
        if let Some(v) = var("W9_CACHE_MAX_BYTES") {
            config.cache_max_bytes = parse_number("W9_CACHE_MAX_BYTES", &v)?;
        }
        if let Some(v) = var("W9_CACHE_MAX_ENTRIES") {
            config.cache_max_entries = parse_number("W9_CACHE_MAX_ENTRIES", &v)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> crate::error::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidInput {
            reason: format!("{} must be true or false, got '{}'", key, value),
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> crate::error::Result<T> {
    value.parse().map_err(|_| Error::InvalidInput {
        reason: format!("{} must be a non-negative integer, got '{}'", key, value),
    })
}

/// W-9 MCP Server
#[derive(Clone)]
pub struct W9Server {
    template: Arc<OnceCell<Arc<Template>>>,
    registry: Arc<FieldRegistry>,
    fills: Arc<FillCache>,
    delivery: Arc<Delivery>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for validate_w9
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateW9Params {
    /// Form record as the wizard produces it (camelCase keys)
    pub record: FormRecord,
    /// Validate one wizard step (0-6) instead of the whole record
    #[serde(default)]
    pub step: Option<u8>,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct StepInfo {
    /// Wizard step number
    pub index: u8,
    /// Step title
    pub title: String,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct ValidateW9Result {
    /// True when no field errors were found
    pub valid: bool,
    /// Field name to message
    pub errors: ValidationErrors,
    /// Steps the wizard walks for this record's account type
    pub steps: Vec<StepInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_w9
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillW9Params {
    /// Form record as the wizard produces it (camelCase keys)
    pub record: FormRecord,
    /// Use this template instead of the configured one
    #[serde(default)]
    pub template: Option<TemplateSource>,
    /// Refuse to fill a record with validation errors (default: true)
    #[serde(default = "default_true")]
    pub validate: bool,
    /// Return the filled PDF as base64 in the response
    #[serde(default)]
    pub include_base64: bool,
    /// Also write the filled PDF here. Must be inside a configured output directory.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct FillW9Result {
    /// Cache key of the filled PDF, for preview_w9 and deliver_w9
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cache_key: Option<String>,
    /// Suggested download name
    pub filename: String,
    /// Registry revision used for placement
    pub registry_version: String,
    /// Size of the filled PDF in bytes
    pub byte_size: usize,
    /// Every placed value; TIN digits are masked
    pub placements: Vec<Placement>,
    /// Values that were skipped or replaced
    pub warnings: Vec<FieldPlacementWarning>,
    /// Field errors that stopped the fill
    #[serde(skip_serializing_if = "ValidationErrors::is_empty")]
    pub validation_errors: ValidationErrors,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_base64: Option<String>,
    /// Path where the PDF was saved (if output_path was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for preview_w9
// ============================================================================

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PreviewW9Params {
    /// Cache key returned by fill_w9
    pub cache_key: String,
    /// Page number (default: 1)
    #[serde(default = "default_page")]
    pub page: u32,
    /// Target width in pixels (default: 1200)
    #[serde(default)]
    pub width: Option<u16>,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct PreviewW9Result {
    pub cache_key: String,
    pub page: u32,
    pub width: u32,
    pub height: u32,
    /// Base64-encoded PNG image data
    pub data_base64: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for deliver_w9
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeliverW9Params {
    /// Cache key returned by fill_w9
    pub cache_key: String,
    /// Investor the form link was issued for. Omit for anonymous submissions.
    #[serde(default)]
    pub investor: Option<Investor>,
}

#[derive(Debug, Serialize)]
pub struct DeliverW9Result {
    pub cache_key: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DeliveryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for track_form_event
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TrackFormEventParams {
    /// One of form.opened, form.started, form.progress
    pub event: WebhookEvent,
    /// Investor the form link was issued for. Omit for anonymous sessions.
    #[serde(default)]
    pub investor: Option<Investor>,
    /// Current wizard position (required for form.progress)
    #[serde(default)]
    pub current_step: Option<u32>,
    /// Number of steps in this session's wizard (required for form.progress)
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Step title; defaults to the wizard's title for `current_step`
    #[serde(default)]
    pub step_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackFormEventResult {
    pub event: WebhookEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for generate_form_link
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateFormLinkParams {
    /// Investor email address
    pub email: String,
    /// Investor name
    pub name: String,
}

#[derive(Debug, Default, Serialize)]
pub struct GenerateFormLinkResult {
    #[serde(flatten)]
    pub link: Option<GeneratedLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl W9Server {
    /// Create a server from configuration. Fails on a bad registry or form
    /// base URL; the template itself is loaded on first use.
    pub fn with_config(config: ServerConfig) -> crate::error::Result<Self> {
        Self::build(config, OnceCell::new())
    }

    /// Create a server around an already loaded template
    pub fn with_template(config: ServerConfig, template: Template) -> crate::error::Result<Self> {
        Self::build(config, OnceCell::new_with(Some(Arc::new(template))))
    }

    fn build(
        config: ServerConfig,
        template: OnceCell<Arc<Template>>,
    ) -> crate::error::Result<Self> {
        let registry = match &config.registry_path {
            Some(path) => FieldRegistry::load(path)?,
            None => FieldRegistry::preset(&config.registry_preset)?,
        };
        tracing::info!(
            version = %registry.version,
            mode = ?registry.mode,
            "Using placement registry"
        );

        let delivery = Delivery::new(&config.delivery)?;
        let fills = FillCache::new(config.cache_max_entries, config.cache_max_bytes);

        Ok(Self {
            template: Arc::new(template),
            registry: Arc::new(registry),
            fills: Arc::new(fills),
            delivery: Arc::new(delivery),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        })
    }

    /// Validate a W-9 record
    #[tool(
        description = "Validate W-9 form data without filling anything. Returns a map from field name to error message; an empty map means the record is complete.

Pass `step` (0 Account Type, 1 Custodian, 2 Identity, 3 Tax Classification, 4 Address & TIN, 5 Signature, 6 LLC Type) to validate a single wizard step. The response also lists the steps the wizard walks for the record's account type."
    )]
    async fn validate_w9(&self, Parameters(params): Parameters<ValidateW9Params>) -> String {
        let result = Self::process_validate_w9(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "validate_w9 failed");
            ValidateW9Result {
                error: Some(e.client_message()),
                ..Default::default()
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Fill the W-9 template
    #[tool(
        description = "Fill an IRS W-9 PDF from wizard form data.

Names, address, tax classification checkbox, TIN digits, exemption codes, signature (typed text or drawn image) and date are placed according to the configured placement registry. A missing signatureDate defaults to today.

Returns:
- output_cache_key: reference for preview_w9 and deliver_w9
- filename: suggested name, W9_{Name}_{YYYY-MM-DD}.pdf
- placements: where every value went (TIN digits masked)
- warnings: values that could not be placed (e.g. AcroForm field not found)
- validation_errors: set instead of a PDF when the record is incomplete and validate is true

Set include_base64 to get the PDF inline, or output_path to save it inside a configured output directory."
    )]
    async fn fill_w9(&self, Parameters(params): Parameters<FillW9Params>) -> String {
        let result = self.process_fill_w9(params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fill_w9 failed");
            FillW9Result {
                error: Some(e.client_message()),
                ..Default::default()
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Render a filled W-9 page as PNG
    #[tool(
        description = "Render a page of a filled W-9 (by fill_w9 cache key) as a base64-encoded PNG, so the submitter can review the form before it is sent.

Options:
- page: page number (default: 1)
- width: target width in pixels (default: 1200). Aspect ratio is preserved."
    )]
    async fn preview_w9(&self, Parameters(params): Parameters<PreviewW9Params>) -> String {
        let result = self.process_preview_w9(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "preview_w9 failed");
            PreviewW9Result {
                cache_key: params.cache_key.clone(),
                page: params.page,
                error: Some(e.client_message()),
                ..Default::default()
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Deliver a filled W-9
    #[tool(
        description = "Send a filled W-9 (by fill_w9 cache key) to the back office.

Depending on the configured delivery policy the PDF goes to the email relay, the webhook (as a form.completed event), or both. Form data sent alongside never includes SSN, EIN or signature. Pass `investor` ({email, name}) when the form was opened through a tracked link; without it the submission is reported as anonymous.

Each adapter reports delivered, skipped (not configured or excluded by policy) or failed."
    )]
    async fn deliver_w9(&self, Parameters(params): Parameters<DeliverW9Params>) -> String {
        let result = self.process_deliver_w9(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "deliver_w9 failed");
            DeliverW9Result {
                cache_key: params.cache_key.clone(),
                filename: String::new(),
                report: None,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Report a wizard lifecycle event
    #[tool(
        description = "Report a form lifecycle event to the webhook: form.opened, form.started or form.progress.

form.progress requires current_step and total_steps; percent complete is computed from them. Completed forms are reported by deliver_w9."
    )]
    async fn track_form_event(
        &self,
        Parameters(params): Parameters<TrackFormEventParams>,
    ) -> String {
        let result = self
            .process_track_form_event(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "track_form_event failed");
                TrackFormEventResult {
                    event: params.event,
                    status: None,
                    error: Some(e.client_message()),
                }
            });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Build a tracked form link
    #[tool(
        description = "Generate a W-9 form link for an investor. The link carries the investor's email and name so lifecycle events and the completed form are attributed to them.

Returns {formLink, investor}."
    )]
    async fn generate_form_link(
        &self,
        Parameters(params): Parameters<GenerateFormLinkParams>,
    ) -> String {
        let result = match self.delivery.links.generate(&params.email, &params.name) {
            Ok(link) => GenerateFormLinkResult {
                link: Some(link),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "generate_form_link failed");
                GenerateFormLinkResult {
                    link: None,
                    error: Some(e.client_message()),
                }
            }
        };

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }
}

impl W9Server {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// The configured template, loaded once and shared by every fill
    pub async fn template(&self) -> crate::error::Result<Arc<Template>> {
        let template = self
            .template
            .get_or_try_init(|| async {
                match &self.config.template {
                    Some(source) => self.load_template(source).await.map(Arc::new),
                    None => Err(Error::TemplateLoad {
                        reason: "no template configured (set W9_TEMPLATE_PATH or W9_TEMPLATE_URL)"
                            .to_string(),
                    }),
                }
            })
            .await?;
        Ok(Arc::clone(template))
    }

    async fn load_template(&self, source: &TemplateSource) -> crate::error::Result<Template> {
        let resolved = resolve_template(source, self.config.source_limits)
            .await
            .map_err(|e| Error::TemplateLoad {
                reason: format!("{}: {}", source.display_name(), e),
            })?;

        let normalize = self.config.normalizes_template();
        let password = self.config.template_password.clone();
        tokio::task::spawn_blocking(move || {
            if normalize {
                Template::normalized(&resolved.data, password.as_deref(), resolved.source_name)
            } else {
                Template::from_bytes(resolved.data, resolved.source_name)
            }
        })
        .await
        .map_err(|e| Error::TemplateLoad {
            reason: format!("Task join error: {}", e),
        })?
    }

    /// Validate that an output path is within the configured output directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        let denied = || Error::PathAccessDenied {
            path: path.to_string(),
        };

        let path_obj = Path::new(path);
        let file_name = path_obj.file_name().ok_or_else(denied)?;
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let canonical_target = std::fs::canonicalize(parent)
            .map_err(|_| denied())?
            .join(file_name);

        for dir in &self.config.output_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical_target.starts_with(&canonical_dir) {
                    return Ok(canonical_target);
                }
            }
        }

        Err(denied())
    }

    fn write_output(&self, output_path: &Option<String>, data: &[u8]) -> crate::error::Result<Option<String>> {
        let Some(path_str) = output_path else {
            return Ok(None);
        };
        let target = self.validate_output_path_access(path_str)?;
        std::fs::write(&target, data)?;
        tracing::info!(path = %target.display(), bytes = data.len(), "Wrote filled W-9");
        Ok(Some(target.display().to_string()))
    }

    pub fn process_validate_w9(params: &ValidateW9Params) -> crate::error::Result<ValidateW9Result> {
        let errors = match params.step {
            Some(index) => {
                let step = WizardStep::from_index(index).ok_or_else(|| Error::InvalidInput {
                    reason: format!("unknown wizard step {}", index),
                })?;
                validate_step(step, &params.record)
            }
            None => validate_all(&params.record),
        };

        let steps = WizardStep::sequence_for(params.record.account_type)
            .into_iter()
            .map(|step| StepInfo {
                index: step.index(),
                title: step.title().to_string(),
            })
            .collect();

        Ok(ValidateW9Result {
            valid: errors.is_empty(),
            errors,
            steps,
            error: None,
        })
    }

    pub async fn process_fill_w9(&self, params: FillW9Params) -> crate::error::Result<FillW9Result> {
        let FillW9Params {
            mut record,
            template,
            validate,
            include_base64,
            output_path,
        } = params;

        let date = *record
            .signature_date
            .get_or_insert_with(|| chrono::Local::now().date_naive());

        if validate {
            let errors = validate_all(&record);
            if !errors.is_empty() {
                tracing::info!(fields = errors.len(), "Refusing to fill incomplete W-9");
                return Ok(FillW9Result {
                    validation_errors: errors,
                    error: Some("Form record has validation errors".to_string()),
                    ..Default::default()
                });
            }
        }

        let template = match &template {
            Some(source) => Arc::new(self.load_template(source).await?),
            None => self.template().await?,
        };

        let summary = FormSummary::from_record(&record)?;

        // lopdf work is CPU-bound
        let engine = FillEngine::new(template, Arc::clone(&self.registry));
        let filled = tokio::task::spawn_blocking(move || engine.fill(&record))
            .await
            .map_err(|e| Error::Serialization {
                reason: format!("Task join error: {}", e),
            })??;

        let filename = filled.suggested_filename(date);
        let output_path = self.write_output(&output_path, &filled.bytes)?;
        let pdf_base64 = include_base64
            .then(|| base64::engine::general_purpose::STANDARD.encode(&filled.bytes));
        let byte_size = filled.bytes.len();

        let output_cache_key = self.fills.insert(StoredFill {
            bytes: filled.bytes,
            filename: filename.clone(),
            display_name: filled.display_name,
            summary,
        });

        Ok(FillW9Result {
            output_cache_key,
            filename,
            registry_version: filled.registry_version,
            byte_size,
            placements: filled.placements,
            warnings: filled.warnings,
            validation_errors: ValidationErrors::new(),
            pdf_base64,
            output_path,
            error: None,
        })
    }

    pub async fn process_preview_w9(
        &self,
        params: &PreviewW9Params,
    ) -> crate::error::Result<PreviewW9Result> {
        let stored = self
            .fills
            .get(&params.cache_key)
            .ok_or_else(|| Error::CacheKeyNotFound {
                key: params.cache_key.clone(),
            })?;

        let page = params.page;
        let width = params
            .width
            .unwrap_or(DEFAULT_PREVIEW_WIDTH)
            .clamp(1, self.config.max_preview_width.max(1));

        // PDFium work is CPU-bound
        let rendered = tokio::task::spawn_blocking(move || {
            render_preview(&stored.bytes, page, Some(width))
        })
        .await
        .map_err(|e| Error::Pdfium {
            reason: format!("Task join error: {}", e),
        })??;

        Ok(PreviewW9Result {
            cache_key: params.cache_key.clone(),
            page: rendered.page,
            width: rendered.width,
            height: rendered.height,
            data_base64: rendered.data_base64,
            mime_type: rendered.mime_type,
            error: None,
        })
    }

    pub async fn process_deliver_w9(
        &self,
        params: &DeliverW9Params,
    ) -> crate::error::Result<DeliverW9Result> {
        let stored = self
            .fills
            .get(&params.cache_key)
            .ok_or_else(|| Error::CacheKeyNotFound {
                key: params.cache_key.clone(),
            })?;

        let pdf = PdfAttachment::new(&stored.bytes, stored.filename.clone());
        let report = self
            .delivery
            .deliver_completed(
                params.investor.as_ref(),
                &stored.display_name,
                &stored.summary,
                &pdf,
            )
            .await;

        Ok(DeliverW9Result {
            cache_key: params.cache_key.clone(),
            filename: stored.filename.clone(),
            report: Some(report),
            error: None,
        })
    }

    pub async fn process_track_form_event(
        &self,
        params: &TrackFormEventParams,
    ) -> crate::error::Result<TrackFormEventResult> {
        let webhook = &self.delivery.webhook;
        let investor = params.investor.as_ref();

        let payload = match params.event {
            WebhookEvent::Opened => webhook.opened(investor),
            WebhookEvent::Started => webhook.started(investor),
            WebhookEvent::Progress => {
                let (Some(current), Some(total)) = (params.current_step, params.total_steps)
                else {
                    return Err(Error::InvalidInput {
                        reason: "form.progress requires current_step and total_steps".to_string(),
                    });
                };
                let step_name = params
                    .step_name
                    .clone()
                    .or_else(|| {
                        u8::try_from(current)
                            .ok()
                            .and_then(WizardStep::from_index)
                            .map(|s| s.title().to_string())
                    })
                    .unwrap_or_default();
                webhook.progress(investor, Progress::new(current, total, step_name))
            }
            WebhookEvent::Completed => {
                return Err(Error::InvalidInput {
                    reason: "form.completed is sent by deliver_w9".to_string(),
                });
            }
        };

        let status = webhook.send(&payload).await;
        Ok(TrackFormEventResult {
            event: params.event,
            status: Some(status),
            error: None,
        })
    }
}

#[tool_handler]
impl ServerHandler for W9Server {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "W-9 MCP Server validates W-9 form data, fills the IRS W-9 PDF, renders previews \
                 and delivers completed forms by email relay or webhook. Typical flow: \
                 validate_w9, fill_w9, preview_w9, deliver_w9."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with configuration read from the environment
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::from_env()?).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let server = W9Server::with_config(config)?;

    tracing::info!("W-9 MCP Server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::AccountType;
    use lopdf::{dictionary, Document, Object, Stream};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn blank_template() -> Template {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 g".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        Template::from_bytes(bytes, "blank").unwrap()
    }

    fn individual() -> FormRecord {
        serde_json::from_value(serde_json::json!({
            "accountType": "individual",
            "personalName": "Pat Doe",
            "taxClassification": "individual",
            "address": "1 Main St",
            "city": "Springfield",
            "state": "IL",
            "zipCode": "62701",
            "tinType": "ssn",
            "ssn": "123-45-6789",
            "signature": {"typed": "Pat Doe"},
            "signatureDate": "2024-03-15"
        }))
        .unwrap()
    }

    fn server() -> W9Server {
        W9Server::with_template(ServerConfig::default(), blank_template()).unwrap()
    }

    fn fill_params(record: FormRecord) -> FillW9Params {
        FillW9Params {
            record,
            template: None,
            validate: true,
            include_base64: false,
            output_path: None,
        }
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("W9_TEMPLATE_URL", "https://irs.example/fw9.pdf"),
            ("W9_REGISTRY", "acroform-2024"),
            ("W9_DELIVERY_POLICY", "webhook"),
            ("W9_DELIVERY_ATTEMPTS", "5"),
            ("W9_OUTPUT_DIRS", "/srv/out, /tmp/w9 ,"),
            ("W9_ALLOW_PRIVATE_URLS", "yes"),
            ("W9_API_URL", "  "),
        ]);
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(
            config.template,
            Some(TemplateSource::Url("https://irs.example/fw9.pdf".to_string()))
        );
        assert_eq!(config.registry_preset, "acroform-2024");
        assert_eq!(config.delivery.policy, DeliveryPolicy::Webhook);
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.output_dirs, vec!["/srv/out", "/tmp/w9"]);
        assert!(config.source_limits.allow_private_urls);
        assert_eq!(config.delivery.api_url, None);
    }

    #[test]
    fn test_config_path_wins_over_url() {
        let config = ServerConfig::from_lookup(|k| match k {
            "W9_TEMPLATE_PATH" => Some("/srv/fw9.pdf".to_string()),
            "W9_TEMPLATE_URL" => Some("https://irs.example/fw9.pdf".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.template, Some(TemplateSource::Path("/srv/fw9.pdf".to_string())));
    }

    #[test]
    fn test_password_implies_normalization() {
        assert!(!ServerConfig::default().normalizes_template());

        let config = ServerConfig::from_lookup(|k| {
            (k == "W9_TEMPLATE_PASSWORD").then(|| "owner-secret".to_string())
        })
        .unwrap();
        assert!(!config.normalize_template);
        assert!(config.normalizes_template());
    }

    #[tokio::test]
    async fn test_password_template_loads_through_qpdf() {
        let config = ServerConfig {
            template: Some(TemplateSource::Base64(
                base64::engine::general_purpose::STANDARD.encode(blank_template().bytes()),
            )),
            template_password: Some("owner-secret".to_string()),
            ..ServerConfig::default()
        };
        let server = W9Server::with_config(config).unwrap();

        let template = server.template().await.unwrap();
        assert_eq!(template.page_count(), 1);
        let result = server.process_fill_w9(fill_params(individual())).await.unwrap();
        assert!(result.error.is_none());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad_bool = ServerConfig::from_lookup(|k| {
            (k == "W9_NORMALIZE_TEMPLATE").then(|| "maybe".to_string())
        });
        assert!(bad_bool.is_err());

        let bad_number = ServerConfig::from_lookup(|k| {
            (k == "W9_CACHE_MAX_ENTRIES").then(|| "-1".to_string())
        });
        assert!(bad_number.is_err());
    }

    #[test]
    fn test_unknown_registry_preset_fails_startup() {
        let config = ServerConfig {
            registry_preset: "w9-1999".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            W9Server::with_config(config),
            Err(Error::Registry { .. })
        ));
    }

    #[test]
    fn test_validate_reports_steps() {
        let record = FormRecord {
            account_type: Some(AccountType::Ira),
            ..FormRecord::default()
        };
        let result = W9Server::process_validate_w9(&ValidateW9Params { record, step: None }).unwrap();
        assert!(!result.valid);
        let indices: Vec<u8> = result.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_validate_unknown_step() {
        let params = ValidateW9Params {
            record: individual(),
            step: Some(9),
        };
        assert!(matches!(
            W9Server::process_validate_w9(&params),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_template_is_template_load_error() {
        let server = W9Server::with_config(ServerConfig::default()).unwrap();
        let err = server.process_fill_w9(fill_params(individual())).await.unwrap_err();
        assert!(matches!(err, Error::TemplateLoad { .. }));
    }

    #[tokio::test]
    async fn test_fill_caches_output() {
        let server = server();
        let result = server.process_fill_w9(fill_params(individual())).await.unwrap();

        assert!(result.error.is_none());
        assert_eq!(result.filename, "W9_PatDoe_2024-03-15.pdf");
        assert!(result.warnings.is_empty());
        assert!(result.pdf_base64.is_none());
        let key = result.output_cache_key.unwrap();
        let stored = server.fills.get(&key).unwrap();
        assert_eq!(stored.bytes.len(), result.byte_size);
        assert!(!stored.summary.contains_key("ssn"));
    }

    #[tokio::test]
    async fn test_fill_refuses_invalid_record() {
        let mut record = individual();
        record.ssn = "12-345".to_string();
        let result = server().process_fill_w9(fill_params(record)).await.unwrap();

        assert!(result.output_cache_key.is_none());
        assert!(result.validation_errors.contains("ssn"));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_fill_defaults_signature_date() {
        let mut record = individual();
        record.signature_date = None;
        let result = server().process_fill_w9(fill_params(record)).await.unwrap();

        let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(result.filename.ends_with(&format!("{}.pdf", today)));
        assert!(result.placements.iter().any(|p| p.field == "signatureDate"));
    }

    #[tokio::test]
    async fn test_output_path_outside_dirs_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = fill_params(individual());
        params.output_path = Some(dir.path().join("w9.pdf").display().to_string());

        let err = server().process_fill_w9(params).await.unwrap_err();
        assert!(matches!(err, Error::PathAccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_output_path_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            output_dirs: vec![dir.path().display().to_string()],
            ..ServerConfig::default()
        };
        let server = W9Server::with_template(config, blank_template()).unwrap();
        let mut params = fill_params(individual());
        params.output_path = Some(dir.path().join("w9.pdf").display().to_string());
        params.include_base64 = true;

        let result = server.process_fill_w9(params).await.unwrap();
        let written = std::fs::read(dir.path().join("w9.pdf")).unwrap();
        assert!(written.starts_with(b"%PDF"));
        assert!(result.output_path.is_some());
        assert!(result.pdf_base64.is_some());
    }

    #[tokio::test]
    async fn test_deliver_unknown_key() {
        let params = DeliverW9Params {
            cache_key: "nope".to_string(),
            investor: None,
        };
        let err = server().process_deliver_w9(&params).await.unwrap_err();
        assert!(matches!(err, Error::CacheKeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_deliver_without_targets_skips() {
        let server = server();
        let key = server
            .process_fill_w9(fill_params(individual()))
            .await
            .unwrap()
            .output_cache_key
            .unwrap();

        let result = server
            .process_deliver_w9(&DeliverW9Params {
                cache_key: key,
                investor: None,
            })
            .await
            .unwrap();
        let report = result.report.unwrap();
        assert!(!report.any_delivered());
        assert_eq!(result.filename, "W9_PatDoe_2024-03-15.pdf");
    }

    #[tokio::test]
    async fn test_progress_needs_steps() {
        let params = TrackFormEventParams {
            event: WebhookEvent::Progress,
            investor: None,
            current_step: Some(2),
            total_steps: None,
            step_name: None,
        };
        let err = server().process_track_form_event(&params).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_completed_event_rejected() {
        let params = TrackFormEventParams {
            event: WebhookEvent::Completed,
            investor: None,
            current_step: None,
            total_steps: None,
            step_name: None,
        };
        assert!(server().process_track_form_event(&params).await.is_err());
    }

    #[tokio::test]
    async fn test_generate_link_tool() {
        let server = server();
        let json = server
            .generate_form_link(Parameters(GenerateFormLinkParams {
                email: "pat@example.com".to_string(),
                name: "Pat Doe".to_string(),
            }))
            .await;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let result = &value["results"][0];
        assert_eq!(result["investor"]["name"], "Pat Doe");
        assert!(result["formLink"]
            .as_str()
            .unwrap()
            .ends_with("?email=pat%40example.com&name=Pat+Doe"));
        assert!(result.get("error").is_none());
    }

    #[tokio::test]
    async fn test_generate_link_tool_missing_name() {
        let json = server()
            .generate_form_link(Parameters(GenerateFormLinkParams {
                email: "pat@example.com".to_string(),
                name: String::new(),
            }))
            .await;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["results"][0]["error"],
            "Invalid input: Email and name are required"
        );
    }
}
