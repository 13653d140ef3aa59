//! W-9 fill engine
//!
//! Resolves a [`FormRecord`], places every value according to a
//! [`FieldRegistry`] and serializes the result. Identical inputs produce
//! byte-identical output.

use super::acroform::{self, AcroFormIndex};
use super::content::PageWriter;
use super::registry::{FieldRegistry, FontWeight, Slot, TextAnchor, TextField, TinSlot};
use super::signature::{SignatureImage, SIGNATURE_PLACEHOLDER};
use super::template::Template;
use crate::error::{Error, Result};
use crate::form::{
    digits_to_string, resolve, FormRecord, ResolvedForm, ResolvedSignature, TinDigits, TinKind,
};
use chrono::{Datelike, NaiveDate};
use lopdf::Document;
use serde::Serialize;
use std::sync::Arc;

/// Why a value was skipped or replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// No candidate AcroForm field exists in the template
    FieldNotFound,
    /// The registry has no slot for the value
    MissingSlot,
    /// The drawn signature could not be used; the placeholder was drawn
    SignatureImage,
    /// Characters outside the page font's encoding were drawn as `?`
    UnencodableText,
}

/// Non-fatal placement problem, returned next to the output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPlacementWarning {
    pub field: String,
    pub kind: WarningKind,
    pub message: String,
}

/// Where a value ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlacementTarget {
    /// Drawn on the page; y is measured from the top edge
    Coordinates { x: f32, y: f32 },
    /// Written into an AcroForm field
    Field { name: String },
}

/// One placed value. TIN digits are masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub field: String,
    pub value: String,
    pub target: PlacementTarget,
}

/// Output of a fill
#[derive(Debug, Clone)]
pub struct FilledDocument {
    pub bytes: Vec<u8>,
    pub placements: Vec<Placement>,
    pub warnings: Vec<FieldPlacementWarning>,
    pub display_name: String,
    pub registry_version: String,
}

impl FilledDocument {
    pub fn suggested_filename(&self, date: NaiveDate) -> String {
        suggested_filename(&self.display_name, date)
    }

    pub fn placement(&self, field: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.field == field)
    }
}

/// `W9_{name}_{YYYY-MM-DD}.pdf` with everything but ASCII letters and digits
/// stripped from the name
pub fn suggested_filename(display_name: &str, date: NaiveDate) -> String {
    let sanitized: String = display_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let iso = date.format("%Y-%m-%d");
    if sanitized.is_empty() {
        format!("W9_{}.pdf", iso)
    } else {
        format!("W9_{}_{}.pdf", sanitized, iso)
    }
}

/// US short date, `M/D/YYYY`
pub fn format_signature_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}

/// A template paired with the registry for its revision
#[derive(Debug, Clone)]
pub struct FillEngine {
    template: Arc<Template>,
    registry: Arc<FieldRegistry>,
}

impl FillEngine {
    pub fn new(template: Arc<Template>, registry: Arc<FieldRegistry>) -> Self {
        Self { template, registry }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn fill(&self, record: &FormRecord) -> Result<FilledDocument> {
        fill(&self.template, record, &self.registry)
    }
}

/// Fill the template with one record
pub fn fill(
    template: &Template,
    record: &FormRecord,
    registry: &FieldRegistry,
) -> Result<FilledDocument> {
    let (doc, page_id) = template.open()?;
    let resolved = resolve(record)?;

    let writer = PageWriter::new(&doc, page_id)?;
    let acroform = if registry.uses_named_fields() {
        AcroFormIndex::build(&doc)
    } else {
        None
    };

    let mut filler = Filler {
        doc,
        writer,
        acroform,
        registry,
        placements: Vec::new(),
        warnings: Vec::new(),
        acroform_touched: false,
    };
    filler.place_all(&resolved)?;
    let (bytes, placements, warnings) = filler.finish()?;

    tracing::info!(
        registry = %registry.version,
        placements = placements.len(),
        warnings = warnings.len(),
        bytes = bytes.len(),
        "Filled W-9"
    );

    Ok(FilledDocument {
        bytes,
        placements,
        warnings,
        display_name: resolved.display_name,
        registry_version: registry.version.clone(),
    })
}

#[derive(Clone, Copy)]
enum FieldAction {
    Text,
    Check,
}

struct Filler<'r> {
    doc: Document,
    writer: PageWriter,
    acroform: Option<AcroFormIndex>,
    registry: &'r FieldRegistry,
    placements: Vec<Placement>,
    warnings: Vec<FieldPlacementWarning>,
    acroform_touched: bool,
}

impl<'r> Filler<'r> {
    fn place_all(&mut self, form: &ResolvedForm) -> Result<()> {
        self.text(TextField::Name, Some(form.line1.as_str()))?;
        self.text(TextField::BusinessName, form.line2.as_deref())?;

        if let Some(mark) = &form.classification {
            let registry = self.registry;
            match registry.classification_slot(mark.classification) {
                Some(slot) => {
                    self.place(
                        "taxClassification",
                        slot,
                        "X",
                        mark.classification.label(),
                        FieldAction::Check,
                    )?;
                }
                None => self.warn(
                    "taxClassification",
                    WarningKind::MissingSlot,
                    format!("no slot for {}", mark.classification.label()),
                ),
            }
            self.text(
                TextField::LlcClassification,
                mark.llc_class.map(|c| c.letter()),
            )?;
            self.text(TextField::OtherDescription, mark.other_description.as_deref())?;
        }

        self.text(TextField::ExemptPayeeCode, form.exempt_payee_code.as_deref())?;
        self.text(TextField::FatcaCode, form.fatca_code.as_deref())?;
        self.text(TextField::Address, Some(form.address.street.as_str()))?;
        self.text(TextField::CityStateZip, Some(form.address.city_state_zip.as_str()))?;
        self.text(
            TextField::RequesterNameAddress,
            form.requester_name_address.as_deref(),
        )?;
        self.text(TextField::AccountNumbers, form.account_numbers.as_deref())?;

        if let Some(ssn) = form.tin.ssn() {
            self.tin(ssn)?;
        }
        if let Some(ein) = form.tin.ein() {
            self.tin(ein)?;
        }

        if let Some(signature) = &form.signature {
            self.signature(signature)?;
        }
        let date = form.signature_date.map(format_signature_date);
        self.text(TextField::SignatureDate, date.as_deref())?;

        Ok(())
    }

    fn text(&mut self, field: TextField, value: Option<&str>) -> Result<()> {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(());
        };
        let registry = self.registry;
        match registry.text_slot(field) {
            Some(slot) => self.place(field.key(), slot, value, value, FieldAction::Text),
            None => {
                self.warn(field.key(), WarningKind::MissingSlot, "no slot in registry");
                Ok(())
            }
        }
    }

    fn place(
        &mut self,
        key: &str,
        slot: &Slot,
        value: &str,
        logged: &str,
        action: FieldAction,
    ) -> Result<()> {
        match slot {
            Slot::At(anchor) => {
                self.draw(key, anchor, value);
                self.record(
                    key,
                    logged,
                    PlacementTarget::Coordinates {
                        x: anchor.x,
                        y: anchor.y,
                    },
                );
                Ok(())
            }
            Slot::Named { candidates } => self.place_named(key, candidates, value, logged, action),
        }
    }

    fn place_named(
        &mut self,
        key: &str,
        candidates: &[String],
        value: &str,
        logged: &str,
        action: FieldAction,
    ) -> Result<()> {
        let found = self.acroform.as_ref().and_then(|index| index.find(candidates));
        let Some((name, id)) = found else {
            let message = if self.acroform.is_none() {
                "template has no AcroForm".to_string()
            } else {
                format!("field not found (tried {})", candidates.join(", "))
            };
            self.warn(key, WarningKind::FieldNotFound, message);
            return Ok(());
        };

        match action {
            FieldAction::Text => acroform::set_text(&mut self.doc, id, value)?,
            FieldAction::Check => acroform::check(&mut self.doc, id)?,
        }
        self.acroform_touched = true;
        self.record(
            key,
            logged,
            PlacementTarget::Field {
                name: name.to_string(),
            },
        );
        Ok(())
    }

    fn tin(&mut self, digits: &TinDigits) -> Result<()> {
        let key = match digits.kind() {
            TinKind::Ssn => "ssn",
            TinKind::Ein => "ein",
        };
        let registry = self.registry;
        let slot = registry.tin_slot(digits.kind());
        let runs = digits.split(&slot.group_lengths());

        match slot {
            TinSlot::Digits { y, size, groups } => {
                for (i, (group, run)) in groups.iter().zip(runs).enumerate() {
                    for (j, digit) in run.iter().enumerate() {
                        let x = group.x + j as f32 * group.pitch;
                        let text = char::from(b'0' + digit).to_string();
                        self.writer.text_at(x, *y, *size, FontWeight::Regular, &text);
                    }
                    self.record(
                        &format!("{}[{}]", key, i),
                        &"*".repeat(run.len()),
                        PlacementTarget::Coordinates { x: group.x, y: *y },
                    );
                }
            }
            TinSlot::Named { groups } => {
                for (i, (group, run)) in groups.iter().zip(runs).enumerate() {
                    let value = digits_to_string(run);
                    self.place_named(
                        &format!("{}[{}]", key, i),
                        &group.candidates,
                        &value,
                        &"*".repeat(run.len()),
                        FieldAction::Text,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn signature(&mut self, signature: &ResolvedSignature) -> Result<()> {
        let slot = self.registry.signature;
        let target = PlacementTarget::Coordinates {
            x: slot.text.x,
            y: slot.text.y,
        };

        let data = match signature {
            ResolvedSignature::Typed(text) => {
                self.draw("signature", &slot.text, text);
                self.record("signature", text, target);
                return Ok(());
            }
            ResolvedSignature::Drawn(data) => data,
        };

        let embedded = SignatureImage::decode(data)
            .map_err(|e| e.to_string())
            .and_then(|image| {
                image
                    .embed(&mut self.doc)
                    .map(|id| (image, id))
                    .map_err(|e| e.to_string())
            });

        match embedded {
            Ok((image, id)) => {
                let (width, height) = image.fit(slot.max_width, slot.max_height);
                self.writer.image(id, slot.x, slot.y, width, height);
                self.record(
                    "signature",
                    &format!("[image {:.0}x{:.0}]", width, height),
                    PlacementTarget::Coordinates {
                        x: slot.x,
                        y: slot.y,
                    },
                );
            }
            Err(reason) => {
                self.warn("signature", WarningKind::SignatureImage, reason);
                self.writer.text(&slot.text, SIGNATURE_PLACEHOLDER);
                self.record("signature", SIGNATURE_PLACEHOLDER, target);
            }
        }
        Ok(())
    }

    fn draw(&mut self, key: &str, anchor: &TextAnchor, value: &str) {
        let replaced = self.writer.text(anchor, value);
        if replaced > 0 {
            self.warn(
                key,
                WarningKind::UnencodableText,
                format!("{} character(s) outside WinAnsi drawn as '?'", replaced),
            );
        }
    }

    fn record(&mut self, field: &str, value: &str, target: PlacementTarget) {
        tracing::debug!(field, target = ?target, "Placed value");
        self.placements.push(Placement {
            field: field.to_string(),
            value: value.to_string(),
            target,
        });
    }

    fn warn(&mut self, field: &str, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(field, kind = ?kind, %message, "Skipped form value");
        self.warnings.push(FieldPlacementWarning {
            field: field.to_string(),
            kind,
            message,
        });
    }

    fn finish(self) -> Result<(Vec<u8>, Vec<Placement>, Vec<FieldPlacementWarning>)> {
        let Filler {
            mut doc,
            writer,
            placements,
            warnings,
            acroform_touched,
            ..
        } = self;

        writer.finish(&mut doc)?;
        if acroform_touched {
            acroform::set_need_appearances(&mut doc)?;
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).map_err(|e| Error::Serialization {
            reason: e.to_string(),
        })?;
        Ok((bytes, placements, warnings))
    }
}
