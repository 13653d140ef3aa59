//! Field-placement registry
//!
//! Maps every logical W-9 value onto the template: either a text anchor in
//! page coordinates or an ordered list of AcroForm field names. Registries are
//! plain JSON so a new form revision can ship without a code change.

use crate::error::{Error, Result};
use crate::form::{TaxClassification, TinKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default font size for placed text
pub const DEFAULT_FONT_SIZE: f32 = 10.0;

/// Total digits in an SSN or EIN
pub const TIN_DIGITS: usize = 9;

/// Built-in registry names
pub const PRESET_NAMES: [&str; 2] = ["coordinates-2024", "acroform-2024"];

/// Logical text values on the form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextField {
    /// Line 1
    Name,
    /// Line 2
    BusinessName,
    /// Tax classification letter next to the LLC box
    LlcClassification,
    /// Description next to the "Other" box
    OtherDescription,
    ExemptPayeeCode,
    FatcaCode,
    /// Line 5
    Address,
    /// Line 6
    CityStateZip,
    RequesterNameAddress,
    /// Line 7
    AccountNumbers,
    SignatureDate,
}

impl TextField {
    pub fn key(&self) -> &'static str {
        match self {
            TextField::Name => "name",
            TextField::BusinessName => "businessName",
            TextField::LlcClassification => "llcClassification",
            TextField::OtherDescription => "otherDescription",
            TextField::ExemptPayeeCode => "exemptPayeeCode",
            TextField::FatcaCode => "fatcaCode",
            TextField::Address => "address",
            TextField::CityStateZip => "cityStateZip",
            TextField::RequesterNameAddress => "requesterNameAddress",
            TextField::AccountNumbers => "accountNumbers",
            TextField::SignatureDate => "signatureDate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Regular,
    Bold,
}

/// Text position with y measured down from the top edge of the page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnchor {
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_font_size")]
    pub size: f32,
    #[serde(default)]
    pub weight: FontWeight,
}

fn default_font_size() -> f32 {
    DEFAULT_FONT_SIZE
}

impl TextAnchor {
    pub const fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: DEFAULT_FONT_SIZE,
            weight: FontWeight::Regular,
        }
    }

    pub const fn sized(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub const fn bold(mut self) -> Self {
        self.weight = FontWeight::Bold;
        self
    }
}

/// Where one value goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Slot {
    /// Draw text at a fixed position
    At(TextAnchor),
    /// Fill the first AcroForm field that exists, matched by full or leaf name
    Named { candidates: Vec<String> },
}

impl Slot {
    fn named(candidates: Vec<String>) -> Self {
        Slot::Named { candidates }
    }
}

/// Consecutive digit boxes drawn one character at a time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DigitGroup {
    pub x: f32,
    pub pitch: f32,
    pub len: usize,
}

/// One AcroForm field holding a run of TIN digits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedGroup {
    pub candidates: Vec<String>,
    pub len: usize,
}

/// Placement of a nine-digit TIN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TinSlot {
    Digits {
        y: f32,
        #[serde(default = "default_font_size")]
        size: f32,
        groups: Vec<DigitGroup>,
    },
    Named {
        groups: Vec<NamedGroup>,
    },
}

impl TinSlot {
    pub fn group_lengths(&self) -> Vec<usize> {
        match self {
            TinSlot::Digits { groups, .. } => groups.iter().map(|g| g.len).collect(),
            TinSlot::Named { groups } => groups.iter().map(|g| g.len).collect(),
        }
    }
}

/// Certification signature box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSlot {
    /// Left edge of the image
    pub x: f32,
    /// Image baseline, measured from the top of the page
    pub y: f32,
    pub max_width: f32,
    pub max_height: f32,
    /// Typed signatures and the fallback placeholder go here
    pub text: TextAnchor,
}

/// How a registry addresses the template, for display only. Slots decide
/// placement individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    Coordinates,
    AcroForm,
    Mixed,
}

/// Complete placement table for one template revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRegistry {
    pub version: String,
    pub mode: PlacementMode,
    pub text: BTreeMap<TextField, Slot>,
    pub classification: BTreeMap<TaxClassification, Slot>,
    pub ssn: TinSlot,
    pub ein: TinSlot,
    pub signature: SignatureSlot,
}

const CHECK_Y: f32 = 182.0;
const SIGNATURE: SignatureSlot = SignatureSlot {
    x: 75.0,
    y: 740.0,
    max_width: 180.0,
    max_height: 30.0,
    text: TextAnchor::new(75.0, 733.0).sized(12.0),
};
const SIGNATURE_DATE: TextAnchor = TextAnchor::new(470.0, 733.0);

impl FieldRegistry {
    /// Coordinate layout of the March 2024 IRS W-9
    pub fn coordinates_2024() -> Self {
        let text = BTreeMap::from([
            (TextField::Name, Slot::At(TextAnchor::new(45.0, 119.0))),
            (TextField::BusinessName, Slot::At(TextAnchor::new(45.0, 145.0))),
            (TextField::LlcClassification, Slot::At(TextAnchor::new(385.0, 197.0))),
            (TextField::OtherDescription, Slot::At(TextAnchor::new(115.0, 232.0))),
            (TextField::ExemptPayeeCode, Slot::At(TextAnchor::new(518.0, 165.0))),
            (TextField::FatcaCode, Slot::At(TextAnchor::new(518.0, 209.0))),
            (TextField::Address, Slot::At(TextAnchor::new(45.0, 278.0))),
            (TextField::CityStateZip, Slot::At(TextAnchor::new(45.0, 303.0))),
            (TextField::RequesterNameAddress, Slot::At(TextAnchor::new(380.0, 278.0))),
            (TextField::AccountNumbers, Slot::At(TextAnchor::new(45.0, 328.0))),
            (TextField::SignatureDate, Slot::At(SIGNATURE_DATE)),
        ]);

        let check = |x: f32, y: f32| Slot::At(TextAnchor::new(x, y).sized(12.0).bold());
        let classification = BTreeMap::from([
            (TaxClassification::Individual, check(36.0, CHECK_Y)),
            (TaxClassification::CCorporation, check(154.0, CHECK_Y)),
            (TaxClassification::SCorporation, check(229.0, CHECK_Y)),
            (TaxClassification::Partnership, check(304.0, CHECK_Y)),
            (TaxClassification::TrustEstate, check(365.0, CHECK_Y)),
            (TaxClassification::Llc, check(36.0, 197.0)),
            (TaxClassification::Other, check(36.0, 232.0)),
        ]);

        let group = |x: f32, len: usize| DigitGroup { x, pitch: 12.0, len };
        Self {
            version: "coordinates-2024".to_string(),
            mode: PlacementMode::Coordinates,
            text,
            classification,
            ssn: TinSlot::Digits {
                y: 361.0,
                size: DEFAULT_FONT_SIZE,
                groups: vec![group(512.0, 3), group(555.0, 2), group(586.0, 4)],
            },
            ein: TinSlot::Digits {
                y: 398.0,
                size: DEFAULT_FONT_SIZE,
                groups: vec![group(512.0, 2), group(543.0, 7)],
            },
            signature: SIGNATURE,
        }
    }

    /// AcroForm field names of the fillable March 2024 IRS W-9. The form has
    /// no signature or date fields, so those stay at coordinates.
    pub fn acroform_2024() -> Self {
        let text = BTreeMap::from([
            (TextField::Name, Slot::named(irs_text("f1_01", ""))),
            (TextField::BusinessName, Slot::named(irs_text("f1_02", ""))),
            (
                TextField::LlcClassification,
                Slot::named(irs_text("f1_03", "Boxes3a-b_ReadOrder[0].")),
            ),
            (
                TextField::OtherDescription,
                Slot::named(irs_text("f1_04", "Boxes3a-b_ReadOrder[0].")),
            ),
            (TextField::ExemptPayeeCode, Slot::named(irs_text("f1_05", ""))),
            (TextField::FatcaCode, Slot::named(irs_text("f1_06", ""))),
            (
                TextField::Address,
                Slot::named(irs_text("f1_07", "Address_ReadOrder[0].")),
            ),
            (
                TextField::CityStateZip,
                Slot::named(irs_text("f1_08", "Address_ReadOrder[0].")),
            ),
            (TextField::RequesterNameAddress, Slot::named(irs_text("f1_09", ""))),
            (TextField::AccountNumbers, Slot::named(irs_text("f1_10", ""))),
            (TextField::SignatureDate, Slot::At(SIGNATURE_DATE)),
        ]);

        let classification = TaxClassification::ALL
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let leaf = format!("c1_1[{}]", i);
                let full = format!("topmostSubform[0].Page1[0].Boxes3a-b_ReadOrder[0].{}", leaf);
                (*c, Slot::Named { candidates: vec![full, leaf] })
            })
            .collect();

        let tin_group = |name: &str, len: usize| NamedGroup {
            candidates: irs_text(name, ""),
            len,
        };
        Self {
            version: "acroform-2024".to_string(),
            mode: PlacementMode::AcroForm,
            text,
            classification,
            ssn: TinSlot::Named {
                groups: vec![
                    tin_group("f1_11", 3),
                    tin_group("f1_12", 2),
                    tin_group("f1_13", 4),
                ],
            },
            ein: TinSlot::Named {
                groups: vec![tin_group("f1_14", 2), tin_group("f1_15", 7)],
            },
            signature: SIGNATURE,
        }
    }

    /// Look up a built-in registry by name
    pub fn preset(name: &str) -> Result<Self> {
        match name.trim() {
            "coordinates-2024" | "coordinates" => Ok(Self::coordinates_2024()),
            "acroform-2024" | "acroform" => Ok(Self::acroform_2024()),
            other => Err(Error::Registry {
                reason: format!(
                    "unknown preset '{}' (available: {})",
                    other,
                    PRESET_NAMES.join(", ")
                ),
            }),
        }
    }

    /// Parse and check a JSON registry
    pub fn from_json(json: &str) -> Result<Self> {
        let registry: Self = serde_json::from_str(json).map_err(|e| Error::Registry {
            reason: e.to_string(),
        })?;
        registry.validate()?;
        Ok(registry)
    }

    /// Read a JSON registry from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::Registry {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        for (kind, slot) in [(TinKind::Ssn, &self.ssn), (TinKind::Ein, &self.ein)] {
            let lengths = slot.group_lengths();
            let total: usize = lengths.iter().sum();
            if total != TIN_DIGITS {
                return Err(Error::Registry {
                    reason: format!(
                        "{:?} digit groups {:?} sum to {}, expected {}",
                        kind, lengths, total, TIN_DIGITS
                    ),
                });
            }
        }

        let empty_candidates = self
            .text
            .values()
            .chain(self.classification.values())
            .any(|slot| matches!(slot, Slot::Named { candidates } if candidates.is_empty()));
        let empty_tin_candidates = [&self.ssn, &self.ein].into_iter().any(|slot| {
            matches!(slot, TinSlot::Named { groups } if groups.iter().any(|g| g.candidates.is_empty()))
        });
        if empty_candidates || empty_tin_candidates {
            return Err(Error::Registry {
                reason: "named slot without candidates".to_string(),
            });
        }

        if self.signature.max_width <= 0.0 || self.signature.max_height <= 0.0 {
            return Err(Error::Registry {
                reason: "signature box must have a positive size".to_string(),
            });
        }

        Ok(())
    }

    pub fn text_slot(&self, field: TextField) -> Option<&Slot> {
        self.text.get(&field)
    }

    pub fn classification_slot(&self, classification: TaxClassification) -> Option<&Slot> {
        self.classification.get(&classification)
    }

    pub fn tin_slot(&self, kind: TinKind) -> &TinSlot {
        match kind {
            TinKind::Ssn => &self.ssn,
            TinKind::Ein => &self.ein,
        }
    }

    /// Whether any slot needs the template's AcroForm
    pub fn uses_named_fields(&self) -> bool {
        self.text
            .values()
            .chain(self.classification.values())
            .any(|slot| matches!(slot, Slot::Named { .. }))
            || matches!(self.ssn, TinSlot::Named { .. })
            || matches!(self.ein, TinSlot::Named { .. })
    }
}

/// Fully qualified and leaf name of an IRS page-one text field
fn irs_text(field: &str, container: &str) -> Vec<String> {
    vec![
        format!("topmostSubform[0].Page1[0].{}{}[0]", container, field),
        format!("{}[0]", field),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::coordinates(FieldRegistry::coordinates_2024())]
    #[case::acroform(FieldRegistry::acroform_2024())]
    fn test_presets_are_valid(#[case] registry: FieldRegistry) {
        registry.validate().unwrap();
        assert_eq!(registry.ssn.group_lengths(), vec![3, 2, 4]);
        assert_eq!(registry.ein.group_lengths(), vec![2, 7]);
        for c in TaxClassification::ALL {
            assert!(registry.classification_slot(c).is_some(), "{:?}", c);
        }
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(FieldRegistry::preset("acroform").unwrap().version, "acroform-2024");
        assert!(matches!(
            FieldRegistry::preset("1999"),
            Err(Error::Registry { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_preset() {
        let registry = FieldRegistry::acroform_2024();
        let parsed = FieldRegistry::from_json(&registry.to_json().unwrap()).unwrap();
        assert_eq!(parsed, registry);
    }

    #[test]
    fn test_rejects_digit_groups_not_summing_to_nine() {
        let mut registry = FieldRegistry::coordinates_2024();
        registry.ssn = TinSlot::Digits {
            y: 361.0,
            size: 10.0,
            groups: vec![DigitGroup { x: 512.0, pitch: 12.0, len: 3 }],
        };
        let err = FieldRegistry::from_json(&registry.to_json().unwrap()).unwrap_err();
        assert!(err.to_string().contains("sum to 3"));
    }

    #[test]
    fn test_rejects_named_slot_without_candidates() {
        let mut registry = FieldRegistry::acroform_2024();
        registry
            .text
            .insert(TextField::Name, Slot::Named { candidates: vec![] });
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_anchor_defaults_from_json() {
        let slot: Slot = serde_json::from_str(r#"{"kind":"at","x":45,"y":119}"#).unwrap();
        assert_eq!(slot, Slot::At(TextAnchor::new(45.0, 119.0)));
    }

    #[test]
    fn test_acroform_keeps_signature_date_at_coordinates() {
        let registry = FieldRegistry::acroform_2024();
        assert!(registry.uses_named_fields());
        assert!(matches!(
            registry.text_slot(TextField::SignatureDate),
            Some(Slot::At(_))
        ));
        assert!(!FieldRegistry::coordinates_2024().uses_named_fields());
    }
}
