//! AcroForm field lookup and value writing

use super::content::resolve;
use crate::error::{Error, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::BTreeMap;

/// Nesting limit for the field tree
const MAX_DEPTH: usize = 32;

/// Terminal fields of a template by fully qualified and by leaf name
#[derive(Debug, Clone, Default)]
pub struct AcroFormIndex {
    full: BTreeMap<String, ObjectId>,
    leaf: BTreeMap<String, ObjectId>,
}

impl AcroFormIndex {
    /// Index the document's form fields. `None` when there is no AcroForm.
    pub fn build(doc: &Document) -> Option<Self> {
        let acro_form = acro_form_dict(doc)?;
        let fields = resolve(doc, acro_form.get(b"Fields").ok()?)
            .ok()?
            .as_array()
            .ok()?;

        let mut index = Self::default();
        for field in fields {
            if let Ok(id) = field.as_reference() {
                index.visit(doc, id, None, 0);
            }
        }
        Some(index)
    }

    fn visit(&mut self, doc: &Document, id: ObjectId, parent: Option<&str>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        let Ok(dict) = doc.get_object(id).and_then(|o| o.as_dict()) else {
            return;
        };

        let partial = dict.get(b"T").ok().and_then(|t| decode_text(resolve(doc, t).ok()?));
        let full_name = match (parent, partial.as_deref()) {
            (Some(p), Some(t)) => Some(format!("{}.{}", p, t)),
            (None, Some(t)) => Some(t.to_string()),
            (p, None) => p.map(str::to_string),
        };

        let kids: Vec<ObjectId> = dict
            .get(b"Kids")
            .ok()
            .and_then(|k| resolve(doc, k).ok())
            .and_then(|k| k.as_array().ok())
            .map(|k| k.iter().filter_map(|o| o.as_reference().ok()).collect())
            .unwrap_or_default();

        let named_kids: Vec<ObjectId> = kids
            .iter()
            .copied()
            .filter(|kid| {
                doc.get_object(*kid)
                    .and_then(|o| o.as_dict())
                    .map(|d| d.has(b"T"))
                    .unwrap_or(false)
            })
            .collect();

        if named_kids.is_empty() {
            if let (Some(full), Some(leaf)) = (full_name, partial) {
                self.full.entry(full).or_insert(id);
                self.leaf.entry(leaf).or_insert(id);
            }
            return;
        }

        for kid in named_kids {
            self.visit(doc, kid, full_name.as_deref(), depth + 1);
        }
    }

    /// First candidate present in the template, matched on the fully
    /// qualified name before the leaf name
    pub fn find<'a>(&self, candidates: &'a [String]) -> Option<(&'a str, ObjectId)> {
        candidates.iter().find_map(|candidate| {
            self.full
                .get(candidate)
                .or_else(|| self.leaf.get(candidate))
                .map(|id| (candidate.as_str(), *id))
        })
    }

    pub fn len(&self) -> usize {
        self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }

    /// Fully qualified names of every terminal field
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.full.keys().map(String::as_str)
    }
}

/// Set a text field's value and drop its cached appearance so viewers
/// regenerate it
pub fn set_text(doc: &mut Document, field: ObjectId, value: &str) -> Result<()> {
    let widgets = widget_ids(doc, field);
    field_dict_mut(doc, field)?.set("V", Object::String(encode_text(value), StringFormat::Literal));
    for widget in widgets {
        field_dict_mut(doc, widget)?.remove(b"AP");
    }
    Ok(())
}

/// Turn a checkbox on, using the on-state name its appearance declares
pub fn check(doc: &mut Document, field: ObjectId) -> Result<()> {
    let widgets = widget_ids(doc, field);
    let on_state = widgets
        .iter()
        .find_map(|w| on_state_name(doc, *w))
        .unwrap_or_else(|| b"Yes".to_vec());

    field_dict_mut(doc, field)?.set("V", Object::Name(on_state.clone()));
    for widget in widgets {
        let state = match on_state_name(doc, widget) {
            Some(name) if name == on_state => on_state.clone(),
            Some(_) => b"Off".to_vec(),
            None => on_state.clone(),
        };
        field_dict_mut(doc, widget)?.set("AS", Object::Name(state));
    }
    Ok(())
}

/// Ask viewers to rebuild appearance streams for edited fields
pub fn set_need_appearances(doc: &mut Document) -> Result<()> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(|r| r.as_reference())
        .map_err(|e| Error::InvalidPdf {
            reason: format!("document has no catalog: {}", e),
        })?;

    let acro_ref = doc
        .get_object(root_id)
        .and_then(|o| o.as_dict())
        .and_then(|c| c.get(b"AcroForm"))
        .ok()
        .and_then(|a| a.as_reference().ok());

    let target = acro_ref.unwrap_or(root_id);
    let dict = field_dict_mut(doc, target)?;
    let dict = if acro_ref.is_some() {
        dict
    } else {
        match dict.get_mut(b"AcroForm") {
            Ok(Object::Dictionary(acro_form)) => acro_form,
            _ => {
                return Err(Error::InvalidPdf {
                    reason: "document has no AcroForm".to_string(),
                })
            }
        }
    };
    dict.set("NeedAppearances", Object::Boolean(true));
    Ok(())
}

fn acro_form_dict(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    let catalog = resolve(doc, root).ok()?.as_dict().ok()?;
    resolve(doc, catalog.get(b"AcroForm").ok()?)
        .ok()?
        .as_dict()
        .ok()
}

fn field_dict_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Dictionary> {
    doc.get_object_mut(id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| Error::InvalidPdf {
            reason: format!("form object {:?} unavailable: {}", id, e),
        })
}

/// Widget annotations of a terminal field: the field itself when merged,
/// otherwise its unnamed kids
fn widget_ids(doc: &Document, field: ObjectId) -> Vec<ObjectId> {
    let Ok(dict) = doc.get_object(field).and_then(|o| o.as_dict()) else {
        return Vec::new();
    };

    let kids: Vec<ObjectId> = dict
        .get(b"Kids")
        .ok()
        .and_then(|k| resolve(doc, k).ok())
        .and_then(|k| k.as_array().ok())
        .map(|k| k.iter().filter_map(|o| o.as_reference().ok()).collect())
        .unwrap_or_default();

    if kids.is_empty() {
        vec![field]
    } else {
        kids
    }
}

fn on_state_name(doc: &Document, widget: ObjectId) -> Option<Vec<u8>> {
    let dict = doc.get_object(widget).ok()?.as_dict().ok()?;
    let ap = resolve(doc, dict.get(b"AP").ok()?).ok()?.as_dict().ok()?;
    let normal = resolve(doc, ap.get(b"N").ok()?).ok()?.as_dict().ok()?;
    normal
        .iter()
        .map(|(name, _)| name)
        .find(|name| name.as_slice() != b"Off")
        .cloned()
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise byte-per-char)
fn decode_text(obj: &Object) -> Option<String> {
    let Object::String(bytes, _) = obj else {
        return None;
    };
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units).ok();
    }
    Some(bytes.iter().map(|&b| char::from(b)).collect())
}

/// Encode a value as a PDF text string
fn encode_text(value: &str) -> Vec<u8> {
    if value.chars().all(|c| (c as u32) < 0x80) {
        return value.as_bytes().to_vec();
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// One page with a `form` parent holding `name` (text) and `box` (checkbox)
    fn form_doc() -> (Document, ObjectId, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let on = doc.add_object(lopdf::Stream::new(Dictionary::new(), Vec::new()));
        let parent_id = doc.new_object_id();
        let text_id = doc.add_object(dictionary! {
            "FT" => "Tx",
            "T" => Object::string_literal("name[0]"),
            "Parent" => parent_id,
            "Subtype" => "Widget",
            "AP" => dictionary! { "N" => on },
        });
        let box_id = doc.add_object(dictionary! {
            "FT" => "Btn",
            "T" => Object::string_literal("box[0]"),
            "Parent" => parent_id,
            "Subtype" => "Widget",
            "AP" => dictionary! { "N" => dictionary! { "1" => on, "Off" => on } },
        });
        doc.objects.insert(
            parent_id,
            Object::Dictionary(dictionary! {
                "T" => Object::string_literal("form[0]"),
                "Kids" => vec![text_id.into(), box_id.into()],
            }),
        );
        let acro_id = doc.add_object(dictionary! {
            "Fields" => vec![parent_id.into()],
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "AcroForm" => acro_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, text_id, box_id)
    }

    #[test]
    fn test_index_full_and_leaf_names() {
        let (doc, text_id, _) = form_doc();
        let index = AcroFormIndex::build(&doc).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.names().collect::<Vec<_>>(),
            vec!["form[0].box[0]", "form[0].name[0]"]
        );

        let candidates = vec!["missing".to_string(), "name[0]".to_string()];
        assert_eq!(index.find(&candidates), Some(("name[0]", text_id)));
        assert_eq!(index.find(&["nope".to_string()]), None);
    }

    #[test]
    fn test_no_acroform() {
        let mut doc = Document::with_version("1.7");
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog" });
        doc.trailer.set("Root", catalog_id);
        assert!(AcroFormIndex::build(&doc).is_none());
        assert!(set_need_appearances(&mut doc).is_err());
    }

    #[test]
    fn test_set_text_drops_appearance() {
        let (mut doc, text_id, _) = form_doc();
        set_text(&mut doc, text_id, "Pat Doe").unwrap();
        let dict = doc.get_object(text_id).unwrap().as_dict().unwrap();
        assert!(matches!(dict.get(b"V"), Ok(Object::String(v, _)) if v == b"Pat Doe"));
        assert!(!dict.has(b"AP"));
    }

    #[test]
    fn test_check_uses_declared_on_state() {
        let (mut doc, _, box_id) = form_doc();
        check(&mut doc, box_id).unwrap();
        let dict = doc.get_object(box_id).unwrap().as_dict().unwrap();
        assert!(matches!(dict.get(b"V"), Ok(Object::Name(n)) if n == b"1"));
        assert!(matches!(dict.get(b"AS"), Ok(Object::Name(n)) if n == b"1"));
    }

    #[test]
    fn test_need_appearances_on_referenced_acroform() {
        let (mut doc, _, _) = form_doc();
        set_need_appearances(&mut doc).unwrap();
        let acro = acro_form_dict(&doc).unwrap();
        assert!(matches!(acro.get(b"NeedAppearances"), Ok(Object::Boolean(true))));
    }

    #[test]
    fn test_text_string_encoding() {
        assert_eq!(encode_text("Pat"), b"Pat".to_vec());
        let encoded = encode_text("José");
        assert_eq!(&encoded[..2], &[0xFE, 0xFF]);
        assert_eq!(
            decode_text(&Object::String(encoded, StringFormat::Hexadecimal)).as_deref(),
            Some("José")
        );
    }
}
