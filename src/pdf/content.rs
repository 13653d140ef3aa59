//! Overlay content for a template page
//!
//! Text and images are collected as content-stream operations and appended
//! to the page in one go. The original page content is wrapped in `q`/`Q` so
//! whatever graphics state it leaves behind does not shift the overlay.

use super::registry::{FontWeight, TextAnchor};
use crate::error::{Error, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// US Letter height, used when a page declares no MediaBox anywhere
const LETTER_HEIGHT: f32 = 792.0;

const FONT_REGULAR: &str = "W9Helv";
const FONT_BOLD: &str = "W9HelvB";

/// Collects overlay operations for one page
#[derive(Debug)]
pub struct PageWriter {
    page_id: ObjectId,
    page_top: f32,
    operations: Vec<Operation>,
    images: Vec<(String, ObjectId)>,
    uses_regular: bool,
    uses_bold: bool,
}

impl PageWriter {
    pub fn new(doc: &Document, page_id: ObjectId) -> Result<Self> {
        let page_top = match inherited(doc, page_id, b"MediaBox")? {
            Some(obj) => media_box_top(doc, obj)?,
            None => LETTER_HEIGHT,
        };

        Ok(Self {
            page_id,
            page_top,
            operations: vec![Operation::new("g", vec![0.into()])],
            images: Vec::new(),
            uses_regular: false,
            uses_bold: false,
        })
    }

    /// Top edge of the page in PDF user space
    pub fn page_top(&self) -> f32 {
        self.page_top
    }

    /// Convert a distance from the top edge into a PDF y coordinate
    pub fn to_pdf_y(&self, y_from_top: f32) -> f32 {
        self.page_top - y_from_top
    }

    /// Draw text at an anchor. Returns how many characters were drawn as `?`.
    pub fn text(&mut self, anchor: &TextAnchor, text: &str) -> usize {
        self.text_at(anchor.x, anchor.y, anchor.size, anchor.weight, text)
    }

    pub fn text_at(
        &mut self,
        x: f32,
        y_from_top: f32,
        size: f32,
        weight: FontWeight,
        text: &str,
    ) -> usize {
        let font = match weight {
            FontWeight::Regular => {
                self.uses_regular = true;
                FONT_REGULAR
            }
            FontWeight::Bold => {
                self.uses_bold = true;
                FONT_BOLD
            }
        };
        let y = self.to_pdf_y(y_from_top);
        let (encoded, replaced) = encode_win_ansi(text);

        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(encoded, StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
        replaced
    }

    /// Draw an image XObject with its lower-left corner at `x`, `baseline_from_top`
    pub fn image(
        &mut self,
        xobject: ObjectId,
        x: f32,
        baseline_from_top: f32,
        width: f32,
        height: f32,
    ) {
        let name = format!("W9Img{}", self.images.len());
        let y = self.to_pdf_y(baseline_from_top);

        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]);
        self.images.push((name, xobject));
    }

    /// Whether anything besides the initial colour reset was queued
    pub fn is_empty(&self) -> bool {
        self.operations.len() <= 1
    }

    /// Append the overlay to the page. A writer with nothing queued leaves
    /// the page untouched.
    pub fn finish(self, doc: &mut Document) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut resources = match inherited(doc, self.page_id, b"Resources")? {
            Some(obj) => resolve(doc, obj)?.as_dict().cloned().unwrap_or_default(),
            None => Dictionary::new(),
        };

        let mut fonts = sub_dictionary(doc, &resources, b"Font")?;
        if self.uses_regular {
            let id = doc.add_object(standard_font("Helvetica"));
            fonts.set(FONT_REGULAR, Object::Reference(id));
        }
        if self.uses_bold {
            let id = doc.add_object(standard_font("Helvetica-Bold"));
            fonts.set(FONT_BOLD, Object::Reference(id));
        }
        resources.set("Font", Object::Dictionary(fonts));

        if !self.images.is_empty() {
            let mut xobjects = sub_dictionary(doc, &resources, b"XObject")?;
            for (name, id) in &self.images {
                xobjects.set(name.as_str(), Object::Reference(*id));
            }
            resources.set("XObject", Object::Dictionary(xobjects));
        }

        let overlay = Content {
            operations: self.operations,
        }
        .encode()
        .map_err(|e| Error::Serialization {
            reason: format!("failed to encode overlay: {}", e),
        })?;

        let existing = existing_contents(doc, self.page_id)?;
        let mut contents = Vec::with_capacity(existing.len() + 3);
        if !existing.is_empty() {
            contents.push(Object::Reference(
                doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec())),
            ));
            contents.extend(existing);
            contents.push(Object::Reference(
                doc.add_object(Stream::new(Dictionary::new(), b"Q\n".to_vec())),
            ));
        }
        contents.push(Object::Reference(
            doc.add_object(Stream::new(Dictionary::new(), overlay)),
        ));

        let page = doc
            .get_object_mut(self.page_id)
            .and_then(|o| o.as_dict_mut())
            .map_err(|e| Error::Serialization {
                reason: format!("page dictionary unavailable: {}", e),
            })?;
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Array(contents));

        Ok(())
    }
}

/// WinAnsi byte for one character, `None` when the encoding has no slot for it
pub fn win_ansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        ' '..='~' | '\u{a0}'..='\u{ff}' => c as u32 as u8,
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017d}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203a}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017e}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Encode text for a WinAnsi simple font. Characters the encoding lacks
/// become `?`; the second value counts them.
pub fn encode_win_ansi(text: &str) -> (Vec<u8>, usize) {
    let mut replaced = 0;
    let bytes = text
        .chars()
        .map(|c| {
            win_ansi_byte(c).unwrap_or_else(|| {
                replaced += 1;
                b'?'
            })
        })
        .collect();
    (bytes, replaced)
}

fn standard_font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Follow a reference, or return the object itself
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).map_err(|e| Error::InvalidPdf {
            reason: format!("dangling reference {:?}: {}", id, e),
        }),
        other => Ok(other),
    }
}

/// Look up a page attribute, walking up `/Parent` links when the page does
/// not set it itself
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Result<Option<&'a Object>> {
    let mut current = page_id;
    // Page trees are shallow; the bound only guards against parent cycles.
    for _ in 0..64 {
        let dict = doc
            .get_object(current)
            .and_then(|o| o.as_dict())
            .map_err(|e| Error::InvalidPdf {
                reason: format!("page tree node unavailable: {}", e),
            })?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(value));
        }
        match dict.get(b"Parent").and_then(|p| p.as_reference()) {
            Ok(parent) => current = parent,
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

fn media_box_top(doc: &Document, obj: &Object) -> Result<f32> {
    let array = resolve(doc, obj)?.as_array().map_err(|_| Error::InvalidPdf {
        reason: "MediaBox is not an array".to_string(),
    })?;
    let numbers = array
        .iter()
        .map(|o| match resolve(doc, o)? {
            Object::Integer(i) => Ok(*i as f32),
            Object::Real(r) => Ok(*r),
            other => Err(Error::InvalidPdf {
                reason: format!("MediaBox entry is not a number: {:?}", other),
            }),
        })
        .collect::<Result<Vec<f32>>>()?;

    match numbers.as_slice() {
        [_, y0, _, y1] => Ok(f32::max(*y0, *y1)),
        _ => Err(Error::InvalidPdf {
            reason: format!("MediaBox has {} entries", numbers.len()),
        }),
    }
}

fn sub_dictionary(doc: &Document, resources: &Dictionary, key: &[u8]) -> Result<Dictionary> {
    match resources.get(key) {
        Ok(obj) => Ok(resolve(doc, obj)?.as_dict().cloned().unwrap_or_default()),
        Err(_) => Ok(Dictionary::new()),
    }
}

/// Current `/Contents` of a page as a list of stream references
fn existing_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>> {
    let page = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .map_err(|e| Error::InvalidPdf {
            reason: format!("page dictionary unavailable: {}", e),
        })?;

    Ok(match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_page(media_box: Vec<Object>, contents: Option<&[u8]>) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        };
        if let Some(bytes) = contents {
            let id = doc.add_object(Stream::new(Dictionary::new(), bytes.to_vec()));
            page.set("Contents", id);
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => media_box,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    #[test]
    fn test_page_top_inherited_from_parent() {
        let (doc, page_id) = one_page(vec![0.into(), 0.into(), 612.into(), 792.into()], None);
        let writer = PageWriter::new(&doc, page_id).unwrap();
        assert_eq!(writer.page_top(), 792.0);
        assert_eq!(writer.to_pdf_y(119.0), 673.0);
    }

    #[test]
    fn test_finish_wraps_existing_content() {
        let (mut doc, page_id) = one_page(
            vec![0.into(), 0.into(), 612.into(), 792.into()],
            Some(b"1 0 0 1 50 50 cm"),
        );
        let mut writer = PageWriter::new(&doc, page_id).unwrap();
        writer.text(&TextAnchor::new(45.0, 119.0), "Pat Doe");
        writer.finish(&mut doc).unwrap();

        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 4);

        let content = doc.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&content);
        assert!(text.starts_with("q\n"));
        assert!(text.contains("(Pat Doe) Tj"));

        let fonts = page
            .get(b"Resources")
            .and_then(|r| r.as_dict())
            .and_then(|r| r.get(b"Font"))
            .and_then(|f| f.as_dict())
            .unwrap();
        assert!(fonts.has(FONT_REGULAR.as_bytes()));
        assert!(!fonts.has(FONT_BOLD.as_bytes()));
    }

    #[test]
    fn test_empty_writer_leaves_page_alone() {
        let (mut doc, page_id) = one_page(vec![0.into(), 0.into(), 612.into(), 792.into()], None);
        let writer = PageWriter::new(&doc, page_id).unwrap();
        writer.finish(&mut doc).unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        assert!(!page.has(b"Contents"));
    }

    #[test]
    fn test_encode_win_ansi() {
        assert_eq!(encode_win_ansi("José"), (b"Jos\xe9".to_vec(), 0));
        assert_eq!(encode_win_ansi("Zoë \u{2603}"), (b"Zo\xeb ?".to_vec(), 1));
    }

    #[test]
    fn test_encode_win_ansi_upper_punctuation() {
        assert_eq!(encode_win_ansi("O\u{2019}Neil"), (b"O\x92Neil".to_vec(), 0));
        assert_eq!(
            encode_win_ansi("\u{20ac}5 \u{2013} Acme\u{2122}"),
            (b"\x805 \x96 Acme\x99".to_vec(), 0)
        );
        // 0x81 is unassigned in WinAnsi
        assert_eq!(encode_win_ansi("\u{81}"), (b"?".to_vec(), 1));
        assert_eq!(encode_win_ansi("\u{661}\u{660}"), (b"??".to_vec(), 2));
    }
}
