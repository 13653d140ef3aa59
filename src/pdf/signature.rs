//! Drawn signature decoding and embedding

use crate::error::{Error, Result};
use base64::Engine;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use thiserror::Error as ThisError;

/// Text drawn in place of a signature image that could not be used
pub const SIGNATURE_PLACEHOLDER: &str = "[Signature on file]";

/// A drawn signature that cannot be placed. Never fatal: the fill carries on
/// with [`SIGNATURE_PLACEHOLDER`].
#[derive(ThisError, Debug)]
pub enum ImageDecodeError {
    #[error("signature is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("signature image could not be decoded: {0}")]
    Image(#[from] image::ImageError),

    #[error("signature image has no pixels")]
    Empty,
}

/// Decoded signature raster, split into colour and alpha planes
#[derive(Debug, Clone)]
pub struct SignatureImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl SignatureImage {
    /// Decode a `data:image/...;base64,` URL or bare base64 payload
    pub fn decode(data: &str) -> std::result::Result<Self, ImageDecodeError> {
        let payload = match data.trim().strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, b64)| b64).unwrap_or(""),
            None => data.trim(),
        };
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
        let decoded = image::load_from_memory(&bytes)?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(ImageDecodeError::Empty);
        }

        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in rgba.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }
        let opaque = alpha.iter().all(|a| *a == u8::MAX);

        Ok(Self {
            width,
            height,
            rgb,
            alpha: (!opaque).then_some(alpha),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// Largest size inside the box that keeps the aspect ratio
    pub fn fit(&self, max_width: f32, max_height: f32) -> (f32, f32) {
        let (w, h) = (self.width as f32, self.height as f32);
        let scale = f32::min(max_width / w, max_height / h);
        (w * scale, h * scale)
    }

    /// Add the image (and its soft mask) to the document as an XObject
    pub fn embed(&self, doc: &mut Document) -> Result<ObjectId> {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => self.width as i64,
            "Height" => self.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };

        if let Some(alpha) = &self.alpha {
            let mask = image_stream(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => self.width as i64,
                    "Height" => self.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                alpha.clone(),
            )?;
            let mask_id = doc.add_object(mask);
            dict.set("SMask", Object::Reference(mask_id));
        }

        let stream = image_stream(dict, self.rgb.clone())?;
        Ok(doc.add_object(stream))
    }
}

fn image_stream(dict: lopdf::Dictionary, data: Vec<u8>) -> Result<Stream> {
    let mut stream = Stream::new(dict, data);
    stream.compress().map_err(|e| Error::Serialization {
        reason: format!("failed to compress signature image: {}", e),
    })?;
    Ok(stream)
}
