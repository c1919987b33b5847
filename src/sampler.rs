//! Pixel sampler: decodes image bytes into the read-only buffer every stage
//! samples from.

use image::{GrayImage, RgbaImage};
use sha2::{Digest, Sha256};

use crate::error::PerceptionError;

/// Decoded RGBA pixels plus facts about the original bytes.
///
/// Stages only ever borrow this immutably, so several of them can read it at
/// the same time.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    rgba: RgbaImage,
    byte_size: usize,
    hash: String,
}

impl PixelBuffer {
    /// Decodes any raster format the `image` crate supports.
    pub fn decode(bytes: &[u8]) -> Result<Self, PerceptionError> {
        let img = image::load_from_memory(bytes)?;
        let rgba = img.to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(PerceptionError::Decode("image has zero width or height".to_string()));
        }
        Ok(Self {
            rgba,
            byte_size: bytes.len(),
            hash: sha256_hex(bytes),
        })
    }

    /// Wraps already-decoded pixels. Size and hash describe the raw pixel data.
    pub fn from_rgba(rgba: RgbaImage) -> Self {
        let raw = rgba.as_raw();
        Self {
            byte_size: raw.len(),
            hash: sha256_hex(raw),
            rgba,
        }
    }

    pub fn rgba(&self) -> &RgbaImage {
        &self.rgba
    }

    /// Luma view of the buffer (ITU-R BT.601 weights, as `image` computes it).
    pub fn gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.rgba)
    }

    pub fn width(&self) -> u32 {
        self.rgba.width()
    }

    pub fn height(&self) -> u32 {
        self.rgba.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgba.dimensions()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// `sha256-<hex>` of the input bytes.
    pub fn content_hash(&self) -> &str {
        &self.hash
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256-{}", hex)
}
