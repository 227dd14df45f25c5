//! Bitmap snapshots captured from a rendering surface

use base64::Engine as Base64Engine;
use sha2::{Digest, Sha256};

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// A captured bitmap: PNG bytes plus the surface size it was taken at
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Width in CSS pixels of the captured surface
    pub width: f64,
    /// Height in CSS pixels of the captured surface
    pub height: f64,
    pub png_data: Vec<u8>,
}

impl Snapshot {
    pub fn new(width: f64, height: f64, png_data: Vec<u8>) -> Self {
        Self { width, height, png_data }
    }

    pub fn is_png(&self) -> bool {
        self.png_data.starts_with(PNG_SIGNATURE)
    }

    /// Pixel dimensions read from the PNG IHDR chunk. These differ from
    /// `width`/`height` when the surface renders at a device scale factor.
    pub fn pixel_size(&self) -> Option<(u32, u32)> {
        if !self.is_png() || self.png_data.len() < 24 || &self.png_data[12..16] != b"IHDR" {
            return None;
        }
        let w = u32::from_be_bytes([self.png_data[16], self.png_data[17], self.png_data[18], self.png_data[19]]);
        let h = u32::from_be_bytes([self.png_data[20], self.png_data[21], self.png_data[22], self.png_data[23]]);
        Some((w, h))
    }

    /// Hex SHA-256 of the PNG bytes, for golden comparisons
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.png_data))
    }

    /// `data:` URL suitable for embedding in an `<img>` tag
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png_data)
        )
    }
}
