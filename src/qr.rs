use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::QrCode;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Turns an opaque token string into a scannable image.
pub trait QrRenderer: Send + Sync {
    fn render_png(&self, payload: &str) -> anyhow::Result<Vec<u8>>;
}

/// Grayscale PNG renderer backed by the `qrcode` crate.
#[derive(Debug, Clone)]
pub struct PngQrRenderer {
    /// Edge length of one QR module in pixels.
    module_px: u32,
}

impl PngQrRenderer {
    pub fn new(module_px: u32) -> Self {
        Self {
            module_px: module_px.max(1),
        }
    }
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self::new(8)
    }
}

impl QrRenderer for PngQrRenderer {
    fn render_png(&self, payload: &str) -> anyhow::Result<Vec<u8>> {
        let code = QrCode::new(payload.as_bytes())
            .map_err(|e| anyhow::anyhow!("qr encoding failed: {}", e))?;
        let img = code
            .render::<Luma<u8>>()
            .module_dimensions(self.module_px, self.module_px)
            .quiet_zone(true)
            .build();

        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

/// Text form of a PNG, embeddable in JSON or an `<img src>`.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(png))
}
