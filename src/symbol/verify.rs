//! Read-back of rasterized symbols using rqrr

use crate::error::{Error, Result};
use image::{GrayImage, RgbaImage};

/// Decodes the payload back out of a rasterized symbol.
///
/// Used to confirm that an overlay did not destroy too many modules.
#[derive(Debug, Clone, Default)]
pub struct SymbolReader {}

impl SymbolReader {
    /// Create a reader
    pub fn new() -> Self {
        Self {}
    }

    /// Decode the first symbol found in an RGBA surface.
    ///
    /// Returns `Ok(None)` when no symbol grid is detected at all.
    pub fn read(&self, pixels: &RgbaImage) -> Result<Option<String>> {
        let gray = image::DynamicImage::ImageRgba8(pixels.clone()).to_luma8();
        self.read_gray(gray)
    }

    /// Decode the first symbol found in a grayscale image.
    pub fn read_gray(&self, img: GrayImage) -> Result<Option<String>> {
        let mut prepared = rqrr::PreparedImage::prepare(img);
        let grids = prepared.detect_grids();

        let Some(grid) = grids.first() else {
            return Ok(None);
        };

        match grid.decode() {
            Ok((meta, content)) => {
                tracing::debug!(
                    version = ?meta.version,
                    ecc_level = ?meta.ecc_level,
                    length = content.len(),
                    "read back rasterized symbol"
                );
                Ok(Some(content))
            }
            Err(e) => Err(Error::Image(format!("QR read-back failed: {e:?}"))),
        }
    }

    /// Whether `pixels` decodes to exactly `expected`.
    pub fn matches(&self, pixels: &RgbaImage, expected: &str) -> bool {
        match self.read(pixels) {
            Ok(Some(text)) => text == expected,
            Ok(None) => false,
            Err(err) => {
                tracing::debug!(error = %err, "read-back error");
                false
            }
        }
    }
}
