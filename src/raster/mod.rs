//! Rasterization of vector scenes into fixed-size pixel buffers
//!
//! Drawing order is fixed: opaque background, then dark modules, then the
//! marker. The rasterizer paints the background itself before drawing and
//! rejects any output that still holds a translucent pixel, so excavated or
//! quiet-zone cells can never leave transparent holes.

mod surface;

pub use surface::{BACKGROUND, FOREGROUND, RasterSurface, RenderSurface};

use crate::error::{Error, Result};
use crate::overlay::MarkerImage;
use crate::symbol::VectorScene;
use image::RgbaImage;

/// Largest surface edge the rasterizer will allocate
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Symbol plus decoded marker, not yet flattened
#[derive(Debug, Clone)]
pub struct RenderedScene {
    /// Vector symbol
    pub scene: VectorScene,
    /// Decoded marker to composite, if any
    pub marker: Option<MarkerImage>,
}

impl RenderedScene {
    /// Pair a scene with its decoded marker
    pub fn new(scene: VectorScene, marker: Option<MarkerImage>) -> Self {
        Self { scene, marker }
    }
}

/// Flattens a [`RenderedScene`] into pixels
#[derive(Debug, Clone)]
pub struct Rasterizer {
    max_dimension: u32,
}

impl Rasterizer {
    /// Rasterizer with [`DEFAULT_MAX_DIMENSION`]
    pub fn new() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    /// Rasterizer with a custom surface limit
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Draw `rendered` onto a fresh [`RasterSurface`] of the scene's size.
    pub fn rasterize(&self, rendered: RenderedScene) -> Result<RgbaImage> {
        let surface = RasterSurface::new(rendered.scene.size(), self.max_dimension)?;
        self.rasterize_onto(rendered, surface)
    }

    /// Draw `rendered` onto a caller-supplied surface.
    pub fn rasterize_onto<S: RenderSurface>(
        &self,
        rendered: RenderedScene,
        mut surface: S,
    ) -> Result<RgbaImage> {
        let RenderedScene { scene, marker } = rendered;
        surface.fill_background(BACKGROUND)?;
        surface.render_scene(&scene)?;

        match (marker.as_ref(), scene.overlay()) {
            (Some(marker), Some(placement)) => surface.composite_overlay(marker, placement)?,
            (Some(_), None) => {
                tracing::debug!("marker supplied for a scene without overlay area; skipped")
            }
            _ => {}
        }

        let pixels = surface.emit_pixels()?;
        let translucent = pixels.pixels().filter(|p| p[3] != u8::MAX).count();
        if translucent > 0 {
            return Err(Error::RasterizeFailed(format!(
                "surface emitted {translucent} translucent pixels"
            )));
        }
        tracing::debug!(
            width = pixels.width(),
            height = pixels.height(),
            "rasterized scene"
        );
        Ok(pixels)
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new()
    }
}
