//! Drawing surfaces

use crate::error::{Error, Result};
use crate::overlay::MarkerImage;
use crate::symbol::{OverlayPlacement, VectorScene};
use image::{Rgba, RgbaImage};

/// Opaque white used for the background and light modules
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// Opaque black used for dark modules
pub const FOREGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Render target for a single export.
///
/// [`Rasterizer`](super::Rasterizer) calls the methods in order: fill, modules,
/// overlay, emit. Every pixel must be opaque after
/// [`RenderSurface::fill_background`].
pub trait RenderSurface {
    /// Paint every pixel with `color`
    fn fill_background(&mut self, color: Rgba<u8>) -> Result<()>;

    /// Draw the dark modules of `scene`
    fn render_scene(&mut self, scene: &VectorScene) -> Result<()>;

    /// Blend `marker` over the surface at `placement`
    fn composite_overlay(&mut self, marker: &MarkerImage, placement: &OverlayPlacement)
    -> Result<()>;

    /// Hand over the finished pixel buffer
    fn emit_pixels(self) -> Result<RgbaImage>;
}

/// In-memory RGBA surface
#[derive(Debug, Clone)]
pub struct RasterSurface {
    pixels: RgbaImage,
}

impl RasterSurface {
    /// Allocate a `size` x `size` surface filled with [`BACKGROUND`].
    pub fn new(size: u32, max_dimension: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::RasterizeFailed(
                "cannot allocate an empty surface".to_string(),
            ));
        }
        if size > max_dimension {
            return Err(Error::RasterizeFailed(format!(
                "surface of {size}px exceeds the {max_dimension}px limit"
            )));
        }
        Ok(Self {
            pixels: RgbaImage::from_pixel(size, size, BACKGROUND),
        })
    }

    /// Current pixels
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

impl RenderSurface for RasterSurface {
    fn fill_background(&mut self, color: Rgba<u8>) -> Result<()> {
        for pixel in self.pixels.pixels_mut() {
            *pixel = color;
        }
        Ok(())
    }

    fn render_scene(&mut self, scene: &VectorScene) -> Result<()> {
        if scene.size() != self.pixels.width() || scene.size() != self.pixels.height() {
            return Err(Error::RasterizeFailed(format!(
                "scene of {}px does not match {}x{} surface",
                scene.size(),
                self.pixels.width(),
                self.pixels.height()
            )));
        }

        for (x, y, pixel) in self.pixels.enumerate_pixels_mut() {
            if scene.is_dark_at_pixel(x, y) {
                *pixel = FOREGROUND;
            }
        }
        Ok(())
    }

    fn composite_overlay(
        &mut self,
        marker: &MarkerImage,
        placement: &OverlayPlacement,
    ) -> Result<()> {
        let (width, height) = self.pixels.dimensions();
        let src = marker.pixels();
        let draw_w = placement.width.min(src.width());
        let draw_h = placement.height.min(src.height());

        for dy in 0..draw_h {
            let y = placement.y + dy;
            if y >= height {
                break;
            }
            for dx in 0..draw_w {
                let x = placement.x + dx;
                if x >= width {
                    break;
                }
                let under = *self.pixels.get_pixel(x, y);
                self.pixels
                    .put_pixel(x, y, blend_over(*src.get_pixel(dx, dy), under));
            }
        }
        Ok(())
    }

    fn emit_pixels(self) -> Result<RgbaImage> {
        Ok(self.pixels)
    }
}

/// Source-over blend onto an opaque destination. The result is always opaque.
fn blend_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let alpha = src[3] as u32;
    let mix = |s: u8, d: u8| ((s as u32 * alpha + d as u32 * (255 - alpha) + 127) / 255) as u8;
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        255,
    ])
}
