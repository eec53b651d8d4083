//! Vector rendering of QR symbols

use super::{EccLevel, SymbolSpec};
use crate::error::{Error, Result};
use qrcode::types::QrError;
use qrcode::{Color, QrCode};
use serde::Serialize;
use std::fmt::Write as _;

/// Block of modules left blank under an excavating overlay, in module coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Excavation {
    /// First excavated column
    pub x: usize,
    /// First excavated row
    pub y: usize,
    /// Number of excavated columns
    pub width: usize,
    /// Number of excavated rows
    pub height: usize,
}

impl Excavation {
    /// Whether the module at `(x, y)` lies inside the excavated block
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Where the overlay lands on the output surface, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlayPlacement {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// Deterministic vector description of a rendered symbol.
///
/// Dark modules are stored row-major without the quiet zone; the quiet zone and
/// the overlay only exist as geometry. Excavated modules are stored as light.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorScene {
    size: u32,
    modules: usize,
    quiet_zone: usize,
    level: EccLevel,
    dark: Vec<bool>,
    overlay: Option<OverlayPlacement>,
    covered: Option<Excavation>,
    excavation: Option<Excavation>,
    overlay_cells: Option<[String; 4]>,
    href: Option<String>,
}

impl VectorScene {
    /// Output edge length in pixels
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Modules per side, excluding the quiet zone
    pub fn modules(&self) -> usize {
        self.modules
    }

    /// Quiet zone width in modules
    pub fn quiet_zone(&self) -> usize {
        self.quiet_zone
    }

    /// Cells per side of the view box (modules plus quiet zone on both sides)
    pub fn num_cells(&self) -> usize {
        self.modules + 2 * self.quiet_zone
    }

    /// Error-correction level the symbol was built with
    pub fn level(&self) -> EccLevel {
        self.level
    }

    /// Overlay placement in output pixels, if any
    pub fn overlay(&self) -> Option<&OverlayPlacement> {
        self.overlay.as_ref()
    }

    /// Excavated module block, if the overlay excavates
    pub fn excavation(&self) -> Option<&Excavation> {
        self.excavation.as_ref()
    }

    /// Module block hidden by the overlay, whether excavated or drawn over
    pub fn covered(&self) -> Option<&Excavation> {
        self.covered.as_ref()
    }

    /// Share of the symbol's modules hidden by the overlay, between 0 and 1
    pub fn hidden_module_share(&self) -> f64 {
        match (&self.covered, self.modules) {
            (Some(block), modules) if modules > 0 => {
                (block.width * block.height) as f64 / (modules * modules) as f64
            }
            _ => 0.0,
        }
    }

    /// True when the overlay hides more modules than [`EccLevel::overlay_budget`]
    /// allows for the scene's level.
    pub fn overlay_risks_decode(&self) -> bool {
        self.hidden_module_share() > self.level.overlay_budget()
    }

    /// Whether the module at `(x, y)` is dark. Out-of-range modules are light.
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        x < self.modules && y < self.modules && self.dark[y * self.modules + x]
    }

    /// Number of dark modules
    pub fn dark_module_count(&self) -> usize {
        self.dark.iter().filter(|dark| **dark).count()
    }

    /// Whether the output pixel `(px, py)` samples a dark module.
    ///
    /// Each pixel samples the cell under its center, so every pixel of the
    /// surface maps to exactly one cell.
    pub fn is_dark_at_pixel(&self, px: u32, py: u32) -> bool {
        let cx = self.cell_for_pixel(px);
        let cy = self.cell_for_pixel(py);
        match (
            cx.checked_sub(self.quiet_zone),
            cy.checked_sub(self.quiet_zone),
        ) {
            (Some(x), Some(y)) => self.is_dark(x, y),
            _ => false,
        }
    }

    fn cell_for_pixel(&self, p: u32) -> usize {
        let cells = self.num_cells() as u64;
        ((2 * p as u64 + 1) * cells / (2 * self.size as u64)) as usize
    }

    /// Serialize the scene as a standalone SVG document.
    pub fn to_svg(&self) -> String {
        let cells = self.num_cells();
        let mut svg = String::new();
        let _ = write!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" height=\"{size}\" width=\"{size}\" viewBox=\"0 0 {cells} {cells}\" shape-rendering=\"crispEdges\">",
            size = self.size,
        );
        let _ = write!(
            svg,
            "<path fill=\"#FFFFFF\" d=\"M0,0 h{cells}v{cells}H0z\"/>"
        );
        let _ = write!(svg, "<path fill=\"#000000\" d=\"{}\"/>", self.module_path());

        if let (Some(href), Some([x, y, w, h])) = (&self.href, &self.overlay_cells) {
            let _ = write!(
                svg,
                "<image href=\"{}\" height=\"{h}\" width=\"{w}\" x=\"{x}\" y=\"{y}\" preserveAspectRatio=\"none\"/>",
                escape_attr(href)
            );
        }

        svg.push_str("</svg>");
        svg
    }

    fn module_path(&self) -> String {
        let q = self.quiet_zone;
        let mut path = String::new();
        for y in 0..self.modules {
            let mut run_start: Option<usize> = None;
            for x in 0..=self.modules {
                let dark = x < self.modules && self.is_dark(x, y);
                match (dark, run_start) {
                    (true, None) => run_start = Some(x),
                    (false, Some(start)) => {
                        let _ = write!(
                            path,
                            "M{} {}h{}v1H{}z",
                            start + q,
                            y + q,
                            x - start,
                            start + q
                        );
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }
        path
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Turns a [`SymbolSpec`] into a [`VectorScene`]
#[derive(Debug, Clone, Default)]
pub struct VectorCodeRenderer {}

impl VectorCodeRenderer {
    /// Create a renderer
    pub fn new() -> Self {
        Self {}
    }

    /// Render the module pattern and overlay geometry for `spec`.
    ///
    /// Fails with [`Error::SymbolTooDense`] when the payload does not fit any QR
    /// version at the requested level, or when the symbol has more cells per side
    /// than the output has pixels.
    pub fn render(&self, spec: &SymbolSpec) -> Result<VectorScene> {
        spec.validate()?;

        let code = QrCode::with_error_correction_level(
            spec.payload.as_str().as_bytes(),
            spec.level.to_qrcode(),
        )
        .map_err(|e| match e {
            QrError::DataTooLong => Error::SymbolTooDense(format!(
                "{} bytes do not fit a QR symbol at level {}",
                spec.payload.as_str().len(),
                spec.level
            )),
            other => Error::Unknown(format!("Failed to create QR code: {other}")),
        })?;

        let modules = code.width();
        let quiet_zone = spec.quiet_zone as usize;
        let cells = modules + 2 * quiet_zone;
        if cells as u64 > spec.size as u64 {
            return Err(Error::SymbolTooDense(format!(
                "{cells} cells per side need more than {}px",
                spec.size
            )));
        }

        let mut dark: Vec<bool> = code
            .to_colors()
            .into_iter()
            .map(|color| color == Color::Dark)
            .collect();

        let mut overlay = None;
        let mut covered = None;
        let mut excavation = None;
        let mut overlay_cells = None;
        let mut href = None;

        if let Some(spec_overlay) = &spec.overlay {
            let scale = cells as f64 / spec.size as f64;
            let w = spec_overlay.width as f64 * scale;
            let h = spec_overlay.height as f64 * scale;
            let x = modules as f64 / 2.0 - w / 2.0;
            let y = modules as f64 / 2.0 - h / 2.0;

            let block = excavate_block(x, y, w, h, modules);
            covered = Some(block);
            if spec_overlay.excavate {
                for row in block.y..block.y + block.height {
                    for col in block.x..block.x + block.width {
                        dark[row * modules + col] = false;
                    }
                }
                excavation = Some(block);
            }

            overlay = Some(OverlayPlacement {
                x: (spec.size - spec_overlay.width) / 2,
                y: (spec.size - spec_overlay.height) / 2,
                width: spec_overlay.width,
                height: spec_overlay.height,
            });
            overlay_cells = Some([
                (x + quiet_zone as f64).to_string(),
                (y + quiet_zone as f64).to_string(),
                w.to_string(),
                h.to_string(),
            ]);
            href = spec_overlay.href.clone();
        }

        let scene = VectorScene {
            size: spec.size,
            modules,
            quiet_zone,
            level: spec.level,
            dark,
            overlay,
            covered,
            excavation,
            overlay_cells,
            href,
        };

        if scene.overlay_risks_decode() {
            tracing::warn!(
                level = %spec.level,
                hidden = %format!("{:.1}%", scene.hidden_module_share() * 100.0),
                budget = %format!("{:.1}%", spec.level.overlay_budget() * 100.0),
                "overlay hides more modules than the error-correction level can restore; \
                 the symbol will probably not decode"
            );
        } else if spec.overlay_risks_decode() {
            tracing::warn!(
                level = %spec.level,
                "overlay hides modules below error-correction level H; decoding may be unreliable"
            );
        }

        tracing::debug!(
            modules,
            cells,
            size = spec.size,
            level = %spec.level,
            excavated = scene.excavation.is_some(),
            "rendered vector symbol"
        );

        Ok(scene)
    }
}

/// Snap the overlay rectangle outward to whole modules, clamped to the grid.
fn excavate_block(x: f64, y: f64, w: f64, h: f64, modules: usize) -> Excavation {
    let floor_x = x.floor();
    let floor_y = y.floor();
    let ceil_w = (w + x - floor_x).ceil();
    let ceil_h = (h + y - floor_y).ceil();

    let start_x = floor_x.max(0.0) as usize;
    let start_y = floor_y.max(0.0) as usize;
    let end_x = ((floor_x + ceil_w).max(0.0) as usize).min(modules);
    let end_y = ((floor_y + ceil_h).max(0.0) as usize).min(modules);

    Excavation {
        x: start_x.min(modules),
        y: start_y.min(modules),
        width: end_x.saturating_sub(start_x),
        height: end_y.saturating_sub(start_y),
    }
}
