//! QR symbol description and vector rendering
//!
//! A [`SymbolSpec`] fully determines the module pattern produced by
//! [`VectorCodeRenderer`]: rendering is a pure function of the payload, the
//! pixel size, the error-correction level and the quiet zone.
//!
//! # Overlays and error correction
//!
//! An overlay hides the modules underneath it, either because it is drawn on top
//! of them or because they are excavated (left blank). Decoders can only recover
//! those modules through error correction, so a spec with an overlay should use
//! [`EccLevel::H`]. Lower levels are accepted but the renderer logs a warning, and
//! [`SymbolSpec::overlay_risks_decode`] reports the condition to callers.
//!
//! The level alone is not enough: a quiet zone or a dense payload shrinks the
//! modules, so the same overlay hides a larger share of them. The rendered
//! [`VectorScene`] measures that share and
//! [`VectorScene::overlay_risks_decode`] flags it once it exceeds
//! [`EccLevel::overlay_budget`].

mod renderer;
mod verify;

pub use renderer::{Excavation, OverlayPlacement, VectorCodeRenderer, VectorScene};
pub use verify::SymbolReader;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The string a symbol encodes: the reveal URL handed over by the event backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReflectionPayload(String);

impl ReflectionPayload {
    /// Wrap a payload string, rejecting empty (or whitespace-only) input.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::InvalidPayload("payload must not be empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Build the reveal URL for an event id issued by the backend.
    pub fn for_event(base_url: &str, event_id: &str) -> Result<Self> {
        let id = event_id.trim();
        if id.is_empty() {
            return Err(Error::InvalidPayload("event id must not be empty".to_string()));
        }
        let base = base_url.trim();
        if base.is_empty() {
            return Err(Error::InvalidPayload(
                "reveal base URL must not be empty".to_string(),
            ));
        }
        let separator = if base.ends_with('/') { "" } else { "/" };
        Self::new(format!("{base}{separator}{id}"))
    }

    /// Payload text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReflectionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ReflectionPayload {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ReflectionPayload> for String {
    fn from(payload: ReflectionPayload) -> Self {
        payload.0
    }
}

/// QR error-correction level, ordered from weakest to strongest.
///
/// Deserializes from the same spellings as [`FromStr`] (`h`, `High`, ...).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum EccLevel {
    /// ~7% recovery
    L,
    /// ~15% recovery
    M,
    /// ~25% recovery
    Q,
    /// ~30% recovery
    #[default]
    H,
}

impl EccLevel {
    pub(crate) fn to_qrcode(self) -> qrcode::EcLevel {
        match self {
            EccLevel::L => qrcode::EcLevel::L,
            EccLevel::M => qrcode::EcLevel::M,
            EccLevel::Q => qrcode::EcLevel::Q,
            EccLevel::H => qrcode::EcLevel::H,
        }
    }

    /// Single-letter label (`L`, `M`, `Q`, `H`)
    pub fn label(self) -> &'static str {
        match self {
            EccLevel::L => "L",
            EccLevel::M => "M",
            EccLevel::Q => "Q",
            EccLevel::H => "H",
        }
    }

    /// Nominal share of codewords the level can restore
    pub fn recovery_capacity(self) -> f64 {
        match self {
            EccLevel::L => 0.07,
            EccLevel::M => 0.15,
            EccLevel::Q => 0.25,
            EccLevel::H => 0.30,
        }
    }

    /// Largest share of modules an overlay may hide at this level: three quarters
    /// of [`recovery_capacity`](Self::recovery_capacity), since a hidden block
    /// also damages the codewords along its edges.
    pub fn overlay_budget(self) -> f64 {
        self.recovery_capacity() * 0.75
    }
}

impl TryFrom<String> for EccLevel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EccLevel> for String {
    fn from(level: EccLevel) -> Self {
        level.label().to_string()
    }
}

impl FromStr for EccLevel {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(EccLevel::L),
            "m" | "medium" => Ok(EccLevel::M),
            "q" | "quartile" => Ok(EccLevel::Q),
            "h" | "high" => Ok(EccLevel::H),
            other => Err(Error::Config(format!(
                "Unknown error correction level '{other}', expected L, M, Q or H"
            ))),
        }
    }
}

impl fmt::Display for EccLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Area reserved for the marker image at the center of the symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySpec {
    /// Overlay width in output pixels
    pub width: u32,
    /// Overlay height in output pixels
    pub height: u32,
    /// Leave the modules under the overlay blank instead of drawing them
    pub excavate: bool,
    /// Image reference emitted into the SVG form (data URI or path)
    pub href: Option<String>,
}

/// Everything needed to render one QR symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Encoded payload
    pub payload: ReflectionPayload,
    /// Output edge length in pixels (the symbol is square)
    pub size: u32,
    /// Error-correction level
    pub level: EccLevel,
    /// Blank modules around the symbol
    pub quiet_zone: u32,
    /// Optional centered overlay
    pub overlay: Option<OverlaySpec>,
}

impl SymbolSpec {
    /// Spec without overlay and without quiet zone, at level H
    pub fn new(payload: ReflectionPayload, size: u32) -> Self {
        Self {
            payload,
            size,
            level: EccLevel::H,
            quiet_zone: 0,
            overlay: None,
        }
    }

    /// Set the error-correction level
    pub fn with_level(mut self, level: EccLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the quiet zone in modules
    pub fn with_quiet_zone(mut self, modules: u32) -> Self {
        self.quiet_zone = modules;
        self
    }

    /// Attach a centered overlay
    pub fn with_overlay(mut self, overlay: OverlaySpec) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Same spec with the overlay removed
    pub fn without_overlay(&self) -> Self {
        Self {
            overlay: None,
            ..self.clone()
        }
    }

    /// Check the size invariants that do not depend on the encoded data.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidSymbolSpec("size must be positive".to_string()));
        }
        if let Some(overlay) = &self.overlay {
            if overlay.width == 0 || overlay.height == 0 {
                return Err(Error::InvalidSymbolSpec(
                    "overlay dimensions must be positive".to_string(),
                ));
            }
            if overlay.width >= self.size || overlay.height >= self.size {
                return Err(Error::InvalidSymbolSpec(format!(
                    "overlay {}x{} does not fit inside a {}px symbol",
                    overlay.width, overlay.height, self.size
                )));
            }
        }
        Ok(())
    }

    /// True when an overlay hides modules but the level is below H.
    pub fn overlay_risks_decode(&self) -> bool {
        self.overlay.is_some() && self.level < EccLevel::H
    }
}
