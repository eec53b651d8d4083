//! REVEALQR - shareable reveal QR codes with an embedded marker
//!
//! This library turns a reveal URL into a QR symbol with a centered marker
//! image, rasterizes it into an opaque PNG and hands it to the host platform:
//! native share when the platform can share files, a download otherwise.
//!
//! # Features
//!
//! - **Deterministic symbols**: vector rendering is a pure function of payload,
//!   size and error-correction level, with optional module excavation
//! - **Bounded marker loading**: marker decode is awaited under a deadline
//! - **Opaque rasterization**: background first, then modules, then marker
//! - **Share with fallback**: share capability is probed per export
//! - **Serialized exports**: one export in flight, stale results discarded
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use revealqr::{
//!     ArtifactExporter, DesktopPlatform, ExportOrchestrator, PipelineSettings,
//!     ReflectionPayload, TracingNotifier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let exporter = ArtifactExporter::new(
//!         Arc::new(DesktopPlatform::new("downloads")),
//!         Arc::new(TracingNotifier),
//!     );
//!     let orchestrator = ExportOrchestrator::new(PipelineSettings::default(), None, exporter);
//!
//!     orchestrator.present(ReflectionPayload::new("https://example.org/qr/42")?)?;
//!     let outcome = orchestrator.export().await;
//!
//!     println!("Export outcome: {:?}", outcome);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod orchestrator;
pub mod overlay;
pub mod raster;
pub mod report;
pub mod symbol;

// Re-exports for convenience
pub use error::{Error, ErrorKind, Result};

pub use config::{
    ExportOptions, LogRotation, LoggingOptions, MarkerOptions, RevealConfig, RevealOptions,
    SymbolOptions,
};
pub use export::{
    ArtifactExporter, DesktopPlatform, ExportArtifact, ExportOutcome, FailureReason, Notice,
    Notifier, SharePlatform, ShareResponse, TracingNotifier,
};
pub use orchestrator::{
    ExportOrchestrator, ExportState, OverlayFailurePolicy, PipelineSettings, ScratchSlot,
};
pub use overlay::{ImageSource, MarkerImage, MarkerOverlay, MarkerSource};
pub use raster::{Rasterizer, RenderSurface, RenderedScene};
pub use symbol::{
    EccLevel, OverlaySpec, ReflectionPayload, SymbolReader, SymbolSpec, VectorCodeRenderer,
    VectorScene,
};
