//! Export sequencing
//!
//! [`ExportOrchestrator`] drives one export at a time through
//! `Idle -> Preparing -> Rendering -> Rasterizing -> Exporting -> Idle`.
//!
//! * Only one export runs at a time. The off-screen [`ScratchSlot`] is leased for
//!   the whole attempt and a second request made while it is held returns
//!   [`ExportOutcome::Busy`].
//! * Every presented payload bumps a generation counter. An export whose
//!   generation is no longer current when it reaches the encode step returns
//!   [`ExportOutcome::Superseded`] and nothing is shared.
//! * Failures are terminal for the attempt. They emit a single
//!   [`Notice::ExportFailed`] and the machine returns to `Idle`.

use crate::error::{Error, Result};
use crate::export::{ArtifactExporter, ExportOutcome, FailureReason, Notice};
use crate::overlay::{MarkerImage, MarkerOverlay};
use crate::raster::{DEFAULT_MAX_DIMENSION, Rasterizer, RenderedScene};
use crate::symbol::{
    EccLevel, OverlaySpec, ReflectionPayload, SymbolReader, SymbolSpec, VectorCodeRenderer,
    VectorScene,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

/// What to do when the marker cannot be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayFailurePolicy {
    /// Fail the export with `OverlayLoadFailed`
    #[default]
    Abort,
    /// Export the bare symbol without marker or excavation
    ProceedWithout,
}

impl OverlayFailurePolicy {
    /// Parse `abort` / `proceed` (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(Self::Abort),
            "proceed" | "proceed_without" | "skip" => Some(Self::ProceedWithout),
            _ => None,
        }
    }
}

/// Export pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    /// Nothing in flight
    Idle,
    /// Resolving the symbol to export
    Preparing,
    /// Waiting for the marker to decode
    Rendering,
    /// Drawing pixels
    Rasterizing,
    /// Encoding and handing over to the platform
    Exporting,
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExportState::Idle => "idle",
            ExportState::Preparing => "preparing",
            ExportState::Rendering => "rendering",
            ExportState::Rasterizing => "rasterizing",
            ExportState::Exporting => "exporting",
        };
        f.write_str(label)
    }
}

/// Symbol parameters applied to every presented payload
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Output edge length in pixels
    pub size: u32,
    /// Error-correction level
    pub level: EccLevel,
    /// Quiet zone in modules
    pub quiet_zone: u32,
    /// Excavate modules under the marker
    pub excavate: bool,
    /// Marker failure handling
    pub overlay_failure: OverlayFailurePolicy,
    /// Decode the rasterized symbol back and warn when it does not match
    pub verify_decode: bool,
    /// Largest surface the rasterizer may allocate
    pub max_dimension: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            size: 300,
            level: EccLevel::H,
            quiet_zone: 0,
            excavate: true,
            overlay_failure: OverlayFailurePolicy::Abort,
            verify_decode: false,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Single off-screen render slot.
///
/// Holds the scene rendered for capture while an export runs. A lease is
/// exclusive and is torn down when dropped, on every exit path.
#[derive(Debug, Default)]
pub struct ScratchSlot {
    in_use: AtomicBool,
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

impl ScratchSlot {
    /// Take the slot, or `None` while another lease is alive.
    pub fn try_acquire(&self) -> Option<ScratchLease<'_>> {
        self.in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Some(ScratchLease {
            slot: self,
            scene: None,
        })
    }

    /// Whether a lease is currently alive
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Total leases handed out
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Total leases torn down
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Exclusive use of the [`ScratchSlot`]
#[derive(Debug)]
pub struct ScratchLease<'a> {
    slot: &'a ScratchSlot,
    scene: Option<VectorScene>,
}

impl ScratchLease<'_> {
    fn stage(&mut self, scene: VectorScene) -> &VectorScene {
        self.scene.insert(scene)
    }

    fn take(&mut self) -> Option<VectorScene> {
        self.scene.take()
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        self.scene = None;
        self.slot.releases.fetch_add(1, Ordering::SeqCst);
        self.slot.in_use.store(false, Ordering::SeqCst);
        tracing::trace!("scratch slot released");
    }
}

#[derive(Debug, Clone)]
struct Presented {
    generation: u64,
    spec: SymbolSpec,
    scene: Option<VectorScene>,
}

/// Resets the published state to `Idle` when an export attempt ends, including
/// when its future is dropped.
struct IdleOnDrop<'a>(&'a watch::Sender<ExportState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ExportState::Idle);
    }
}

/// Sequences rendering, marker decoding, rasterization and export
pub struct ExportOrchestrator {
    settings: PipelineSettings,
    renderer: VectorCodeRenderer,
    marker: Option<MarkerOverlay>,
    rasterizer: Rasterizer,
    reader: SymbolReader,
    exporter: ArtifactExporter,
    generation: AtomicU64,
    current: Mutex<Option<Presented>>,
    scratch: ScratchSlot,
    state: watch::Sender<ExportState>,
}

impl ExportOrchestrator {
    /// Build an orchestrator. `marker` is composited at the center of every symbol.
    pub fn new(
        settings: PipelineSettings,
        marker: Option<MarkerOverlay>,
        exporter: ArtifactExporter,
    ) -> Self {
        let (state, _) = watch::channel(ExportState::Idle);
        Self {
            rasterizer: Rasterizer::with_max_dimension(settings.max_dimension),
            settings,
            renderer: VectorCodeRenderer::new(),
            marker,
            reader: SymbolReader::new(),
            exporter,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
            scratch: ScratchSlot::default(),
            state,
        }
    }

    /// Current pipeline phase
    pub fn state(&self) -> ExportState {
        *self.state.borrow()
    }

    /// Watch pipeline phase changes
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    /// The off-screen slot, exposed for inspection
    pub fn scratch(&self) -> &ScratchSlot {
        &self.scratch
    }

    /// Current generation token
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Symbol spec for `payload` under the configured settings
    pub fn spec_for(&self, payload: ReflectionPayload) -> SymbolSpec {
        let mut spec = SymbolSpec::new(payload, self.settings.size)
            .with_level(self.settings.level)
            .with_quiet_zone(self.settings.quiet_zone);
        if let Some(marker) = &self.marker {
            spec = spec.with_overlay(OverlaySpec {
                width: marker.width(),
                height: marker.height(),
                excavate: self.settings.excavate,
                href: marker.href(),
            });
        }
        spec
    }

    /// Make `payload` the export target without rendering it.
    ///
    /// Any export still running for an older payload becomes stale.
    pub fn select(&self, payload: ReflectionPayload) -> u64 {
        let spec = self.spec_for(payload);
        self.replace_current(|generation| {
            Some(Presented {
                generation,
                spec,
                scene: None,
            })
        })
    }

    /// Render `payload` for display and make it the export target.
    ///
    /// Any export still running for an older payload becomes stale, even when
    /// rendering the new payload fails.
    pub fn present(&self, payload: ReflectionPayload) -> Result<VectorScene> {
        let spec = self.spec_for(payload);
        match self.renderer.render(&spec) {
            Ok(scene) => {
                let shown = scene.clone();
                self.replace_current(|generation| {
                    Some(Presented {
                        generation,
                        spec,
                        scene: Some(scene),
                    })
                });
                Ok(shown)
            }
            Err(err) => {
                self.replace_current(|_| None);
                Err(err)
            }
        }
    }

    /// Drop the export target and invalidate any export in flight.
    pub fn invalidate(&self) {
        self.replace_current(|_| None);
    }

    fn replace_current(&self, next: impl FnOnce(u64) -> Option<Presented>) -> u64 {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *current = next(generation);
        tracing::debug!(generation, "export target changed");
        generation
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn transition(&self, next: ExportState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = %previous, to = %next, "export state");
    }

    /// Export the current target.
    ///
    /// Never panics or returns early without a result: every path ends in an
    /// [`ExportOutcome`] and a return to [`ExportState::Idle`].
    pub async fn export(&self) -> ExportOutcome {
        let Some(mut lease) = self.scratch.try_acquire() else {
            tracing::info!(state = %self.state(), "export already in flight; request ignored");
            return ExportOutcome::Busy;
        };
        let _idle = IdleOnDrop(&self.state);

        let outcome = match self.run(&mut lease).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "export failed");
                ExportOutcome::Failed(FailureReason::from(&err))
            }
        };

        if let ExportOutcome::Failed(reason) = &outcome {
            self.exporter
                .notifier()
                .notify(&Notice::ExportFailed(reason.clone()));
        }
        tracing::info!(outcome = outcome.label(), "export finished");
        outcome
    }

    async fn run(&self, lease: &mut ScratchLease<'_>) -> Result<ExportOutcome> {
        self.transition(ExportState::Preparing);
        let presented = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::NotReady)?;
        let Presented {
            generation,
            spec,
            scene,
        } = presented;

        let scene = match scene {
            Some(on_screen) => on_screen,
            None => {
                tracing::debug!(generation, "rendering symbol off-screen");
                lease.stage(self.renderer.render(&spec)?).clone()
            }
        };

        self.transition(ExportState::Rendering);
        let (scene, marker) = self.resolve_marker(&spec, scene).await?;
        if self.is_stale(generation) {
            return Ok(self.superseded(generation));
        }

        self.transition(ExportState::Rasterizing);
        let pixels = self
            .rasterizer
            .rasterize(RenderedScene::new(scene, marker))?;
        lease.take();

        if self.settings.verify_decode && !self.reader.matches(&pixels, spec.payload.as_str()) {
            tracing::warn!(
                level = %spec.level,
                "rasterized symbol does not read back as its payload"
            );
        }

        if self.is_stale(generation) {
            return Ok(self.superseded(generation));
        }

        self.transition(ExportState::Exporting);
        let artifact = self.exporter.encode(&pixels)?;
        drop(pixels);
        Ok(self.exporter.dispatch(artifact).await)
    }

    async fn resolve_marker(
        &self,
        spec: &SymbolSpec,
        scene: VectorScene,
    ) -> Result<(VectorScene, Option<MarkerImage>)> {
        let Some(marker) = self.marker.as_ref().filter(|_| scene.overlay().is_some()) else {
            return Ok((scene, None));
        };

        match marker.load().await {
            Ok(image) => Ok((scene, Some(image))),
            Err(err) if self.settings.overlay_failure == OverlayFailurePolicy::ProceedWithout => {
                tracing::warn!(error = %err, "marker unavailable; exporting without it");
                let bare = self.renderer.render(&spec.without_overlay())?;
                Ok((bare, None))
            }
            Err(err) => Err(err),
        }
    }

    fn superseded(&self, generation: u64) -> ExportOutcome {
        tracing::info!(
            generation,
            current = self.generation(),
            "export superseded by a newer payload; result discarded"
        );
        ExportOutcome::Superseded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_slot_is_exclusive() {
        let slot = ScratchSlot::default();
        let lease = slot.try_acquire().expect("first lease");
        assert!(slot.in_use());
        assert!(slot.try_acquire().is_none());
        drop(lease);
        assert!(!slot.in_use());
        assert!(slot.try_acquire().is_some());
        assert_eq!(slot.acquisitions(), 2);
        assert_eq!(slot.releases(), 2);
    }

    #[test]
    fn overlay_policy_parsing() {
        assert_eq!(
            OverlayFailurePolicy::parse("Proceed"),
            Some(OverlayFailurePolicy::ProceedWithout)
        );
        assert_eq!(
            OverlayFailurePolicy::parse("abort"),
            Some(OverlayFailurePolicy::Abort)
        );
        assert_eq!(OverlayFailurePolicy::parse("retry"), None);
    }

    #[test]
    fn state_labels() {
        assert_eq!(ExportState::Rasterizing.to_string(), "rasterizing");
    }
}
