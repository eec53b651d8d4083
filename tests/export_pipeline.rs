use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::sync::Notify;

use revealqr::{
    ArtifactExporter, Error, ErrorKind, ExportArtifact, ExportOrchestrator, ExportOutcome,
    ExportState, ImageSource, MarkerOverlay, MarkerSource, Notice, Notifier,
    OverlayFailurePolicy, PipelineSettings, ReflectionPayload, Result, SharePlatform,
    ShareResponse, SymbolReader,
};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([220, 20, 60, 255]);

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Notice>>);

impl RecordingNotifier {
    fn notices(&self) -> Vec<Notice> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.0.lock().unwrap().push(notice.clone());
    }
}

struct FakePlatform {
    can_share: bool,
    response: ShareResponse,
    gate: Option<Arc<Notify>>,
    shared: Mutex<Vec<ExportArtifact>>,
    downloaded: Mutex<Vec<ExportArtifact>>,
}

impl FakePlatform {
    fn sharing(response: ShareResponse) -> Self {
        Self {
            can_share: true,
            response,
            gate: None,
            shared: Mutex::new(Vec::new()),
            downloaded: Mutex::new(Vec::new()),
        }
    }

    fn download_only() -> Self {
        Self {
            can_share: false,
            ..Self::sharing(ShareResponse::Completed)
        }
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn shared(&self) -> Vec<ExportArtifact> {
        self.shared.lock().unwrap().clone()
    }

    fn downloaded(&self) -> Vec<ExportArtifact> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl SharePlatform for FakePlatform {
    fn can_share_files(&self, mime_type: &str) -> bool {
        self.can_share && mime_type == "image/png"
    }

    async fn share(&self, artifact: &ExportArtifact, _title: &str) -> Result<ShareResponse> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.response == ShareResponse::Completed {
            self.shared.lock().unwrap().push(artifact.clone());
        }
        Ok(self.response)
    }

    async fn download(&self, artifact: &ExportArtifact) -> Result<Option<PathBuf>> {
        self.downloaded.lock().unwrap().push(artifact.clone());
        Ok(Some(PathBuf::from("downloads").join(&artifact.suggested_file_name)))
    }
}

struct GatedSource {
    gate: Arc<Notify>,
    bytes: Bytes,
}

#[async_trait]
impl ImageSource for GatedSource {
    fn describe(&self) -> String {
        "gated marker".to_string()
    }

    async fn fetch(&self) -> Result<Bytes> {
        self.gate.notified().await;
        Ok(self.bytes.clone())
    }
}

struct FailingSource;

#[async_trait]
impl ImageSource for FailingSource {
    fn describe(&self) -> String {
        "broken marker".to_string()
    }

    async fn fetch(&self) -> Result<Bytes> {
        Err(Error::Io(std::io::Error::other("connection reset")))
    }
}

struct StalledSource;

#[async_trait]
impl ImageSource for StalledSource {
    fn describe(&self) -> String {
        "stalled marker".to_string()
    }

    async fn fetch(&self) -> Result<Bytes> {
        std::future::pending().await
    }
}

/// 120x120 marker: red 60x60 square in the middle, transparent elsewhere.
fn marker_png() -> Bytes {
    let img = RgbaImage::from_fn(120, 120, |x, y| {
        if (30..90).contains(&x) && (30..90).contains(&y) {
            RED
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

fn embedded_marker() -> MarkerOverlay {
    MarkerOverlay::new(Arc::new(MarkerSource::Embedded(marker_png())), 120, 120)
}

fn payload() -> ReflectionPayload {
    ReflectionPayload::new("https://example.org/qr/42").unwrap()
}

fn orchestrator(
    settings: PipelineSettings,
    marker: Option<MarkerOverlay>,
    platform: Arc<FakePlatform>,
    notifier: Arc<RecordingNotifier>,
) -> ExportOrchestrator {
    ExportOrchestrator::new(settings, marker, ArtifactExporter::new(platform, notifier))
}

fn decode(artifact: &ExportArtifact) -> RgbaImage {
    image::load_from_memory(&artifact.bytes).unwrap().to_rgba8()
}

fn assert_released(orchestrator: &ExportOrchestrator) {
    assert_eq!(orchestrator.state(), ExportState::Idle);
    assert!(!orchestrator.scratch().in_use());
    assert_eq!(
        orchestrator.scratch().acquisitions(),
        orchestrator.scratch().releases()
    );
}

#[tokio::test]
async fn exports_opaque_300px_symbol_with_excavated_marker() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(embedded_marker()),
        platform.clone(),
        notifier.clone(),
    );

    let scene = orchestrator.present(payload()).unwrap();
    assert!(scene.excavation().is_some());

    let outcome = orchestrator.export().await;
    assert_eq!(outcome, ExportOutcome::Shared);
    assert!(notifier.notices().is_empty());
    assert_released(&orchestrator);

    let shared = platform.shared();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].suggested_file_name, "qrcode.png");
    assert_eq!(shared[0].mime_type, "image/png");

    let pixels = decode(&shared[0]);
    assert_eq!(pixels.dimensions(), (300, 300));
    assert!(pixels.pixels().all(|p| p[3] == 255));

    // marker visible, nothing but background under its transparent parts
    assert_eq!(*pixels.get_pixel(150, 150), RED);
    for y in 90..210 {
        for x in 90..210 {
            let in_red = (120..180).contains(&x) && (120..180).contains(&y);
            let expected = if in_red { RED } else { WHITE };
            assert_eq!(*pixels.get_pixel(x, y), expected, "pixel ({x},{y})");
        }
    }
}

#[tokio::test]
async fn drawn_marker_keeps_modules_and_stays_opaque() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let settings = PipelineSettings {
        excavate: false,
        ..PipelineSettings::default()
    };
    let orchestrator = orchestrator(
        settings,
        Some(embedded_marker()),
        platform.clone(),
        Arc::default(),
    );
    orchestrator.present(payload()).unwrap();

    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);
    let pixels = decode(&platform.shared()[0]);
    assert!(pixels.pixels().all(|p| p[3] == 255));
    assert_eq!(*pixels.get_pixel(150, 150), RED);

    // modules show through the transparent frame of the marker
    let frame_has_modules = (90..210)
        .flat_map(|y| (90..120).map(move |x| (x, y)))
        .any(|(x, y)| *pixels.get_pixel(x, y) == Rgba([0, 0, 0, 255]));
    assert!(frame_has_modules);
}

#[tokio::test]
async fn repeated_exports_are_identical() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(embedded_marker()),
        platform.clone(),
        Arc::default(),
    );
    orchestrator.present(payload()).unwrap();

    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);
    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);

    let shared = platform.shared();
    assert_eq!(shared.len(), 2);
    assert_eq!(shared[0].bytes, shared[1].bytes);
    assert_released(&orchestrator);
}

#[tokio::test]
async fn off_screen_render_is_used_when_nothing_is_presented() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let settings = PipelineSettings {
        quiet_zone: 4,
        ..PipelineSettings::default()
    };
    let orchestrator = orchestrator(settings, None, platform.clone(), Arc::default());
    orchestrator.select(payload());

    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);
    assert_released(&orchestrator);

    let pixels = decode(&platform.shared()[0]);
    assert!(SymbolReader::new().matches(&pixels, payload().as_str()));
}

#[tokio::test]
async fn unsupported_sharing_falls_back_to_download() {
    let platform = Arc::new(FakePlatform::download_only());
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(embedded_marker()),
        platform.clone(),
        notifier.clone(),
    );
    orchestrator.present(payload()).unwrap();

    let outcome = orchestrator.export().await;
    assert_eq!(
        outcome,
        ExportOutcome::Downloaded {
            location: Some(PathBuf::from("downloads/qrcode.png"))
        }
    );
    assert!(platform.shared().is_empty());
    assert_eq!(platform.downloaded().len(), 1);
    assert_eq!(notifier.notices(), vec![Notice::ShareUnavailable]);
    assert_released(&orchestrator);
}

#[tokio::test]
async fn dismissed_share_is_cancelled_without_notice() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Dismissed));
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        None,
        platform.clone(),
        notifier.clone(),
    );
    orchestrator.present(payload()).unwrap();

    assert_eq!(orchestrator.export().await, ExportOutcome::Cancelled);
    assert!(notifier.notices().is_empty());
    assert!(platform.downloaded().is_empty());
}

#[tokio::test]
async fn export_before_any_payload_is_not_ready() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        None,
        platform.clone(),
        notifier.clone(),
    );

    let outcome = orchestrator.export().await;
    assert!(matches!(outcome, ExportOutcome::Failed(ref r) if r.kind == ErrorKind::NotReady));
    let notices = notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message(), "QR code is not ready yet.");
    assert_released(&orchestrator);
}

#[tokio::test]
async fn marker_failure_aborts_by_default() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let notifier = Arc::new(RecordingNotifier::default());
    let marker = MarkerOverlay::new(Arc::new(FailingSource), 120, 120);
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(marker),
        platform.clone(),
        notifier.clone(),
    );
    orchestrator.present(payload()).unwrap();

    let outcome = orchestrator.export().await;
    assert!(
        matches!(outcome, ExportOutcome::Failed(ref r) if r.kind == ErrorKind::OverlayLoadFailed)
    );
    assert!(platform.shared().is_empty());
    assert_eq!(notifier.notices().len(), 1);
    assert_eq!(
        notifier.notices()[0].message(),
        "Failed to generate QR code image."
    );
    assert_released(&orchestrator);
}

#[tokio::test]
async fn marker_failure_can_proceed_without_marker() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = PipelineSettings {
        overlay_failure: OverlayFailurePolicy::ProceedWithout,
        quiet_zone: 4,
        ..PipelineSettings::default()
    };
    let marker = MarkerOverlay::new(Arc::new(FailingSource), 120, 120);
    let orchestrator = orchestrator(settings, Some(marker), platform.clone(), notifier.clone());
    orchestrator.present(payload()).unwrap();

    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);
    assert!(notifier.notices().is_empty());

    let pixels = decode(&platform.shared()[0]);
    assert!(pixels.pixels().all(|p| p[3] == 255));
    assert!(SymbolReader::new().matches(&pixels, payload().as_str()));
}

#[tokio::test(start_paused = true)]
async fn stalled_marker_is_bounded_and_aborts() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let marker = MarkerOverlay::new(Arc::new(StalledSource), 120, 120)
        .with_timeout(Duration::from_secs(3));
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(marker),
        platform.clone(),
        Arc::default(),
    );
    orchestrator.present(payload()).unwrap();

    let outcome = orchestrator.export().await;
    assert!(
        matches!(outcome, ExportOutcome::Failed(ref r) if r.kind == ErrorKind::OverlayLoadFailed)
    );
    assert!(platform.shared().is_empty());
    assert_released(&orchestrator);
}

#[tokio::test(start_paused = true)]
async fn stalled_marker_is_bounded_and_can_proceed() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let settings = PipelineSettings {
        overlay_failure: OverlayFailurePolicy::ProceedWithout,
        ..PipelineSettings::default()
    };
    let marker = MarkerOverlay::new(Arc::new(StalledSource), 120, 120)
        .with_timeout(Duration::from_secs(3));
    let orchestrator = orchestrator(settings, Some(marker), platform.clone(), Arc::default());
    orchestrator.present(payload()).unwrap();

    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);
    let pixels = decode(&platform.shared()[0]);
    assert_ne!(*pixels.get_pixel(150, 150), RED);
}

#[tokio::test]
async fn second_export_while_in_flight_is_rejected() {
    let gate = Arc::new(Notify::new());
    let platform =
        Arc::new(FakePlatform::sharing(ShareResponse::Completed).gated(gate.clone()));
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        None,
        platform.clone(),
        Arc::default(),
    );
    orchestrator.present(payload()).unwrap();

    let first = orchestrator.export();
    let second = async {
        tokio::task::yield_now().await;
        assert_eq!(orchestrator.state(), ExportState::Exporting);
        assert!(orchestrator.scratch().in_use());
        let outcome = orchestrator.export().await;
        gate.notify_one();
        outcome
    };

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first, ExportOutcome::Shared);
    assert_eq!(second, ExportOutcome::Busy);
    assert_eq!(platform.shared().len(), 1);
    assert_eq!(orchestrator.scratch().acquisitions(), 1);
    assert_released(&orchestrator);
}

#[tokio::test]
async fn reselecting_mid_export_discards_the_stale_result() {
    let gate = Arc::new(Notify::new());
    let source = GatedSource {
        gate: gate.clone(),
        bytes: marker_png(),
    };
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let notifier = Arc::new(RecordingNotifier::default());
    let marker = MarkerOverlay::new(Arc::new(source), 120, 120);
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(marker),
        platform.clone(),
        notifier.clone(),
    );
    orchestrator.present(payload()).unwrap();

    let export = orchestrator.export();
    let reselect = async {
        tokio::task::yield_now().await;
        assert_eq!(orchestrator.state(), ExportState::Rendering);
        orchestrator
            .present(ReflectionPayload::new("https://example.org/qr/43").unwrap())
            .unwrap();
        gate.notify_one();
    };

    let (outcome, ()) = tokio::join!(export, reselect);
    assert_eq!(outcome, ExportOutcome::Superseded);
    assert!(platform.shared().is_empty());
    assert!(notifier.notices().is_empty());
    assert_released(&orchestrator);

    // the newer payload exports normally
    gate.notify_one();
    assert_eq!(orchestrator.export().await, ExportOutcome::Shared);
    assert_eq!(platform.shared().len(), 1);
}

#[tokio::test]
async fn invalidating_mid_export_discards_the_result() {
    let gate = Arc::new(Notify::new());
    let source = GatedSource {
        gate: gate.clone(),
        bytes: marker_png(),
    };
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let marker = MarkerOverlay::new(Arc::new(source), 120, 120);
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        Some(marker),
        platform.clone(),
        Arc::default(),
    );
    orchestrator.present(payload()).unwrap();

    let export = orchestrator.export();
    let leave = async {
        tokio::task::yield_now().await;
        orchestrator.invalidate();
        gate.notify_one();
    };

    let (outcome, ()) = tokio::join!(export, leave);
    assert_eq!(outcome, ExportOutcome::Superseded);
    assert!(platform.shared().is_empty());

    let again = orchestrator.export().await;
    assert!(matches!(again, ExportOutcome::Failed(ref r) if r.kind == ErrorKind::NotReady));
}

#[tokio::test]
async fn dropped_export_releases_scratch_and_state() {
    let gate = Arc::new(Notify::new());
    let platform =
        Arc::new(FakePlatform::sharing(ShareResponse::Completed).gated(gate.clone()));
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        None,
        platform.clone(),
        Arc::default(),
    );
    orchestrator.present(payload()).unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(50), orchestrator.export()).await;
    assert!(timed_out.is_err());
    assert!(platform.shared().is_empty());
    assert_released(&orchestrator);
}

#[tokio::test]
async fn symbol_too_dense_fails_presentation_and_export() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = PipelineSettings {
        size: 20,
        ..PipelineSettings::default()
    };
    let orchestrator = orchestrator(settings, None, platform.clone(), notifier.clone());

    assert!(matches!(
        orchestrator.present(payload()),
        Err(Error::SymbolTooDense(_))
    ));

    orchestrator.select(payload());
    let outcome = orchestrator.export().await;
    assert!(matches!(outcome, ExportOutcome::Failed(ref r) if r.kind == ErrorKind::SymbolTooDense));
    assert_eq!(notifier.notices().len(), 1);
    assert_released(&orchestrator);
}

#[tokio::test]
async fn state_changes_are_published() {
    let platform = Arc::new(FakePlatform::sharing(ShareResponse::Completed));
    let orchestrator = orchestrator(
        PipelineSettings::default(),
        None,
        platform,
        Arc::default(),
    );
    let mut states = orchestrator.subscribe();
    orchestrator.present(payload()).unwrap();

    assert_eq!(*states.borrow_and_update(), ExportState::Idle);
    orchestrator.export().await;
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ExportState::Idle);
}
