//! Artifact encoding and dispatch
//!
//! [`ArtifactExporter`] turns rasterized pixels into a PNG [`ExportArtifact`]
//! and hands it to the host [`SharePlatform`]: native share when the platform
//! reports file-sharing support for the artifact's mime type, otherwise a
//! download plus a [`Notice::ShareUnavailable`] notice.

mod desktop;
mod platform;

pub use desktop::{DesktopPlatform, FILE_PLACEHOLDER, TITLE_PLACEHOLDER};
pub use platform::{Notice, Notifier, SharePlatform, ShareResponse, TracingNotifier};

use crate::error::{Error, ErrorKind, Result};
use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Mime type of every exported artifact
pub const PNG_MIME: &str = "image/png";
/// File name used for shared and downloaded artifacts
pub const DEFAULT_FILE_NAME: &str = "qrcode.png";
/// Title passed to the share action
pub const DEFAULT_SHARE_TITLE: &str = "Baby's gender QR";

/// Encoded image produced fresh for each export request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    /// Encoded image bytes
    pub bytes: Bytes,
    /// Mime type of `bytes`
    pub mime_type: String,
    /// File name offered to share targets and downloads
    pub suggested_file_name: String,
    /// Pixel width
    pub width: u32,
    /// Pixel height
    pub height: u32,
}

impl ExportArtifact {
    /// Encode `pixels` as PNG.
    pub fn encode_png(pixels: &RgbaImage, file_name: &str) -> Result<Self> {
        let (width, height) = pixels.dimensions();
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(pixels.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|e| Error::EncodeFailed(e.to_string()))?;

        Ok(Self {
            bytes: Bytes::from(buffer),
            mime_type: PNG_MIME.to_string(),
            suggested_file_name: file_name.to_string(),
            width,
            height,
        })
    }

    /// Size of the encoded file in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the encoded file is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Why an export failed, in a form that can be cloned and serialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Error classification
    pub kind: ErrorKind,
    /// Diagnostic detail
    pub detail: String,
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl From<Error> for FailureReason {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

/// Result of one export request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportOutcome {
    /// Handed to the native share action
    Shared,
    /// Sharing unavailable; saved locally instead
    Downloaded {
        /// Where the file was written, when the platform reports it
        location: Option<PathBuf>,
    },
    /// The user dismissed the share sheet
    Cancelled,
    /// Another export was already in flight; this request was ignored
    Busy,
    /// A newer payload was selected while this export was running
    Superseded,
    /// The export failed
    Failed(FailureReason),
}

impl ExportOutcome {
    /// Short label for logs and terminal output
    pub fn label(&self) -> &'static str {
        match self {
            ExportOutcome::Shared => "shared",
            ExportOutcome::Downloaded { .. } => "downloaded",
            ExportOutcome::Cancelled => "cancelled",
            ExportOutcome::Busy => "busy",
            ExportOutcome::Superseded => "superseded",
            ExportOutcome::Failed(_) => "failed",
        }
    }

    /// Whether the artifact reached the user (shared or downloaded)
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            ExportOutcome::Shared | ExportOutcome::Downloaded { .. }
        )
    }
}

/// Encodes pixels and dispatches the artifact to the host platform
#[derive(Clone)]
pub struct ArtifactExporter {
    platform: Arc<dyn SharePlatform>,
    notifier: Arc<dyn Notifier>,
    file_name: String,
    share_title: String,
}

impl ArtifactExporter {
    /// Exporter with the default file name and share title
    pub fn new(platform: Arc<dyn SharePlatform>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            platform,
            notifier,
            file_name: DEFAULT_FILE_NAME.to_string(),
            share_title: DEFAULT_SHARE_TITLE.to_string(),
        }
    }

    /// Override the artifact file name
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Override the share title
    pub fn with_share_title(mut self, title: impl Into<String>) -> Self {
        self.share_title = title.into();
        self
    }

    /// Notifier used for user-facing notices
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Encode `pixels` into a PNG artifact
    pub fn encode(&self, pixels: &RgbaImage) -> Result<ExportArtifact> {
        let artifact = ExportArtifact::encode_png(pixels, &self.file_name)?;
        tracing::debug!(
            bytes = artifact.len(),
            width = artifact.width,
            height = artifact.height,
            "encoded artifact"
        );
        Ok(artifact)
    }

    /// Share `artifact` natively, falling back to a download.
    ///
    /// Consumes the artifact; nothing is kept after dispatch.
    pub async fn dispatch(&self, artifact: ExportArtifact) -> ExportOutcome {
        if self.platform.can_share_files(&artifact.mime_type) {
            return match self.platform.share(&artifact, &self.share_title).await {
                Ok(ShareResponse::Completed) => {
                    tracing::info!(file = %artifact.suggested_file_name, "artifact shared");
                    ExportOutcome::Shared
                }
                Ok(ShareResponse::Dismissed) => {
                    tracing::info!("share sheet dismissed");
                    ExportOutcome::Cancelled
                }
                Err(err) => {
                    tracing::error!(error = %err, "share action failed");
                    ExportOutcome::Failed(FailureReason::from(&err))
                }
            };
        }

        tracing::warn!(
            mime = %artifact.mime_type,
            "file sharing unavailable; falling back to download"
        );
        match self.platform.download(&artifact).await {
            Ok(location) => {
                self.notifier.notify(&Notice::ShareUnavailable);
                if let Some(path) = &location {
                    tracing::info!(path = %path.display(), "artifact downloaded");
                }
                ExportOutcome::Downloaded { location }
            }
            Err(err) => {
                tracing::error!(error = %err, "download failed");
                ExportOutcome::Failed(FailureReason::from(&err))
            }
        }
    }

    /// Encode then dispatch
    pub async fn export(&self, pixels: &RgbaImage) -> ExportOutcome {
        match self.encode(pixels) {
            Ok(artifact) => self.dispatch(artifact).await,
            Err(err) => ExportOutcome::Failed(FailureReason::from(&err)),
        }
    }
}
