//! Host platform seams: sharing, downloading and user notices

use super::{ExportArtifact, FailureReason};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// How the user left the native share sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareResponse {
    /// The artifact was handed to a share target
    Completed,
    /// The user dismissed the share sheet
    Dismissed,
}

/// Share and download capabilities of the host.
///
/// File-sharing support is a runtime property; [`SharePlatform::can_share_files`]
/// is queried on every export.
#[async_trait]
pub trait SharePlatform: Send + Sync {
    /// Whether files of `mime_type` can be shared right now
    fn can_share_files(&self, mime_type: &str) -> bool;

    /// Open the native share action with `artifact`
    async fn share(&self, artifact: &ExportArtifact, title: &str) -> Result<ShareResponse>;

    /// Save `artifact` locally, returning where it landed if known
    async fn download(&self, artifact: &ExportArtifact) -> Result<Option<PathBuf>>;
}

/// User-facing message emitted by the export pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Sharing is unavailable, the artifact was downloaded instead
    ShareUnavailable,
    /// The export attempt failed
    ExportFailed(FailureReason),
}

impl Notice {
    /// Text shown to the user
    pub fn message(&self) -> &'static str {
        match self {
            Notice::ShareUnavailable => {
                "Your device does not support direct sharing, so the QR code has been downloaded."
            }
            Notice::ExportFailed(reason) if reason.kind == ErrorKind::NotReady => {
                "QR code is not ready yet."
            }
            Notice::ExportFailed(_) => "Failed to generate QR code image.",
        }
    }
}

/// Surface for user-facing notices (alerts, toasts, terminal lines)
pub trait Notifier: Send + Sync {
    /// Show `notice` to the user
    fn notify(&self, notice: &Notice);
}

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        match notice {
            Notice::ShareUnavailable => tracing::info!("{}", notice.message()),
            Notice::ExportFailed(reason) => {
                tracing::warn!(kind = ?reason.kind, detail = %reason.detail, "{}", notice.message())
            }
        }
    }
}
