//! Share/download platform for desktop and CLI hosts
//!
//! Sharing is delegated to an external command that receives the PNG as a
//! temporary file. Downloads are written into a directory.

use super::ExportArtifact;
use super::platform::{SharePlatform, ShareResponse};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// Placeholder replaced by the temporary file path in share command arguments
pub const FILE_PLACEHOLDER: &str = "{file}";
/// Placeholder replaced by the share title in share command arguments
pub const TITLE_PLACEHOLDER: &str = "{title}";

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// [`SharePlatform`] backed by a share command and a download directory
#[derive(Debug, Clone)]
pub struct DesktopPlatform {
    download_dir: PathBuf,
    share_command: Option<Vec<String>>,
    cancel_exit_code: i32,
}

impl DesktopPlatform {
    /// Platform without a share command; every export downloads.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            share_command: None,
            cancel_exit_code: 1,
        }
    }

    /// Use `command` (program followed by arguments) as the share action.
    ///
    /// `{file}` and `{title}` in arguments are substituted; without a `{file}`
    /// argument the path is appended.
    pub fn with_share_command(mut self, command: Vec<String>) -> Self {
        self.share_command = if command.is_empty() {
            None
        } else {
            Some(command)
        };
        self
    }

    /// Exit code the share command uses when the user cancels
    pub fn with_cancel_exit_code(mut self, code: i32) -> Self {
        self.cancel_exit_code = code;
        self
    }

    /// Directory downloads are written to
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn share_args(command: &[String], file: &Path, title: &str) -> Vec<String> {
        let file = file.display().to_string();
        let mut saw_file = false;
        let mut args: Vec<String> = command[1..]
            .iter()
            .map(|arg| {
                if arg.contains(FILE_PLACEHOLDER) {
                    saw_file = true;
                }
                arg.replace(FILE_PLACEHOLDER, &file)
                    .replace(TITLE_PLACEHOLDER, title)
            })
            .collect();
        if !saw_file {
            args.push(file);
        }
        args
    }
}

#[async_trait]
impl SharePlatform for DesktopPlatform {
    fn can_share_files(&self, mime_type: &str) -> bool {
        self.share_command.is_some() && mime_type.starts_with("image/")
    }

    async fn share(&self, artifact: &ExportArtifact, title: &str) -> Result<ShareResponse> {
        let command = self
            .share_command
            .as_ref()
            .ok_or_else(|| Error::Config("no share command configured".to_string()))?;

        let staged = StagedFile::write(artifact).await?;
        let args = Self::share_args(command, staged.path(), title);
        tracing::debug!(program = %command[0], ?args, "running share command");

        let status = Command::new(&command[0])
            .args(&args)
            .status()
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to run share command '{}': {e}", command[0]),
                ))
            })?;

        match status.code() {
            Some(0) => Ok(ShareResponse::Completed),
            Some(code) if code == self.cancel_exit_code => Ok(ShareResponse::Dismissed),
            _ => Err(Error::Unknown(format!("share command failed: {status}"))),
        }
    }

    async fn download(&self, artifact: &ExportArtifact) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory {}: {e}",
                        self.download_dir.display()
                    ),
                ))
            })?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .download_dir
                .join(numbered_name(&artifact.suggested_file_name, attempt));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_or_discard(file, &path, &artifact.bytes).await?;
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Unknown(format!(
            "no free file name for {} in {}",
            artifact.suggested_file_name,
            self.download_dir.display()
        )))
    }
}

/// Write `bytes` to the freshly created `path`; on failure the partial file is
/// removed before the error is returned.
async fn write_or_discard<W>(mut out: W, path: &Path, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        out.write_all(bytes).await?;
        out.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(out);
        if let Err(cleanup) = tokio::fs::remove_file(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %cleanup,
                "Failed to remove partial download"
            );
        }
        return Err(Error::Io(e));
    }
    Ok(())
}

/// `qrcode.png`, `qrcode (1).png`, `qrcode (2).png`, ...
fn numbered_name(file_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{file_name} ({attempt})"),
    }
}

/// Artifact written to a private temporary directory, removed on drop.
struct StagedFile {
    dir: PathBuf,
    path: PathBuf,
}

impl StagedFile {
    async fn write(artifact: &ExportArtifact) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("revealqr-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        let staged = Self {
            path: dir.join(&artifact.suggested_file_name),
            dir,
        };
        tokio::fs::write(&staged.path, &artifact.bytes).await?;
        Ok(staged)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), "failed to remove staged artifact: {err}");
        }
    }
}
