//! Runtime configuration handling

use crate::error::{Error, Result};
use crate::export::{ArtifactExporter, DEFAULT_FILE_NAME, DEFAULT_SHARE_TITLE, DesktopPlatform};
use crate::orchestrator::{OverlayFailurePolicy, PipelineSettings};
use crate::overlay::{DEFAULT_DECODE_TIMEOUT, MarkerOverlay, MarkerSource};
use crate::raster::DEFAULT_MAX_DIMENSION;
use crate::symbol::EccLevel;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration loaded from disk and environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    /// Symbol geometry
    pub symbol: SymbolOptions,
    /// Marker overlay
    pub marker: MarkerOptions,
    /// Share/download behaviour
    pub export: ExportOptions,
    /// Reveal URL construction
    pub reveal: RevealOptions,
    /// Logging configuration
    pub logging: LoggingOptions,
}

impl RevealConfig {
    /// Load configuration from an explicit path or fall back to discovered defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            Self::from_file(path)?
        } else if let Some(path) = Self::discover_file()? {
            tracing::info!("Using configuration file: {}", path.display());
            Self::from_file(&path)?
        } else {
            tracing::debug!("No revealqr.toml / revealqr.yaml found, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    fn discover_file() -> Result<Option<PathBuf>> {
        let cwd =
            env::current_dir().map_err(|e| Error::Config(format!("Failed to read cwd: {e}")))?;
        for candidate in ["revealqr.toml", "revealqr.yaml", "revealqr.yml"] {
            let path = cwd.join(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME") {
            let base = PathBuf::from(xdg_config).join("revealqr");
            for candidate in ["config.toml", "config.yaml"] {
                let path = base.join(candidate);
                if path.exists() {
                    return Ok(Some(path));
                }
            }
        }

        Ok(None)
    }

    /// Read configuration from a concrete file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        Self::parse(&contents, &extension)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Parse configuration text; `format` is `toml`, `yaml` or `yml`.
    pub fn parse(contents: &str, format: &str) -> Result<Self> {
        match format {
            "toml" => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}"))),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}"))),
            other => Err(Error::Config(format!(
                "Unsupported config format '{other}', expected toml/yaml"
            ))),
        }
    }

    /// Apply `REVEALQR_*` overrides, reading variables through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.symbol.apply_overrides(&lookup);
        self.marker.apply_overrides(&lookup);
        self.export.apply_overrides(&lookup);
        self.reveal.apply_overrides(&lookup);
        self.logging.apply_overrides(&lookup);
    }

    /// Settings for [`crate::ExportOrchestrator`]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            size: self.symbol.size,
            level: self.symbol.level,
            quiet_zone: self.symbol.quiet_zone,
            excavate: self.marker.excavate,
            overlay_failure: self.marker.on_failure,
            verify_decode: self.export.verify_decode,
            max_dimension: self.export.max_dimension,
        }
    }

    /// Marker overlay, when a source is configured
    pub fn marker_overlay(&self) -> Result<Option<MarkerOverlay>> {
        let Some(source) = self.marker.source.as_deref() else {
            return Ok(None);
        };
        let source = MarkerSource::parse(source)?;
        Ok(Some(
            MarkerOverlay::new(Arc::new(source), self.marker.width, self.marker.height)
                .with_timeout(Duration::from_millis(self.marker.decode_timeout_ms)),
        ))
    }

    /// Desktop share/download platform
    pub fn desktop_platform(&self) -> DesktopPlatform {
        let mut platform = DesktopPlatform::new(&self.export.download_dir)
            .with_cancel_exit_code(self.export.cancel_exit_code);
        if let Some(command) = &self.export.share_command {
            platform = platform.with_share_command(command.clone());
        }
        platform
    }

    /// Apply file name and share title to an exporter
    pub fn configure_exporter(&self, exporter: ArtifactExporter) -> ArtifactExporter {
        exporter
            .with_file_name(self.export.file_name.clone())
            .with_share_title(self.export.share_title.clone())
    }
}

/// Symbol geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolOptions {
    /// Output edge length in pixels
    pub size: u32,
    /// Error-correction level (`L`, `M`, `Q`, `H`)
    pub level: EccLevel,
    /// Quiet zone in modules
    pub quiet_zone: u32,
}

impl Default for SymbolOptions {
    fn default() -> Self {
        Self {
            size: 300,
            level: EccLevel::H,
            quiet_zone: 0,
        }
    }
}

impl SymbolOptions {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(size) = lookup("REVEALQR_SIZE").and_then(|v| v.parse::<u32>().ok()) {
            self.size = size;
        }
        if let Some(level) = lookup("REVEALQR_LEVEL").and_then(|v| v.parse::<EccLevel>().ok()) {
            self.level = level;
        }
        if let Some(zone) = lookup("REVEALQR_QUIET_ZONE").and_then(|v| v.parse::<u32>().ok()) {
            self.quiet_zone = zone;
        }
    }
}

/// Marker overlay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerOptions {
    /// Image path or base64 `data:` URI; no marker when unset
    pub source: Option<String>,
    /// Overlay width in pixels
    pub width: u32,
    /// Overlay height in pixels
    pub height: u32,
    /// Leave modules under the marker blank
    pub excavate: bool,
    /// Deadline for fetching and decoding the marker
    pub decode_timeout_ms: u64,
    /// Behaviour when the marker cannot be loaded
    pub on_failure: OverlayFailurePolicy,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        Self {
            source: None,
            width: 120,
            height: 120,
            excavate: true,
            decode_timeout_ms: DEFAULT_DECODE_TIMEOUT.as_millis() as u64,
            on_failure: OverlayFailurePolicy::Abort,
        }
    }
}

impl MarkerOptions {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(source) = lookup("REVEALQR_MARKER") {
            self.source = if source.trim().is_empty() {
                None
            } else {
                Some(source)
            };
        }
        if let Some(width) = lookup("REVEALQR_MARKER_WIDTH").and_then(|v| v.parse().ok()) {
            self.width = width;
        }
        if let Some(height) = lookup("REVEALQR_MARKER_HEIGHT").and_then(|v| v.parse().ok()) {
            self.height = height;
        }
        if let Some(excavate) = lookup("REVEALQR_EXCAVATE").and_then(|v| parse_flag(&v)) {
            self.excavate = excavate;
        }
        if let Some(timeout) = lookup("REVEALQR_MARKER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.decode_timeout_ms = timeout;
        }
        if let Some(policy) =
            lookup("REVEALQR_ON_MARKER_FAILURE").and_then(|v| OverlayFailurePolicy::parse(&v))
        {
            self.on_failure = policy;
        }
    }
}

/// Share/download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Artifact file name
    pub file_name: String,
    /// Title passed to the share action
    pub share_title: String,
    /// Directory downloads land in
    pub download_dir: PathBuf,
    /// Share command (program and arguments); sharing is unsupported when unset
    pub share_command: Option<Vec<String>>,
    /// Exit code of the share command meaning "dismissed by the user"
    pub cancel_exit_code: i32,
    /// Read the rasterized symbol back and warn on mismatch
    pub verify_decode: bool,
    /// Largest surface edge in pixels
    pub max_dimension: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            share_title: DEFAULT_SHARE_TITLE.to_string(),
            download_dir: PathBuf::from("."),
            share_command: None,
            cancel_exit_code: 1,
            verify_decode: false,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl ExportOptions {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("REVEALQR_FILE_NAME") {
            self.file_name = name;
        }
        if let Some(title) = lookup("REVEALQR_SHARE_TITLE") {
            self.share_title = title;
        }
        if let Some(dir) = lookup("REVEALQR_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(command) = lookup("REVEALQR_SHARE_COMMAND") {
            let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            self.share_command = if parts.is_empty() { None } else { Some(parts) };
        }
        if let Some(code) = lookup("REVEALQR_CANCEL_EXIT_CODE").and_then(|v| v.parse().ok()) {
            self.cancel_exit_code = code;
        }
        if let Some(verify) = lookup("REVEALQR_VERIFY").and_then(|v| parse_flag(&v)) {
            self.verify_decode = verify;
        }
    }
}

/// Reveal URL construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealOptions {
    /// Prefix joined with the backend event id
    pub base_url: String,
}

impl Default for RevealOptions {
    fn default() -> Self {
        Self {
            base_url: "https://genderparty.duckdns.org/qr/".to_string(),
        }
    }
}

impl RevealOptions {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(base) = lookup("REVEALQR_BASE_URL") {
            self.base_url = base;
        }
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default filter directive (overridable via `REVEALQR_LOG_LEVEL`)
    pub level: String,
    /// Optional log file
    pub file: Option<PathBuf>,
    /// ANSI colors on stdout
    pub color: bool,
    /// Rotation applied to `file`
    pub rotation: Option<LogRotation>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            color: true,
            rotation: None,
        }
    }
}

impl LoggingOptions {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("REVEALQR_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(file) = lookup("REVEALQR_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        if let Some(color) = lookup("REVEALQR_LOG_COLOR").and_then(|v| parse_flag(&v)) {
            self.color = color;
        }
        if let Some(rotation) = lookup("REVEALQR_LOG_ROTATION").and_then(|v| LogRotation::parse(&v))
        {
            self.rotation = Some(rotation);
        }
    }
}

/// Log rotation policies for file sinks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate log files once per hour
    Hourly,
    /// Rotate log files once per day
    Daily,
}

impl LogRotation {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            _ => None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
