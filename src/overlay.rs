//! Marker image resolution and decoding
//!
//! The marker is resolved from an [`ImageSource`] and decoded to RGBA pixels at
//! the overlay size before anything is rasterized. The whole fetch-and-decode
//! step runs under a deadline so a stuck source cannot stall an export.

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use image::RgbaImage;
use image::imageops::FilterType;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound for fetching and decoding the marker
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can hand over encoded marker bytes
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Human-readable description for logs and errors
    fn describe(&self) -> String;

    /// Fetch the encoded image bytes
    async fn fetch(&self) -> Result<Bytes>;

    /// Reference to embed in the SVG form, if the source has one
    fn href(&self) -> Option<String> {
        None
    }
}

/// Marker image configured for the app
#[derive(Clone)]
pub enum MarkerSource {
    /// Encoded image bytes compiled in or decoded from a data URI
    Embedded(Bytes),
    /// Image file resolved at render time
    Path(PathBuf),
}

impl MarkerSource {
    /// Interpret `value` as a `data:` URI when it has that prefix, else as a path.
    pub fn parse(value: &str) -> Result<Self> {
        if value.trim_start().starts_with("data:") {
            Self::from_data_uri(value)
        } else {
            Ok(Self::Path(PathBuf::from(value)))
        }
    }

    /// Decode a base64 `data:` URI such as `data:image/png;base64,iVBOR...`.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| Error::Config("marker data URI must start with 'data:'".to_string()))?;
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| Error::Config("marker data URI is missing ','".to_string()))?;
        if !meta.ends_with(";base64") {
            return Err(Error::Config(
                "only base64 marker data URIs are supported".to_string(),
            ));
        }
        let decoded = STANDARD
            .decode(data.trim())
            .map_err(|e| Error::Config(format!("marker data URI is not valid base64: {e}")))?;
        Ok(Self::Embedded(Bytes::from(decoded)))
    }
}

impl fmt::Debug for MarkerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerSource::Embedded(bytes) => write!(f, "Embedded({} bytes)", bytes.len()),
            MarkerSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

#[async_trait]
impl ImageSource for MarkerSource {
    fn describe(&self) -> String {
        match self {
            MarkerSource::Embedded(bytes) => format!("embedded marker ({} bytes)", bytes.len()),
            MarkerSource::Path(path) => format!("marker file {}", path.display()),
        }
    }

    async fn fetch(&self) -> Result<Bytes> {
        match self {
            MarkerSource::Embedded(bytes) => Ok(bytes.clone()),
            MarkerSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }

    fn href(&self) -> Option<String> {
        match self {
            MarkerSource::Embedded(bytes) => {
                let mime = image::guess_format(bytes)
                    .map(|format| format.to_mime_type())
                    .unwrap_or("application/octet-stream");
                Some(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
            }
            MarkerSource::Path(path) => Some(path.display().to_string()),
        }
    }
}

/// Decoded marker pixels at their final overlay size
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerImage {
    pixels: RgbaImage,
}

impl MarkerImage {
    /// Wrap already-decoded pixels
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// Decode `bytes` and resize them to exactly `width` x `height`.
    pub fn decode(bytes: &[u8], width: u32, height: u32) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        let pixels = if decoded.width() == width && decoded.height() == height {
            decoded.to_rgba8()
        } else {
            decoded
                .resize_exact(width, height, FilterType::Lanczos3)
                .to_rgba8()
        };
        Ok(Self { pixels })
    }

    /// RGBA pixels
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Marker composited at the center of the symbol
#[derive(Clone)]
pub struct MarkerOverlay {
    source: Arc<dyn ImageSource>,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl MarkerOverlay {
    /// Overlay of `width` x `height` pixels fed from `source`
    pub fn new(source: Arc<dyn ImageSource>, width: u32, height: u32) -> Self {
        Self {
            source,
            width,
            height,
            timeout: DEFAULT_DECODE_TIMEOUT,
        }
    }

    /// Override the fetch-and-decode deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overlay width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Overlay height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Deadline for [`MarkerOverlay::load`]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// SVG reference of the underlying source
    pub fn href(&self) -> Option<String> {
        self.source.href()
    }

    /// Fetch and decode the marker, failing with [`Error::OverlayLoadFailed`]
    /// on any error or when the deadline passes.
    pub async fn load(&self) -> Result<MarkerImage> {
        let description = self.source.describe();
        let (width, height) = (self.width, self.height);

        let decode = async {
            let bytes = self.source.fetch().await?;
            tokio::task::spawn_blocking(move || MarkerImage::decode(&bytes, width, height))
                .await
                .map_err(|e| Error::Unknown(format!("marker decode task failed: {e}")))?
        };

        match tokio::time::timeout(self.timeout, decode).await {
            Ok(Ok(marker)) => {
                tracing::debug!(source = %description, width, height, "marker decoded");
                Ok(marker)
            }
            Ok(Err(err)) => Err(Error::OverlayLoadFailed(format!("{description}: {err}"))),
            Err(_) => Err(Error::OverlayLoadFailed(format!(
                "{description} did not decode within {:?}",
                self.timeout
            ))),
        }
    }
}

impl fmt::Debug for MarkerOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerOverlay")
            .field("source", &self.source.describe())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timeout", &self.timeout)
            .finish()
    }
}
