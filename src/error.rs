//! Error types for the reveal QR export pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rendering and export operations
#[derive(Error, Debug)]
pub enum Error {
    /// The payload to encode was empty
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The payload needs more modules than the requested size can hold
    #[error("Symbol too dense: {0}")]
    SymbolTooDense(String),

    /// Symbol parameters are inconsistent (e.g. overlay larger than the symbol)
    #[error("Invalid symbol spec: {0}")]
    InvalidSymbolSpec(String),

    /// Marker image could not be fetched or decoded in time
    #[error("Marker overlay failed to load: {0}")]
    OverlayLoadFailed(String),

    /// No drawing surface could be produced
    #[error("Rasterization failed: {0}")]
    RasterizeFailed(String),

    /// Pixel data could not be encoded into an image file
    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    /// Export requested before a symbol was presented
    #[error("QR code is not ready yet")]
    NotReady,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("{0}")]
    Unknown(String),
}

/// Serializable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`Error::InvalidPayload`]
    InvalidPayload,
    /// See [`Error::SymbolTooDense`]
    SymbolTooDense,
    /// See [`Error::InvalidSymbolSpec`]
    InvalidSymbolSpec,
    /// See [`Error::OverlayLoadFailed`]
    OverlayLoadFailed,
    /// See [`Error::RasterizeFailed`]
    RasterizeFailed,
    /// See [`Error::EncodeFailed`]
    EncodeFailed,
    /// See [`Error::NotReady`]
    NotReady,
    /// See [`Error::Io`]
    Io,
    /// See [`Error::Image`]
    Image,
    /// See [`Error::Config`]
    Config,
    /// See [`Error::Unknown`]
    Unknown,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Error::SymbolTooDense(_) => ErrorKind::SymbolTooDense,
            Error::InvalidSymbolSpec(_) => ErrorKind::InvalidSymbolSpec,
            Error::OverlayLoadFailed(_) => ErrorKind::OverlayLoadFailed,
            Error::RasterizeFailed(_) => ErrorKind::RasterizeFailed,
            Error::EncodeFailed(_) => ErrorKind::EncodeFailed,
            Error::NotReady => ErrorKind::NotReady,
            Error::Io(_) => ErrorKind::Io,
            Error::Image(_) => ErrorKind::Image,
            Error::Config(_) => ErrorKind::Config,
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Unknown(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            Error::OverlayLoadFailed("timeout".into()).kind(),
            ErrorKind::OverlayLoadFailed
        );
        assert_eq!(Error::NotReady.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SymbolTooDense).unwrap();
        assert_eq!(json, "\"symbol_too_dense\"");
    }
}
