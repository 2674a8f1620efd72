//! Image references and their base64 transport encoding.

use crate::models::{PlotbenchError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use tracing::warn;

/// MIME type assumed for payloads that arrive already encoded.
const DEFAULT_MIME: &str = "image/jpeg";

/// How many leading characters are checked for path separators.
const PATH_SNIFF_LEN: usize = 10;

/// An image handed to the request builder.
///
/// The variant decides how the image is treated; the contents are never
/// inspected to guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// File on disk, read and encoded at request time
    Path(PathBuf),
    /// Payload that is already base64 encoded
    Encoded(String),
}

impl ImageRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Wrap an already-encoded payload.
    ///
    /// Warns when the payload starts like a filesystem path: it will still be
    /// sent as raw image data.
    pub fn encoded(data: impl Into<String>) -> Self {
        let data = data.into();
        if looks_like_path(&data) {
            warn!(
                prefix = %data.chars().take(PATH_SNIFF_LEN).collect::<String>(),
                "Encoded image payload looks like a path; it will be sent as-is"
            );
        }
        Self::Encoded(data)
    }
}

fn looks_like_path(data: &str) -> bool {
    data.chars()
        .take(PATH_SNIFF_LEN)
        .any(|c| c == '/' || c == '\\')
}

/// Image ready to embed into a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: String,
    pub data: String,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// Encode one image file from disk.
pub fn encode_file(path: &Path) -> Result<EncodedImage> {
    let bytes = std::fs::read(path)
        .map_err(|e| PlotbenchError::io(format!("reading image {}", path.display()), e))?;
    let mime = mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_MIME.to_string());
    Ok(EncodedImage {
        mime,
        data: STANDARD.encode(bytes),
    })
}

/// Encode a sequence of image references, preserving order.
pub fn encode_images(images: &[ImageRef]) -> Result<Vec<EncodedImage>> {
    images
        .iter()
        .map(|image| match image {
            ImageRef::Path(path) => encode_file(path),
            ImageRef::Encoded(data) => Ok(EncodedImage {
                mime: DEFAULT_MIME.to_string(),
                data: data.clone(),
            }),
        })
        .collect()
}
