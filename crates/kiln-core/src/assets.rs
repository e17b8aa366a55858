//! Static asset detection.
//!
//! Static assets (images, fonts, media) pass through the pipeline unchanged
//! when no transform rule claims them.

use crate::resource::ResourceId;

/// Asset families recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetType {
    /// Image files (png, jpg, gif, svg, webp, ico, avif).
    Image,
    /// Font files (woff, woff2, ttf, otf, eot).
    Font,
    /// Audio and video.
    Media,
    /// Other binary payloads copied verbatim.
    Other,
}

impl AssetType {
    /// Determine asset type from file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" | "bmp" => {
                Some(AssetType::Image)
            }
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Some(AssetType::Font),
            "mp3" | "mp4" | "ogg" | "wav" | "webm" => Some(AssetType::Media),
            "txt" | "pdf" | "wasm" => Some(AssetType::Other),
            _ => None,
        }
    }

    /// Check if a resource is a static passthrough asset.
    #[must_use]
    pub fn is_static(id: &ResourceId) -> bool {
        id.extension().is_some_and(|ext| Self::from_extension(ext).is_some())
    }
}
