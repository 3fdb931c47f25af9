//! Untrusted upload inspection.
//!
//! [`PayloadValidator`] looks at raw bytes only and ignores whatever content
//! type the client declared. Two independent checks must both pass:
//!
//! 1. **Signature**: the buffer must start with one of the known image
//!    container magic numbers in [`IMAGE_SIGNATURES`]. This is a necessary,
//!    not sufficient, condition; container structure is not parsed here.
//! 2. **Pattern scan**: the whole buffer must not contain any marker from
//!    [`SUSPICIOUS_PATTERNS`], compared ASCII case-insensitively.
//!
//! Size and pixel-dimension limits live in [`UploadPolicy`], which the
//! request gate applies around the validator because dimensions require a
//! decode and are configured separately.

use std::fmt;
use std::io::Cursor;

use image::ImageReader;

// =============================================================================
// Signature and Pattern Tables
// =============================================================================

/// Image container recognised by its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSignature {
    Jpeg,
    Png,
    Gif87a,
    Gif89a,
    /// RIFF container (WebP in practice).
    Riff,
}

impl fmt::Display for ImageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageSignature::Jpeg => "JPEG",
            ImageSignature::Png => "PNG",
            ImageSignature::Gif87a | ImageSignature::Gif89a => "GIF",
            ImageSignature::Riff => "WEBP",
        };
        f.write_str(name)
    }
}

impl ImageSignature {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageSignature::Jpeg => "image/jpeg",
            ImageSignature::Png => "image/png",
            ImageSignature::Gif87a | ImageSignature::Gif89a => "image/gif",
            ImageSignature::Riff => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageSignature::Jpeg => "jpg",
            ImageSignature::Png => "png",
            ImageSignature::Gif87a | ImageSignature::Gif89a => "gif",
            ImageSignature::Riff => "webp",
        }
    }
}

/// Known magic numbers, checked in order.
pub const IMAGE_SIGNATURES: [(&[u8], ImageSignature); 5] = [
    (b"\xFF\xD8\xFF", ImageSignature::Jpeg),
    (b"\x89PNG\r\n\x1a\n", ImageSignature::Png),
    (b"GIF87a", ImageSignature::Gif87a),
    (b"GIF89a", ImageSignature::Gif89a),
    (b"RIFF", ImageSignature::Riff),
];

/// Active-content markers that must not appear anywhere in an upload.
///
/// Stored lowercase; matching ignores ASCII case.
pub const SUSPICIOUS_PATTERNS: [&str; 4] = ["<script", "javascript:", "<?php", "<%"];

// =============================================================================
// Outcome Types
// =============================================================================

/// Why an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Leading bytes match no entry in [`IMAGE_SIGNATURES`].
    UnrecognizedSignature,
    /// An active-content marker was found in the buffer.
    SuspiciousPattern { pattern: &'static str },
    /// Signature matched but the image could not be decoded.
    Undecodable(String),
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::UnrecognizedSignature => write!(f, "unrecognized signature"),
            ValidationFailure::SuspiciousPattern { pattern } => {
                write!(f, "suspicious pattern `{pattern}`")
            }
            ValidationFailure::Undecodable(reason) => write!(f, "undecodable image: {reason}"),
        }
    }
}

/// Result of content inspection.
pub type ValidationOutcome = Result<ImageSignature, ValidationFailure>;

// =============================================================================
// Validator
// =============================================================================

/// Stateless byte-level screening of uploaded images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadValidator;

impl PayloadValidator {
    pub fn new() -> Self {
        Self
    }

    /// Run the signature check and the pattern scan.
    ///
    /// The signature is checked first, but a recognised signature never
    /// excuses an embedded marker.
    pub fn validate(&self, bytes: &[u8]) -> ValidationOutcome {
        let signature = detect_signature(bytes).ok_or(ValidationFailure::UnrecognizedSignature)?;

        if let Some(pattern) = find_suspicious_pattern(bytes) {
            return Err(ValidationFailure::SuspiciousPattern { pattern });
        }

        Ok(signature)
    }
}

/// Match the buffer prefix against [`IMAGE_SIGNATURES`].
pub fn detect_signature(bytes: &[u8]) -> Option<ImageSignature> {
    IMAGE_SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, signature)| *signature)
}

/// Return the first marker from [`SUSPICIOUS_PATTERNS`] found in `bytes`.
///
/// Scans windows in place instead of lowercasing a copy of the buffer, so
/// a 10 MB upload does not cost a second 10 MB allocation.
pub fn find_suspicious_pattern(bytes: &[u8]) -> Option<&'static str> {
    SUSPICIOUS_PATTERNS.iter().copied().find(|pattern| {
        let needle = pattern.as_bytes();
        bytes
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
    })
}

// =============================================================================
// Size and Dimension Policy
// =============================================================================

/// Pixel dimensions of a decoded image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Read the image header and return its dimensions without decoding pixels.
pub fn decode_dimensions(bytes: &[u8]) -> Result<ImageDimensions, ValidationFailure> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ValidationFailure::Undecodable(e.to_string()))?
        .into_dimensions()
        .map_err(|e| ValidationFailure::Undecodable(e.to_string()))?;

    Ok(ImageDimensions { width, height })
}

/// Configured upload limits applied by the gate around [`PayloadValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Maximum raw upload size in bytes.
    pub max_file_size: usize,
    /// Maximum image width in pixels.
    pub max_width: u32,
    /// Maximum image height in pixels.
    pub max_height: u32,
}

impl UploadPolicy {
    /// The byte limit is inclusive.
    pub fn size_allowed(&self, size: usize) -> bool {
        size <= self.max_file_size
    }

    /// Both dimensions are inclusive limits.
    pub fn dimensions_allowed(&self, dims: ImageDimensions) -> bool {
        dims.width <= self.max_width && dims.height <= self.max_height
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_width: 4000,
            max_height: 4000,
        }
    }
}
