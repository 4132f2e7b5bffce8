//! Shared enums: image formats, confidence levels and strategy labels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Image container format, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG (`FF D8 FF`).
    Jpeg,
    /// PNG (`89 50 4E 47 0D 0A 1A 0A`).
    Png,
    /// WEBP (`RIFF....WEBP`).
    Webp,
    /// Anything else.
    Unsupported,
}

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

impl ImageFormat {
    /// Sniff the format from leading bytes.
    #[must_use]
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 3 && bytes[..3] == [0xFF, 0xD8, 0xFF] {
            Self::Jpeg
        } else if bytes.len() >= PNG_SIGNATURE.len() && bytes[..8] == PNG_SIGNATURE {
            Self::Png
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Self::Webp
        } else {
            Self::Unsupported
        }
    }

    /// Lowercase name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Unsupported => "unsupported",
        }
    }

    /// Whether embedding/extraction is defined for this format.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Strength of a recovered binding. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Heuristic byte scan; always degraded.
    Low,
    /// Descriptive/auxiliary metadata or a chunk that failed its CRC.
    Medium,
    /// Container boxes or CRC-valid chunks.
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// How a binding was written into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedStrategy {
    /// Descriptive metadata only, as designed for the format.
    Primary,
    /// Container/chunk embedding plus descriptive metadata.
    Secondary,
    /// Container embedding failed; only descriptive metadata was written.
    SecondaryFallbackToPrimary,
}

impl EmbedStrategy {
    /// Whether the embedding fell short of what the format supports.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::SecondaryFallbackToPrimary)
    }
}

impl fmt::Display for EmbedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::SecondaryFallbackToPrimary => "secondary-fallback-to-primary",
        })
    }
}

/// Extraction strategies, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStrategyKind {
    /// Reassembled container boxes.
    ContainerBox,
    /// XMP packet.
    DescriptiveMetadata,
    /// EXIF block.
    AuxiliaryMetadata,
    /// PNG custom chunks.
    FormatChunks,
    /// Raw byte-pattern scan.
    PartialRecovery,
}

impl fmt::Display for ExtractionStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContainerBox => "container-box",
            Self::DescriptiveMetadata => "descriptive-metadata",
            Self::AuxiliaryMetadata => "auxiliary-metadata",
            Self::FormatChunks => "format-chunks",
            Self::PartialRecovery => "partial-recovery",
        })
    }
}
