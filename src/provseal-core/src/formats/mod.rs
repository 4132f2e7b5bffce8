//! Per-format embedding and segment reading.
//!
//! Each supported [`ImageFormat`] has one [`ImageContainer`]. Adding a
//! format means adding a variant and an implementation here; the embedder
//! and extractor dispatch through [`container_for`].

pub mod jpeg;
pub mod png;
pub mod webp;

use serde::Serialize;

use crate::codec::DecodedChunk;
use crate::error::Result;
use crate::types::{EmbedStrategy, ImageFormat};

pub use jpeg::JpegContainer;
pub use png::PngContainer;
pub use webp::WebpContainer;

/// What to write into an image.
#[derive(Debug, Clone, Copy)]
pub struct EmbedPayload<'a> {
    /// Validated proof reference.
    pub proof_uri: &'a str,
    /// Sealed manifest JSON.
    pub manifest_json: &'a [u8],
    /// Descriptive record (XMP packet).
    pub xmp_packet: &'a [u8],
}

/// Output of [`ImageContainer::embed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatEmbedding {
    /// New image bytes.
    pub bytes: Vec<u8>,
    /// Strategy actually used.
    pub strategy: EmbedStrategy,
}

/// Provenance-related data found in an image, before interpretation.
#[derive(Debug, Clone, Default)]
pub struct MetadataSegments {
    /// Serialized fragment segments (JPEG APP11), in file order.
    pub container_segments: Vec<Vec<u8>>,
    /// XMP packets.
    pub xmp_packets: Vec<Vec<u8>>,
    /// TIFF bytes of EXIF blocks.
    pub exif_blocks: Vec<Vec<u8>>,
    /// provseal PNG chunks, including ones failing their CRC.
    pub chunks: Vec<DecodedChunk>,
    /// Whether the structure could not be walked to the end.
    pub malformed: bool,
}

/// One structural unit of an image, as listed by
/// [`ImageContainer::list_segments`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    /// Marker, chunk type or fourcc.
    pub label: String,
    /// Byte offset in the image.
    pub offset: usize,
    /// Bytes occupied, headers included.
    pub len: usize,
    /// Whether provseal wrote it.
    pub provseal: bool,
    /// CRC check result, for checksummed formats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc_valid: Option<bool>,
}

/// Format-specific embedding and reading.
pub trait ImageContainer: Send + Sync {
    /// Format handled.
    fn format(&self) -> ImageFormat;

    /// Write `payload` into a copy of `image`.
    ///
    /// Earlier provseal records are replaced. A failure of the
    /// container-level path is reported through the returned strategy.
    ///
    /// # Errors
    ///
    /// Returns error only if even the descriptive record cannot be written.
    fn embed(&self, image: &[u8], payload: &EmbedPayload<'_>) -> Result<FormatEmbedding>;

    /// Collect provenance-related segments. Never fails; damage is flagged
    /// in [`MetadataSegments::malformed`].
    fn read_segments(&self, image: &[u8]) -> MetadataSegments;

    /// Structural units in file order, as far as they can be walked.
    fn list_segments(&self, image: &[u8]) -> Vec<SegmentInfo>;
}

/// Containers for every supported format.
pub struct FormatRegistry {
    jpeg: JpegContainer,
    png: PngContainer,
    webp: WebpContainer,
}

impl FormatRegistry {
    /// Registry with the given JPEG fragment size.
    #[must_use]
    pub fn new(jpeg_segment_payload: usize) -> Self {
        Self {
            jpeg: JpegContainer::new(jpeg_segment_payload),
            png: PngContainer,
            webp: WebpContainer,
        }
    }

    /// Container for `format`, if supported.
    #[must_use]
    pub fn container_for(&self, format: ImageFormat) -> Option<&dyn ImageContainer> {
        match format {
            ImageFormat::Jpeg => Some(&self.jpeg),
            ImageFormat::Png => Some(&self.png),
            ImageFormat::Webp => Some(&self.webp),
            ImageFormat::Unsupported => None,
        }
    }
}

/// Position of `needle` in `haystack`.
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
