use tracing::debug;

use super::{ExtractionInput, ExtractionStrategy, Recovered};
use crate::binding::{decode_binding, TAG_PROOF_URI};
use crate::codec::{reassemble, Segment};
use crate::exif;
use crate::formats::find_bytes;
use crate::formats::png::{CHUNK_MANIFEST, CHUNK_REFERENCE};
use crate::manifest::Manifest;
use crate::types::{Confidence, ExtractionStrategyKind, ImageFormat};
use crate::xmp;

fn parse_manifest(json: &[u8]) -> Option<Manifest> {
    match Manifest::from_json(json) {
        Ok(m) => Some(m),
        Err(e) => {
            debug!("Extractor: manifest did not parse: {}", e);
            None
        },
    }
}

/// Reassembles APP11 fragments and decodes the manifest box tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerBoxStrategy;

impl ExtractionStrategy for ContainerBoxStrategy {
    fn kind(&self) -> ExtractionStrategyKind {
        ExtractionStrategyKind::ContainerBox
    }

    fn applies_to(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Jpeg
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Option<Recovered> {
        let segments: Vec<Segment> = input
            .segments
            .container_segments
            .iter()
            .filter_map(|raw| Segment::parse(raw).ok())
            .collect();
        if segments.is_empty() {
            return None;
        }

        let tree = reassemble(&segments)
            .map_err(|e| debug!("Extractor: reassembly failed: {}", e))
            .ok()?;
        let binding = decode_binding(&tree)?;
        let proof_uri = input.accept_uri(&binding.proof_uri)?;
        // A tree that decodes but carries no readable manifest is not a
        // high-confidence result.
        let manifest = parse_manifest(&binding.manifest_json)?;

        Some(Recovered {
            proof_uri,
            manifest: Some(manifest),
            confidence: Confidence::High,
        })
    }
}

/// Reads `provseal:proofUri` and `provseal:manifest` from XMP packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptiveMetadataStrategy;

impl ExtractionStrategy for DescriptiveMetadataStrategy {
    fn kind(&self) -> ExtractionStrategyKind {
        ExtractionStrategyKind::DescriptiveMetadata
    }

    fn applies_to(&self, _format: ImageFormat) -> bool {
        true
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Option<Recovered> {
        input.segments.xmp_packets.iter().find_map(|packet| {
            let binding = xmp::parse_packet(packet).or_else(|| xmp::scan_packet(packet))?;
            let proof_uri = input.accept_uri(binding.proof_uri.as_deref()?)?;
            Some(Recovered {
                proof_uri,
                manifest: binding.manifest_json.as_deref().and_then(parse_manifest),
                confidence: Confidence::Medium,
            })
        })
    }
}

/// Reads the proof reference from EXIF `ImageDescription`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuxiliaryMetadataStrategy;

impl ExtractionStrategy for AuxiliaryMetadataStrategy {
    fn kind(&self) -> ExtractionStrategyKind {
        ExtractionStrategyKind::AuxiliaryMetadata
    }

    fn applies_to(&self, _format: ImageFormat) -> bool {
        true
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Option<Recovered> {
        input.segments.exif_blocks.iter().find_map(|block| {
            let fields = exif::parse_tiff(exif::strip_header(block))?;
            let proof_uri = input.accept_uri(fields.description.as_deref()?.trim())?;
            Some(Recovered {
                proof_uri,
                manifest: None,
                confidence: Confidence::Medium,
            })
        })
    }
}

/// Reads the PNG `psRf`/`psMf` chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatChunksStrategy;

impl ExtractionStrategy for FormatChunksStrategy {
    fn kind(&self) -> ExtractionStrategyKind {
        ExtractionStrategyKind::FormatChunks
    }

    fn applies_to(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Png
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Option<Recovered> {
        let chunks = &input.segments.chunks;
        let reference = chunks.iter().find(|c| c.type_code == CHUNK_REFERENCE)?;
        let proof_uri = input.accept_uri(std::str::from_utf8(&reference.data).ok()?)?;

        let manifest_chunk = chunks.iter().find(|c| c.type_code == CHUNK_MANIFEST);
        let manifest = manifest_chunk.and_then(|c| parse_manifest(&c.data));

        let all_valid = reference.crc_valid && manifest_chunk.map_or(true, |c| c.crc_valid);
        let confidence = if all_valid && manifest.is_some() {
            Confidence::High
        } else {
            debug!(
                reference_crc = reference.crc_valid,
                manifest_crc = manifest_chunk.map(|c| c.crc_valid),
                "Extractor: chunk recovered with damage"
            );
            Confidence::Medium
        };

        // Never hand out a manifest whose chunk failed its CRC.
        let manifest = manifest.filter(|_| manifest_chunk.is_some_and(|c| c.crc_valid));

        Some(Recovered {
            proof_uri,
            manifest,
            confidence,
        })
    }
}

/// Raw byte scan for a proof-reference box, chunk or XMP property, plus a
/// manifest JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialRecoveryStrategy;

/// Start of every serialized manifest.
const MANIFEST_MARKER: &[u8] = b"{\"generator_id\":";

/// Bytes after an XMP property name handed to the scanner.
const SCAN_WINDOW: usize = 8 * 1024;

impl PartialRecoveryStrategy {
    /// Payload of a `psur` box: `u32 total | tag | u32 payload len | payload`.
    fn box_reference(bytes: &[u8]) -> Option<&[u8]> {
        let at = find_bytes(bytes, &TAG_PROOF_URI)?;
        let len_at = at + TAG_PROOF_URI.len();
        let len = u32::from_be_bytes(bytes.get(len_at..len_at + 4)?.try_into().ok()?) as usize;
        bytes.get(len_at + 4..(len_at + 4).checked_add(len)?)
    }

    /// Data of a `psRf` chunk: `u32 len | type | data | crc`.
    fn chunk_reference(bytes: &[u8]) -> Option<&[u8]> {
        let at = find_bytes(bytes, &CHUNK_REFERENCE)?;
        let len = u32::from_be_bytes(bytes.get(at.checked_sub(4)?..at)?.try_into().ok()?) as usize;
        let start = at + CHUNK_REFERENCE.len();
        bytes.get(start..start.checked_add(len)?)
    }

    fn xmp_reference(bytes: &[u8]) -> Option<String> {
        let at = find_bytes(bytes, b"provseal:proofUri")?;
        let window = &bytes[at..bytes.len().min(at + SCAN_WINDOW)];
        xmp::scan_packet(window)?.proof_uri
    }

    /// First manifest-shaped JSON object that parses.
    fn manifest(bytes: &[u8]) -> Option<Manifest> {
        let mut from = 0;
        while let Some(pos) = find_bytes(&bytes[from..], MANIFEST_MARKER) {
            let start = from + pos;
            if let Some(end) = json_object_end(&bytes[start..]) {
                if let Ok(manifest) = Manifest::from_json(&bytes[start..start + end]) {
                    return Some(manifest);
                }
            }
            from = start + 1;
        }
        None
    }
}

/// Length of the JSON object at the start of `bytes`, by brace matching.
fn json_object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {},
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            },
            _ => {},
        }
    }
    None
}

impl ExtractionStrategy for PartialRecoveryStrategy {
    fn kind(&self) -> ExtractionStrategyKind {
        ExtractionStrategyKind::PartialRecovery
    }

    fn applies_to(&self, _format: ImageFormat) -> bool {
        true
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Option<Recovered> {
        let bytes = input.bytes;
        let from_utf8 = |raw: &[u8]| std::str::from_utf8(raw).ok().map(str::to_string);

        let candidates = [
            Self::box_reference(bytes).and_then(from_utf8),
            Self::chunk_reference(bytes).and_then(from_utf8),
            Self::xmp_reference(bytes),
        ];
        let proof_uri = candidates
            .iter()
            .flatten()
            .find_map(|c| input.accept_uri(c))?;

        Some(Recovered {
            proof_uri,
            manifest: Self::manifest(bytes),
            confidence: Confidence::Low,
        })
    }
}
