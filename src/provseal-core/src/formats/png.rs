//! PNG embedding.
//!
//! Three chunks go in front of the first `IDAT`: an `iTXt` XMP packet,
//! `psMf` with the manifest JSON and `psRf` with the proof reference. The
//! custom types are ancillary, private and safe-to-copy, so editors that
//! keep unknown chunks carry them along.

use tracing::{debug, warn};

use super::{EmbedPayload, FormatEmbedding, ImageContainer, MetadataSegments, SegmentInfo};
use crate::codec::{decode_chunk, encode_chunk, CodecError, DecodedChunk};
use crate::error::{ProvenanceError, Result};
use crate::types::{EmbedStrategy, ImageFormat, PNG_SIGNATURE};
use crate::xmp;

/// Manifest JSON chunk.
pub const CHUNK_MANIFEST: [u8; 4] = *b"psMf";
/// Proof reference chunk.
pub const CHUNK_REFERENCE: [u8; 4] = *b"psRf";

const CHUNK_ITXT: [u8; 4] = *b"iTXt";
const CHUNK_EXIF: [u8; 4] = *b"eXIf";
const CHUNK_IDAT: [u8; 4] = *b"IDAT";
const CHUNK_IEND: [u8; 4] = *b"IEND";

/// `iTXt` keyword for XMP.
pub const XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp";

#[derive(Debug)]
struct ChunkSpan {
    type_code: [u8; 4],
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct ChunkWalk {
    chunks: Vec<(ChunkSpan, DecodedChunk)>,
    /// Offset after the last chunk walked.
    parsed_end: usize,
    complete: bool,
}

fn walk_chunks(image: &[u8]) -> ChunkWalk {
    let mut chunks = Vec::new();
    let mut pos = PNG_SIGNATURE.len();

    while pos < image.len() {
        let chunk = match decode_chunk(&image[pos..]) {
            Ok(c) => c,
            Err(e) => {
                debug!(offset = pos, "PNG: chunk walk stopped: {}", e);
                return ChunkWalk {
                    chunks,
                    parsed_end: pos,
                    complete: false,
                };
            },
        };
        let end = pos + chunk.encoded_len();
        let is_end = chunk.type_code == CHUNK_IEND;
        chunks.push((
            ChunkSpan {
                type_code: chunk.type_code,
                start: pos,
                end,
            },
            chunk,
        ));
        pos = end;
        if is_end {
            return ChunkWalk {
                chunks,
                parsed_end: pos,
                complete: true,
            };
        }
    }

    ChunkWalk {
        chunks,
        parsed_end: pos,
        complete: false,
    }
}

/// `iTXt` data carrying an uncompressed XMP packet.
fn itxt_xmp(packet: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(XMP_KEYWORD.len() + 5 + packet.len());
    data.extend_from_slice(XMP_KEYWORD);
    // NUL, compression flag, compression method, empty language, empty
    // translated keyword.
    data.extend_from_slice(&[0, 0, 0, 0, 0]);
    data.extend_from_slice(packet);
    data
}

/// Text of an uncompressed XMP `iTXt` chunk.
fn parse_itxt_xmp(data: &[u8]) -> Option<&[u8]> {
    let rest = data.strip_prefix(XMP_KEYWORD)?.strip_prefix(&[0u8])?;
    let (&compressed, rest) = rest.split_first()?;
    if compressed != 0 {
        return None;
    }
    let rest = rest.get(1..)?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_end + 1..];
    let translated_end = rest.iter().position(|&b| b == 0)?;
    Some(&rest[translated_end + 1..])
}

fn is_provseal_chunk(chunk: &DecodedChunk) -> bool {
    match chunk.type_code {
        CHUNK_MANIFEST | CHUNK_REFERENCE => true,
        CHUNK_ITXT => parse_itxt_xmp(&chunk.data).is_some_and(xmp::is_provseal_packet),
        _ => false,
    }
}

/// PNG container.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngContainer;

impl PngContainer {
    fn custom_chunks(payload: &EmbedPayload<'_>) -> std::result::Result<Vec<u8>, CodecError> {
        let mut out = encode_chunk(CHUNK_MANIFEST, payload.manifest_json)?;
        out.extend_from_slice(&encode_chunk(CHUNK_REFERENCE, payload.proof_uri.as_bytes())?);
        Ok(out)
    }
}

impl ImageContainer for PngContainer {
    fn format(&self) -> ImageFormat {
        ImageFormat::Png
    }

    fn embed(&self, image: &[u8], payload: &EmbedPayload<'_>) -> Result<FormatEmbedding> {
        if !image.starts_with(&PNG_SIGNATURE) {
            return Err(ProvenanceError::validation("missing PNG signature"));
        }

        let walk = walk_chunks(image);
        if !walk.complete {
            warn!(
                chunks = walk.chunks.len(),
                "PNG: chunk walk stopped early, copying remainder verbatim"
            );
        }

        let insert_at = walk
            .chunks
            .iter()
            .find(|(span, _)| span.type_code == CHUNK_IDAT)
            .or_else(|| {
                walk.chunks
                    .iter()
                    .find(|(span, _)| span.type_code == CHUNK_IEND)
            })
            .map_or(walk.parsed_end, |(span, _)| span.start);

        let mut inserted = encode_chunk(CHUNK_ITXT, &itxt_xmp(payload.xmp_packet))?;
        let strategy = match Self::custom_chunks(payload) {
            Ok(chunks) => {
                inserted.extend_from_slice(&chunks);
                EmbedStrategy::Secondary
            },
            Err(e) => {
                warn!("PNG: custom chunks failed, descriptive only: {}", e);
                EmbedStrategy::SecondaryFallbackToPrimary
            },
        };

        let mut out = Vec::with_capacity(image.len() + inserted.len());
        out.extend_from_slice(&PNG_SIGNATURE);
        for (span, chunk) in &walk.chunks {
            if span.start == insert_at {
                out.extend_from_slice(&inserted);
            }
            if !is_provseal_chunk(chunk) {
                out.extend_from_slice(&image[span.start..span.end]);
            }
        }
        if insert_at == walk.parsed_end {
            out.extend_from_slice(&inserted);
        }
        out.extend_from_slice(&image[walk.parsed_end..]);

        Ok(FormatEmbedding {
            bytes: out,
            strategy,
        })
    }

    fn list_segments(&self, image: &[u8]) -> Vec<SegmentInfo> {
        if !image.starts_with(&PNG_SIGNATURE) {
            return Vec::new();
        }
        let walk = walk_chunks(image);

        let mut out = vec![SegmentInfo {
            label: "signature".to_string(),
            offset: 0,
            len: PNG_SIGNATURE.len(),
            provseal: false,
            crc_valid: None,
        }];
        out.extend(walk.chunks.iter().map(|(span, chunk)| SegmentInfo {
            label: String::from_utf8_lossy(&span.type_code).into_owned(),
            offset: span.start,
            len: span.end - span.start,
            provseal: is_provseal_chunk(chunk),
            crc_valid: Some(chunk.crc_valid),
        }));
        out
    }

    fn read_segments(&self, image: &[u8]) -> MetadataSegments {
        let mut found = MetadataSegments::default();
        if !image.starts_with(&PNG_SIGNATURE) {
            found.malformed = true;
            return found;
        }

        let walk = walk_chunks(image);
        found.malformed = !walk.complete;

        for (_, chunk) in walk.chunks {
            match chunk.type_code {
                CHUNK_MANIFEST | CHUNK_REFERENCE => found.chunks.push(chunk),
                CHUNK_ITXT => {
                    if let Some(packet) = parse_itxt_xmp(&chunk.data) {
                        found.xmp_packets.push(packet.to_vec());
                    }
                },
                CHUNK_EXIF => found.exif_blocks.push(chunk.data),
                _ => {},
            }
        }
        found
    }
}
