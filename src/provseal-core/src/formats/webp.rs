//! WEBP embedding.
//!
//! Descriptive record only: an `XMP ` RIFF chunk after the image data,
//! with the XMP flag set in `VP8X`. Simple-format files (bare `VP8 ` or
//! `VP8L`) get a synthesized `VP8X` carrying the canvas size.

use tracing::{debug, warn};

use super::{EmbedPayload, FormatEmbedding, ImageContainer, MetadataSegments, SegmentInfo};
use crate::error::{ProvenanceError, Result};
use crate::exif;
use crate::types::{EmbedStrategy, ImageFormat};
use crate::xmp;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

const FOURCC_VP8X: [u8; 4] = *b"VP8X";
const FOURCC_VP8: [u8; 4] = *b"VP8 ";
const FOURCC_VP8L: [u8; 4] = *b"VP8L";
const FOURCC_XMP: [u8; 4] = *b"XMP ";
const FOURCC_EXIF: [u8; 4] = *b"EXIF";

const VP8X_LEN: usize = 10;
const FLAG_ALPHA: u8 = 0x10;
const FLAG_XMP: u8 = 0x04;

#[derive(Debug)]
struct RiffChunk {
    fourcc: [u8; 4],
    start: usize,
    data_start: usize,
    data_end: usize,
    /// End including padding.
    end: usize,
}

#[derive(Debug)]
struct RiffWalk {
    chunks: Vec<RiffChunk>,
    parsed_end: usize,
    riff_end: usize,
    complete: bool,
}

fn walk_riff(image: &[u8]) -> Option<RiffWalk> {
    if image.len() < RIFF_HEADER_LEN || &image[..4] != b"RIFF" || &image[8..12] != b"WEBP" {
        return None;
    }
    let declared = u32::from_le_bytes([image[4], image[5], image[6], image[7]]) as usize;
    let riff_end = declared
        .saturating_add(8)
        .clamp(RIFF_HEADER_LEN, image.len());

    let mut chunks = Vec::new();
    let mut pos = RIFF_HEADER_LEN;
    while pos + CHUNK_HEADER_LEN <= riff_end {
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(&image[pos..pos + 4]);
        let size = u32::from_le_bytes([
            image[pos + 4],
            image[pos + 5],
            image[pos + 6],
            image[pos + 7],
        ]) as usize;
        let data_start = pos + CHUNK_HEADER_LEN;
        let data_end = data_start.saturating_add(size);
        if data_end > riff_end {
            debug!(offset = pos, size, "WEBP: chunk runs past RIFF end");
            break;
        }
        let end = (data_end + (size & 1)).min(riff_end);
        chunks.push(RiffChunk {
            fourcc,
            start: pos,
            data_start,
            data_end,
            end,
        });
        pos = end;
    }

    Some(RiffWalk {
        chunks,
        parsed_end: pos,
        riff_end,
        complete: pos == riff_end,
    })
}

fn riff_chunk(fourcc: [u8; 4], data: &[u8]) -> Result<Vec<u8>> {
    let size = u32::try_from(data.len())
        .map_err(|_| ProvenanceError::validation("RIFF chunk too large"))?;
    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + data.len() + 1);
    out.extend_from_slice(&fourcc);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    Ok(out)
}

/// Canvas width, height and alpha flag from a simple-format image chunk.
fn canvas_of(fourcc: [u8; 4], data: &[u8]) -> Option<(u32, u32, bool)> {
    match fourcc {
        FOURCC_VP8 => {
            if data.get(3..6)? != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let w = u16::from_le_bytes([*data.get(6)?, *data.get(7)?]) & 0x3FFF;
            let h = u16::from_le_bytes([*data.get(8)?, *data.get(9)?]) & 0x3FFF;
            Some((u32::from(w), u32::from(h), false))
        },
        FOURCC_VP8L => {
            if *data.first()? != 0x2F {
                return None;
            }
            let bits = u32::from_le_bytes(data.get(1..5)?.try_into().ok()?);
            let w = (bits & 0x3FFF) + 1;
            let h = ((bits >> 14) & 0x3FFF) + 1;
            Some((w, h, (bits >> 28) & 1 == 1))
        },
        _ => None,
    }
}

fn vp8x_data(width: u32, height: u32, alpha: bool) -> Option<[u8; VP8X_LEN]> {
    if width == 0 || height == 0 {
        return None;
    }
    let mut data = [0u8; VP8X_LEN];
    data[0] = FLAG_XMP | if alpha { FLAG_ALPHA } else { 0 };
    data[4..7].copy_from_slice(&(width - 1).to_le_bytes()[..3]);
    data[7..10].copy_from_slice(&(height - 1).to_le_bytes()[..3]);
    Some(data)
}

/// WEBP container.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpContainer;

impl ImageContainer for WebpContainer {
    fn format(&self) -> ImageFormat {
        ImageFormat::Webp
    }

    fn embed(&self, image: &[u8], payload: &EmbedPayload<'_>) -> Result<FormatEmbedding> {
        let walk = walk_riff(image)
            .ok_or_else(|| ProvenanceError::validation("missing RIFF/WEBP header"))?;
        if !walk.complete {
            warn!(
                chunks = walk.chunks.len(),
                "WEBP: chunk walk stopped early, copying remainder verbatim"
            );
        }

        let mut body = Vec::with_capacity(image.len() + payload.xmp_packet.len() + 32);

        let has_vp8x = walk.chunks.first().is_some_and(|c| c.fourcc == FOURCC_VP8X);
        if !has_vp8x {
            let canvas = walk
                .chunks
                .iter()
                .find_map(|c| canvas_of(c.fourcc, &image[c.data_start..c.data_end]));
            match canvas.and_then(|(w, h, alpha)| vp8x_data(w, h, alpha)) {
                Some(data) => body.extend_from_slice(&riff_chunk(FOURCC_VP8X, &data)?),
                None => warn!("WEBP: canvas size unknown, not adding VP8X"),
            }
        }

        for chunk in &walk.chunks {
            let data = &image[chunk.data_start..chunk.data_end];
            match chunk.fourcc {
                FOURCC_VP8X if chunk.data_end - chunk.data_start >= VP8X_LEN => {
                    let mut flagged = data.to_vec();
                    flagged[0] |= FLAG_XMP;
                    body.extend_from_slice(&riff_chunk(FOURCC_VP8X, &flagged)?);
                },
                FOURCC_XMP if xmp::is_provseal_packet(data) => {},
                _ => body.extend_from_slice(&image[chunk.start..chunk.end]),
            }
        }

        let xmp_chunk = riff_chunk(FOURCC_XMP, payload.xmp_packet)?;
        let tail = &image[walk.parsed_end..walk.riff_end];
        // Chunks after a damaged one cannot be located; the record goes
        // before the unparsed remainder.
        body.extend_from_slice(&xmp_chunk);
        body.extend_from_slice(tail);

        let riff_size = u32::try_from(body.len() + 4)
            .map_err(|_| ProvenanceError::validation("WEBP exceeds RIFF size limit"))?;

        let mut out = Vec::with_capacity(RIFF_HEADER_LEN + body.len());
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&riff_size.to_le_bytes());
        out.extend_from_slice(b"WEBP");
        out.extend_from_slice(&body);
        out.extend_from_slice(&image[walk.riff_end..]);

        Ok(FormatEmbedding {
            bytes: out,
            strategy: EmbedStrategy::Primary,
        })
    }

    fn list_segments(&self, image: &[u8]) -> Vec<SegmentInfo> {
        let Some(walk) = walk_riff(image) else {
            return Vec::new();
        };

        let mut out = vec![SegmentInfo {
            label: "RIFF".to_string(),
            offset: 0,
            len: RIFF_HEADER_LEN,
            provseal: false,
            crc_valid: None,
        }];
        out.extend(walk.chunks.iter().map(|c| SegmentInfo {
            label: String::from_utf8_lossy(&c.fourcc).trim_end().to_string(),
            offset: c.start,
            len: c.end - c.start,
            provseal: c.fourcc == FOURCC_XMP
                && xmp::is_provseal_packet(&image[c.data_start..c.data_end]),
            crc_valid: None,
        }));
        out
    }

    fn read_segments(&self, image: &[u8]) -> MetadataSegments {
        let mut found = MetadataSegments::default();
        let Some(walk) = walk_riff(image) else {
            found.malformed = true;
            return found;
        };
        found.malformed = !walk.complete;

        for chunk in &walk.chunks {
            let data = &image[chunk.data_start..chunk.data_end];
            match chunk.fourcc {
                FOURCC_XMP => found.xmp_packets.push(data.to_vec()),
                FOURCC_EXIF => found.exif_blocks.push(exif::strip_header(data).to_vec()),
                _ => {},
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_webp() -> Vec<u8> {
        // 3x2 lossless image header; pixel data is never decoded here.
        let bits: u32 = 2 | (1 << 14);
        let mut vp8l = vec![0x2F];
        vp8l.extend_from_slice(&bits.to_le_bytes());
        vp8l.extend_from_slice(&[0x00, 0x11, 0x22]);

        let body = riff_chunk(FOURCC_VP8L, &vp8l).unwrap();
        let mut v = b"RIFF".to_vec();
        v.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        v.extend_from_slice(b"WEBP");
        v.extend_from_slice(&body);
        v
    }

    fn payload(xmp: &[u8]) -> EmbedPayload<'_> {
        EmbedPayload {
            proof_uri: "https://proofs.example.com/webp",
            manifest_json: b"{}",
            xmp_packet: xmp,
        }
    }

    #[test]
    fn test_vp8x_synthesized_and_size_fixed() {
        let out = WebpContainer.embed(&tiny_webp(), &payload(b"<x/>")).unwrap();
        assert_eq!(out.strategy, EmbedStrategy::Primary);

        let walk = walk_riff(&out.bytes).unwrap();
        assert!(walk.complete);
        assert_eq!(walk.riff_end, out.bytes.len());

        let fourccs: Vec<[u8; 4]> = walk.chunks.iter().map(|c| c.fourcc).collect();
        assert_eq!(fourccs, vec![FOURCC_VP8X, FOURCC_VP8L, FOURCC_XMP]);

        let vp8x = &walk.chunks[0];
        let data = &out.bytes[vp8x.data_start..vp8x.data_end];
        assert_eq!(data[0] & FLAG_XMP, FLAG_XMP);
        assert_eq!(&data[4..7], &[2, 0, 0]);
        assert_eq!(&data[7..10], &[1, 0, 0]);
    }

    #[test]
    fn test_read_segments() {
        let out = WebpContainer.embed(&tiny_webp(), &payload(b"<xx/>")).unwrap();
        let segments = WebpContainer.read_segments(&out.bytes);
        assert!(!segments.malformed);
        // Odd-length packet is padded in the file, not in the data.
        assert_eq!(segments.xmp_packets, vec![b"<xx/>".to_vec()]);
    }

    #[test]
    fn test_list_segments() {
        let packet = xmp::build_packet("https://proofs.example.com/webp", None, 4096).unwrap();
        let out = WebpContainer.embed(&tiny_webp(), &payload(&packet)).unwrap();

        let listed = WebpContainer.list_segments(&out.bytes);
        let labels: Vec<&str> = listed.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["RIFF", "VP8X", "VP8L", "XMP"]);
        assert!(listed[3].provseal);
        assert!(!listed[2].provseal);
        assert_eq!(listed.iter().map(|s| s.len).sum::<usize>(), out.bytes.len());
    }

    #[test]
    fn test_reembed_replaces_packet() {
        let packet = xmp::build_packet("https://proofs.example.com/webp", None, 4096).unwrap();
        let once = WebpContainer.embed(&tiny_webp(), &payload(&packet)).unwrap();
        let twice = WebpContainer.embed(&once.bytes, &payload(&packet)).unwrap();
        assert_eq!(once.bytes, twice.bytes);
    }

    #[test]
    fn test_not_riff_rejected() {
        assert!(WebpContainer.embed(b"RIFF\0\0\0\0WAVE", &payload(b"x")).is_err());
        assert!(WebpContainer.read_segments(b"nope").malformed);
    }

    #[test]
    fn test_vp8_canvas() {
        let data = [0x10, 0x02, 0x00, 0x9D, 0x01, 0x2A, 0x40, 0x01, 0xF0, 0x00];
        assert_eq!(canvas_of(FOURCC_VP8, &data), Some((320, 240, false)));
        assert_eq!(canvas_of(FOURCC_VP8, &data[..5]), None);
    }
}
