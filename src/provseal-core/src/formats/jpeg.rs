//! JPEG embedding.
//!
//! Layout written after SOI:
//!
//! ```text
//! SOI
//! APP11 "PSEAL\0" fragment 0/N   ┐ container: manifest box tree,
//! APP11 "PSEAL\0" fragment 1/N   ┘ fragmented across segments
//! APP0  (existing JFIF header, if it was first)
//! APP1  "Exif\0\0" TIFF          only if the image had no EXIF
//! APP1  XMP packet               descriptive record
//! ...remaining original segments, scan data, EOI
//! ```
//!
//! The container path may fail (too many fragments, oversized segment);
//! the descriptive record is still written and the strategy says so.

use tracing::{debug, warn};

use super::{EmbedPayload, FormatEmbedding, ImageContainer, MetadataSegments, SegmentInfo};
use crate::binding::encode_binding;
use crate::codec::fragment_payload;
use crate::error::{ProvenanceError, Result};
use crate::exif;
use crate::types::{EmbedStrategy, ImageFormat};
use crate::xmp;

const SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;
const MARKER_APP11: u8 = 0xEB;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;

/// Largest data in one marker segment (the length field counts itself).
pub const MAX_SEGMENT_DATA: usize = 0xFFFF - 2;

/// Identifier opening every provseal APP11 segment.
pub const CONTAINER_IDENTIFIER: &[u8] = b"PSEAL\0";

/// Largest fragment per APP11 segment.
pub const MAX_APP11_SEGMENT_DATA: usize = MAX_SEGMENT_DATA - CONTAINER_IDENTIFIER.len();

/// Namespace prefix of a standard XMP APP1 segment.
pub const XMP_IDENTIFIER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Largest XMP packet in one APP1 segment.
pub const MAX_XMP_PACKET: usize = MAX_SEGMENT_DATA - XMP_IDENTIFIER.len();

/// Most APP11 segments written for one manifest.
pub const MAX_CONTAINER_SEGMENTS: usize = 255;

/// A marker segment located in the input.
#[derive(Debug, Clone, Copy)]
struct Marker {
    code: u8,
    start: usize,
    data_start: usize,
    end: usize,
}

impl Marker {
    fn data<'a>(&self, image: &'a [u8]) -> &'a [u8] {
        &image[self.data_start..self.end]
    }
}

#[derive(Debug)]
struct Layout {
    markers: Vec<Marker>,
    /// Offset of SOS/EOI, or where parsing stopped.
    body_start: usize,
    complete: bool,
}

/// Walk marker segments up to the first SOS or EOI.
fn parse_layout(image: &[u8]) -> Layout {
    let mut markers = Vec::new();
    let mut pos = SOI.len();

    let stop = |markers: Vec<Marker>, body_start: usize, complete: bool| Layout {
        markers,
        body_start,
        complete,
    };

    loop {
        if pos >= image.len() || image[pos] != 0xFF {
            return stop(markers, pos.min(image.len()), false);
        }
        let mut m = pos + 1;
        while m < image.len() && image[m] == 0xFF {
            m += 1;
        }
        let Some(&code) = image.get(m) else {
            return stop(markers, pos, false);
        };

        match code {
            MARKER_SOS | MARKER_EOI => return stop(markers, pos, true),
            0x01 | 0xD0..=0xD7 => {
                markers.push(Marker {
                    code,
                    start: pos,
                    data_start: m + 1,
                    end: m + 1,
                });
                pos = m + 1;
            },
            _ => {
                let Some(len_bytes) = image.get(m + 1..m + 3) else {
                    return stop(markers, pos, false);
                };
                let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let end = m + 1 + len;
                if len < 2 || end > image.len() {
                    return stop(markers, pos, false);
                }
                markers.push(Marker {
                    code,
                    start: pos,
                    data_start: m + 3,
                    end,
                });
                pos = end;
            },
        }
    }
}

fn is_container(marker: &Marker, image: &[u8]) -> bool {
    marker.code == MARKER_APP11 && marker.data(image).starts_with(CONTAINER_IDENTIFIER)
}

fn is_xmp(marker: &Marker, image: &[u8]) -> bool {
    marker.code == MARKER_APP1 && marker.data(image).starts_with(XMP_IDENTIFIER)
}

fn is_exif(marker: &Marker, image: &[u8]) -> bool {
    marker.code == MARKER_APP1 && marker.data(image).starts_with(exif::EXIF_HEADER)
}

/// Display name of a marker code.
fn marker_name(code: u8) -> String {
    match code {
        0xE0..=0xEF => format!("APP{}", code - 0xE0),
        0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => format!("SOF{}", code - 0xC0),
        0xC4 => "DHT".to_string(),
        0xDB => "DQT".to_string(),
        0xDD => "DRI".to_string(),
        0xFE => "COM".to_string(),
        0xD0..=0xD7 => format!("RST{}", code - 0xD0),
        _ => format!("FF{code:02X}"),
    }
}

/// Build a marker segment from data parts.
fn marker_segment(code: u8, parts: &[&[u8]]) -> Result<Vec<u8>> {
    let data_len: usize = parts.iter().map(|p| p.len()).sum();
    if data_len > MAX_SEGMENT_DATA {
        return Err(ProvenanceError::validation(format!(
            "marker segment data of {data_len} bytes exceeds {MAX_SEGMENT_DATA}"
        )));
    }
    let mut out = Vec::with_capacity(4 + data_len);
    out.extend_from_slice(&[0xFF, code]);
    out.extend_from_slice(&((data_len + 2) as u16).to_be_bytes());
    for part in parts {
        out.extend_from_slice(part);
    }
    Ok(out)
}

/// JPEG container.
#[derive(Debug, Clone)]
pub struct JpegContainer {
    segment_payload: usize,
}

impl JpegContainer {
    /// Container fragmenting the manifest into at most `segment_payload`
    /// bytes per APP11 segment.
    #[must_use]
    pub fn new(segment_payload: usize) -> Self {
        Self { segment_payload }
    }

    fn container_segments(&self, payload: &EmbedPayload<'_>) -> Result<Vec<Vec<u8>>> {
        if self.segment_payload > MAX_APP11_SEGMENT_DATA {
            return Err(ProvenanceError::validation(format!(
                "segment payload {} exceeds {MAX_APP11_SEGMENT_DATA}",
                self.segment_payload
            )));
        }

        let tree = encode_binding(payload.proof_uri, payload.manifest_json)?;
        let fragments = fragment_payload(&tree, self.segment_payload)?;
        if fragments.len() > MAX_CONTAINER_SEGMENTS {
            return Err(ProvenanceError::validation(format!(
                "manifest needs {} segments, maximum {MAX_CONTAINER_SEGMENTS}",
                fragments.len()
            )));
        }

        fragments
            .iter()
            .map(|f| marker_segment(MARKER_APP11, &[CONTAINER_IDENTIFIER, &f.to_bytes()]))
            .collect()
    }
}

impl ImageContainer for JpegContainer {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn embed(&self, image: &[u8], payload: &EmbedPayload<'_>) -> Result<FormatEmbedding> {
        if !image.starts_with(&SOI) {
            return Err(ProvenanceError::validation("JPEG does not start with SOI"));
        }
        if payload.xmp_packet.len() > MAX_XMP_PACKET {
            return Err(ProvenanceError::validation(format!(
                "XMP packet of {} bytes exceeds {MAX_XMP_PACKET}",
                payload.xmp_packet.len()
            )));
        }

        let layout = parse_layout(image);
        if !layout.complete {
            warn!(
                parsed = layout.markers.len(),
                "JPEG: marker walk stopped early, copying remainder verbatim"
            );
        }

        // Previous provseal records are dropped; foreign ones are kept.
        let mut foreign_exif = false;
        let kept: Vec<&Marker> = layout
            .markers
            .iter()
            .filter(|m| {
                if is_container(m, image) {
                    return false;
                }
                if is_xmp(m, image) {
                    return !xmp::is_provseal_packet(m.data(image));
                }
                if is_exif(m, image) {
                    let ours = exif::parse_tiff(exif::strip_header(m.data(image)))
                        .is_some_and(|f| f.is_provseal());
                    foreign_exif |= !ours;
                    return !ours;
                }
                true
            })
            .collect();

        let mut out = Vec::with_capacity(image.len() + payload.manifest_json.len() * 2 + 1024);
        out.extend_from_slice(&SOI);

        let strategy = match self.container_segments(payload) {
            Ok(segments) => {
                debug!(segments = segments.len(), "JPEG: container embedded");
                for segment in &segments {
                    out.extend_from_slice(segment);
                }
                EmbedStrategy::Secondary
            },
            Err(e) => {
                warn!("JPEG: container embedding failed, descriptive only: {}", e);
                EmbedStrategy::SecondaryFallbackToPrimary
            },
        };

        let mut rest = kept.as_slice();
        if let Some((first, tail)) = rest.split_first() {
            if first.code == MARKER_APP0 {
                out.extend_from_slice(&image[first.start..first.end]);
                rest = tail;
            }
        }

        if !foreign_exif {
            let tiff = exif::build_tiff(payload.proof_uri);
            match marker_segment(MARKER_APP1, &[exif::EXIF_HEADER, &tiff]) {
                Ok(segment) => out.extend_from_slice(&segment),
                Err(e) => debug!("JPEG: skipping EXIF record: {}", e),
            }
        }

        out.extend_from_slice(&marker_segment(
            MARKER_APP1,
            &[XMP_IDENTIFIER, payload.xmp_packet],
        )?);

        for marker in rest {
            out.extend_from_slice(&image[marker.start..marker.end]);
        }
        out.extend_from_slice(&image[layout.body_start..]);

        Ok(FormatEmbedding {
            bytes: out,
            strategy,
        })
    }

    fn list_segments(&self, image: &[u8]) -> Vec<SegmentInfo> {
        if !image.starts_with(&SOI) {
            return Vec::new();
        }
        let layout = parse_layout(image);

        let mut out = vec![SegmentInfo {
            label: "SOI".to_string(),
            offset: 0,
            len: SOI.len(),
            provseal: false,
            crc_valid: None,
        }];
        for marker in &layout.markers {
            let data = marker.data(image);
            let (label, provseal) = if is_container(marker, image) {
                (marker_name(marker.code), true)
            } else if is_xmp(marker, image) {
                ("APP1 XMP".to_string(), xmp::is_provseal_packet(data))
            } else if is_exif(marker, image) {
                let ours = exif::parse_tiff(exif::strip_header(data)).is_some_and(|f| f.is_provseal());
                ("APP1 EXIF".to_string(), ours)
            } else {
                (marker_name(marker.code), false)
            };
            out.push(SegmentInfo {
                label,
                offset: marker.start,
                len: marker.end - marker.start,
                provseal,
                crc_valid: None,
            });
        }
        if layout.complete {
            out.push(SegmentInfo {
                label: "scan".to_string(),
                offset: layout.body_start,
                len: image.len() - layout.body_start,
                provseal: false,
                crc_valid: None,
            });
        }
        out
    }

    fn read_segments(&self, image: &[u8]) -> MetadataSegments {
        let mut found = MetadataSegments::default();
        if !image.starts_with(&SOI) {
            found.malformed = true;
            return found;
        }

        let layout = parse_layout(image);
        found.malformed = !layout.complete;

        for marker in &layout.markers {
            let data = marker.data(image);
            if is_container(marker, image) {
                found
                    .container_segments
                    .push(data[CONTAINER_IDENTIFIER.len()..].to_vec());
            } else if is_xmp(marker, image) {
                found.xmp_packets.push(data[XMP_IDENTIFIER.len()..].to_vec());
            } else if is_exif(marker, image) {
                found.exif_blocks.push(exif::strip_header(data).to_vec());
            }
        }
        found
    }
}
