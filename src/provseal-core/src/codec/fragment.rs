//! Splitting payloads across size-limited segments.
//!
//! Each segment is `index (u16 BE) | total (u16 BE) | slice`. Reassembly
//! needs every index in `0..total` exactly once; anything else fails
//! closed.

use super::CodecError;

/// Index and total fields ahead of each slice.
pub const SEGMENT_HEADER_LEN: usize = 4;

/// One numbered piece of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based position.
    pub index: u16,
    /// Number of segments in the sequence.
    pub total: u16,
    /// Payload slice.
    pub data: Vec<u8>,
}

impl Segment {
    /// Serialize as `index | total | slice`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SEGMENT_HEADER_LEN + self.data.len());
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a serialized segment.
    ///
    /// # Errors
    ///
    /// Returns error if the header is short or the index is out of range.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < SEGMENT_HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: SEGMENT_HEADER_LEN,
                available: bytes.len(),
            });
        }
        let index = u16::from_be_bytes([bytes[0], bytes[1]]);
        let total = u16::from_be_bytes([bytes[2], bytes[3]]);
        if total == 0 || index >= total {
            return Err(CodecError::InconsistentSegments {
                reason: format!("segment index {index} outside total {total}"),
            });
        }
        Ok(Self {
            index,
            total,
            data: bytes[SEGMENT_HEADER_LEN..].to_vec(),
        })
    }
}

/// Split `payload` into segments whose serialized size is at most
/// `max_segment_size`.
///
/// # Errors
///
/// Returns error if the payload is empty, the segment size leaves no room
/// for data, or more than `u16::MAX` segments would be needed.
pub fn fragment_payload(payload: &[u8], max_segment_size: usize) -> Result<Vec<Segment>, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    if max_segment_size <= SEGMENT_HEADER_LEN {
        return Err(CodecError::InconsistentSegments {
            reason: format!("segment size {max_segment_size} leaves no room for data"),
        });
    }

    let slice_len = max_segment_size - SEGMENT_HEADER_LEN;
    let count = payload.len().div_ceil(slice_len);
    let total = u16::try_from(count).map_err(|_| CodecError::TooLarge {
        len: payload.len(),
        max: slice_len * u16::MAX as usize,
    })?;

    Ok(payload
        .chunks(slice_len)
        .enumerate()
        .map(|(i, slice)| Segment {
            index: i as u16,
            total,
            data: slice.to_vec(),
        })
        .collect())
}

/// Rebuild the payload from a complete set of segments, in any order.
///
/// # Errors
///
/// Returns error on an empty set, mixed totals, duplicates or gaps. No
/// partial payload is ever returned.
pub fn reassemble(segments: &[Segment]) -> Result<Vec<u8>, CodecError> {
    let first = segments.first().ok_or(CodecError::Empty)?;
    let total = first.total;

    if total == 0 {
        return Err(CodecError::InconsistentSegments {
            reason: "segment total is zero".to_string(),
        });
    }
    if let Some(odd) = segments.iter().find(|s| s.total != total) {
        return Err(CodecError::InconsistentSegments {
            reason: format!("segment totals disagree ({total} vs {})", odd.total),
        });
    }

    let mut slots: Vec<Option<&Segment>> = vec![None; total as usize];
    for segment in segments {
        let slot = slots
            .get_mut(segment.index as usize)
            .ok_or_else(|| CodecError::InconsistentSegments {
                reason: format!("segment index {} outside total {total}", segment.index),
            })?;
        if slot.is_some() {
            return Err(CodecError::InconsistentSegments {
                reason: format!("duplicate segment {}", segment.index),
            });
        }
        *slot = Some(segment);
    }

    let mut payload = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        let segment = slot.ok_or(CodecError::MissingSegment {
            index: index as u16,
            total,
        })?;
        payload.extend_from_slice(&segment.data);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_sizes() {
        let payload = vec![7u8; 25];
        let segments = fragment_payload(&payload, 14).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.to_bytes().len() <= 14));
        assert!(segments.iter().all(|s| s.total == 3));
        assert_eq!(segments[2].data.len(), 5);
    }

    #[test]
    fn test_single_segment() {
        let segments = fragment_payload(b"small", 1024).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(reassemble(&segments).unwrap(), b"small");
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut segments = fragment_payload(&payload, 40).unwrap();
        segments.reverse();
        assert_eq!(reassemble(&segments).unwrap(), payload);
    }

    #[test]
    fn test_missing_segment_fails_closed() {
        let payload: Vec<u8> = (0..100).collect();
        let mut segments = fragment_payload(&payload, 20).unwrap();
        segments.remove(2);
        assert!(matches!(
            reassemble(&segments),
            Err(CodecError::MissingSegment { index: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_and_mixed_totals() {
        let segments = fragment_payload(&[1u8; 30], 14).unwrap();
        let mut dup = segments.clone();
        dup.push(segments[0].clone());
        assert!(reassemble(&dup).is_err());

        let mut mixed = segments;
        mixed[1].total = 9;
        assert!(reassemble(&mixed).is_err());
    }

    #[test]
    fn test_segment_parse() {
        let seg = Segment {
            index: 1,
            total: 2,
            data: b"abc".to_vec(),
        };
        assert_eq!(Segment::parse(&seg.to_bytes()).unwrap(), seg);
        assert!(Segment::parse(&[0, 2, 0, 2]).is_err());
        assert!(Segment::parse(&[0, 0]).is_err());
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert!(matches!(fragment_payload(&[], 100), Err(CodecError::Empty)));
        assert!(fragment_payload(b"x", SEGMENT_HEADER_LEN).is_err());
        assert!(matches!(reassemble(&[]), Err(CodecError::Empty)));
    }
}
