//! Length-prefixed nested boxes.
//!
//! ```text
//! ┌──────────────┬──────────┬────────────────┬─────────┬──────────────┐
//! │ total (u32)  │ tag [4]  │ payload (u32)  │ payload │ nested boxes │
//! └──────────────┴──────────┴────────────────┴─────────┴──────────────┘
//! ```
//!
//! `total` covers the whole box including every nested box, so a reader
//! can skip a box without understanding it and can detect truncation.

use super::CodecError;

/// Bytes before the payload: total length, tag, payload length.
pub const BOX_HEADER_LEN: usize = 12;

/// Maximum nesting accepted by the decoder.
pub const MAX_BOX_DEPTH: usize = 16;

/// A decoded or to-be-encoded box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBox {
    /// Four-byte type tag.
    pub tag: [u8; 4],
    /// Box payload.
    pub payload: Vec<u8>,
    /// Nested boxes, in order.
    pub children: Vec<ContainerBox>,
}

impl ContainerBox {
    /// Leaf box.
    #[must_use]
    pub fn new(tag: [u8; 4], payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            payload: payload.into(),
            children: Vec::new(),
        }
    }

    /// Append a nested box.
    #[must_use]
    pub fn with_child(mut self, child: ContainerBox) -> Self {
        self.children.push(child);
        self
    }

    /// Serialized size of this box including nested boxes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        BOX_HEADER_LEN
            + self.payload.len()
            + self.children.iter().map(Self::encoded_len).sum::<usize>()
    }

    /// Serialize this box.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLarge`] if a length does not fit in `u32`.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let total = to_u32(self.encoded_len())?;
        let payload_len = to_u32(self.payload.len())?;

        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        for child in &self.children {
            child.write_to(out)?;
        }
        Ok(())
    }

    /// First direct child with `tag`.
    #[must_use]
    pub fn child(&self, tag: &[u8; 4]) -> Option<&ContainerBox> {
        self.children.iter().find(|c| &c.tag == tag)
    }

    /// Tag rendered as text, with non-printable bytes replaced.
    #[must_use]
    pub fn tag_str(&self) -> String {
        self.tag
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect()
    }
}

/// Encode a box with the given payload and nested boxes.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] if a length does not fit in `u32`.
pub fn encode_box(
    tag: [u8; 4],
    payload: &[u8],
    nested: &[ContainerBox],
) -> Result<Vec<u8>, CodecError> {
    ContainerBox {
        tag,
        payload: payload.to_vec(),
        children: nested.to_vec(),
    }
    .encode()
}

/// Output of [`decode_boxes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBoxes {
    /// Boxes parsed before any inconsistency.
    pub boxes: Vec<ContainerBox>,
    /// Whether parsing stopped early on a truncated or inconsistent length.
    pub truncated: bool,
}

impl DecodedBoxes {
    /// First top-level box with `tag`.
    #[must_use]
    pub fn find(&self, tag: &[u8; 4]) -> Option<&ContainerBox> {
        self.boxes.iter().find(|b| &b.tag == tag)
    }
}

/// Decode a sequence of boxes.
///
/// A truncated or inconsistent length field stops parsing at that point;
/// the boxes read so far are returned with `truncated` set.
///
/// # Errors
///
/// Returns [`CodecError::DepthExceeded`] if nesting goes past
/// [`MAX_BOX_DEPTH`].
pub fn decode_boxes(bytes: &[u8]) -> Result<DecodedBoxes, CodecError> {
    decode_level(bytes, 1)
}

fn decode_level(bytes: &[u8], depth: usize) -> Result<DecodedBoxes, CodecError> {
    if depth > MAX_BOX_DEPTH {
        return Err(CodecError::DepthExceeded { max: MAX_BOX_DEPTH });
    }

    let mut result = DecodedBoxes::default();
    let mut pos = 0;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < BOX_HEADER_LEN {
            result.truncated = true;
            break;
        }

        let total = read_u32(rest, 0) as usize;
        let payload_len = read_u32(rest, 8) as usize;

        if total < BOX_HEADER_LEN
            || payload_len > total - BOX_HEADER_LEN
            || total > rest.len()
        {
            result.truncated = true;
            break;
        }

        let mut tag = [0u8; 4];
        tag.copy_from_slice(&rest[4..8]);
        let payload_end = BOX_HEADER_LEN + payload_len;
        let payload = rest[BOX_HEADER_LEN..payload_end].to_vec();

        let nested = &rest[payload_end..total];
        let children = if nested.is_empty() {
            Vec::new()
        } else {
            let decoded = decode_level(nested, depth + 1)?;
            result.truncated |= decoded.truncated;
            decoded.boxes
        };

        result.boxes.push(ContainerBox {
            tag,
            payload,
            children,
        });
        pos += total;
    }

    Ok(result)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn to_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::TooLarge {
        len,
        max: u32::MAX as usize,
    })
}
