//! Checksummed chunks (PNG layout).
//!
//! ```text
//! length (u32 BE, data only) | type [4] | data | crc32(type || data) (u32 BE)
//! ```

use super::crc::Crc32;
use super::CodecError;

/// Length, type and CRC fields around the data.
pub const CHUNK_OVERHEAD: usize = 12;

/// Largest data length allowed in a chunk (2^31 - 1).
pub const MAX_CHUNK_DATA: usize = 0x7FFF_FFFF;

/// CRC over a chunk's type code and data.
#[must_use]
pub fn chunk_crc(type_code: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(type_code);
    crc.update(data);
    crc.finalize()
}

/// Encode a chunk.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] if `data` exceeds [`MAX_CHUNK_DATA`].
pub fn encode_chunk(type_code: [u8; 4], data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.len() > MAX_CHUNK_DATA {
        return Err(CodecError::TooLarge {
            len: data.len(),
            max: MAX_CHUNK_DATA,
        });
    }

    let mut out = Vec::with_capacity(CHUNK_OVERHEAD + data.len());
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&type_code);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(&type_code, data).to_be_bytes());
    Ok(out)
}

/// A decoded chunk. A CRC mismatch is reported, not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    /// Four-byte type code.
    pub type_code: [u8; 4],
    /// Chunk data.
    pub data: Vec<u8>,
    /// Whether the stored CRC matches the computed one.
    pub crc_valid: bool,
}

impl DecodedChunk {
    /// Bytes this chunk occupied in the input.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        CHUNK_OVERHEAD + self.data.len()
    }
}

/// Decode the chunk at the start of `bytes`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if the declared length runs past the
/// input. CRC mismatches are flagged in the result instead.
pub fn decode_chunk(bytes: &[u8]) -> Result<DecodedChunk, CodecError> {
    if bytes.len() < CHUNK_OVERHEAD {
        return Err(CodecError::Truncated {
            needed: CHUNK_OVERHEAD,
            available: bytes.len(),
        });
    }

    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let needed = len
        .checked_add(CHUNK_OVERHEAD)
        .ok_or(CodecError::TooLarge {
            len,
            max: MAX_CHUNK_DATA,
        })?;
    if bytes.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: bytes.len(),
        });
    }

    let mut type_code = [0u8; 4];
    type_code.copy_from_slice(&bytes[4..8]);
    let data = &bytes[8..8 + len];
    let crc_at = 8 + len;
    let stored = u32::from_be_bytes([
        bytes[crc_at],
        bytes[crc_at + 1],
        bytes[crc_at + 2],
        bytes[crc_at + 3],
    ]);

    Ok(DecodedChunk {
        type_code,
        data: data.to_vec(),
        crc_valid: stored == chunk_crc(&type_code, data),
    })
}
