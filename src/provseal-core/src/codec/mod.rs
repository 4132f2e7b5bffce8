//! Format-agnostic binary containers.
//!
//! - [`boxes`]: nested length-prefixed boxes (JPEG container embedding)
//! - [`chunk`]: CRC-checked chunks (PNG embedding)
//! - [`fragment`]: numbered segments for payloads larger than one marker
//!
//! Nothing here knows about image formats.

pub mod boxes;
pub mod chunk;
pub mod crc;
pub mod fragment;

use thiserror::Error;

pub use boxes::{decode_boxes, encode_box, ContainerBox, DecodedBoxes};
pub use chunk::{decode_chunk, encode_chunk, DecodedChunk};
pub use crc::crc32;
pub use fragment::{fragment_payload, reassemble, Segment};

/// Errors from the container codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before a declared length.
    #[error("Truncated input: needed {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// A length does not fit the field that carries it.
    #[error("Length {len} exceeds maximum {max}")]
    TooLarge {
        /// Offending length.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Box nesting deeper than the decoder accepts.
    #[error("Box nesting exceeds depth {max}")]
    DepthExceeded {
        /// Depth limit.
        max: usize,
    },

    /// A segment of a fragmented payload is absent.
    #[error("Missing segment {index} of {total}")]
    MissingSegment {
        /// First missing index.
        index: u16,
        /// Declared total.
        total: u16,
    },

    /// Segments do not form one sequence.
    #[error("Inconsistent segments: {reason}")]
    InconsistentSegments {
        /// Description.
        reason: String,
    },

    /// Nothing to encode or reassemble.
    #[error("Empty input")]
    Empty,
}
