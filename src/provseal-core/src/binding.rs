//! Manifest box tree used for container embedding.
//!
//! ```text
//! psmb                      superbox
//! ├── psdb  "provseal.manifest.v1"
//! ├── psur  proof reference (UTF-8)
//! └── psjs  manifest JSON
//! ```

use tracing::debug;

use crate::codec::{decode_boxes, ContainerBox, CodecError};
use crate::manifest::MANIFEST_DOMAIN;

/// Superbox tag.
pub const TAG_SUPERBOX: [u8; 4] = *b"psmb";
/// Description box tag.
pub const TAG_DESCRIPTION: [u8; 4] = *b"psdb";
/// Proof reference box tag.
pub const TAG_PROOF_URI: [u8; 4] = *b"psur";
/// Manifest JSON box tag.
pub const TAG_MANIFEST: [u8; 4] = *b"psjs";

/// Proof reference and manifest JSON recovered from a box tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBinding {
    /// Proof reference, not yet validated.
    pub proof_uri: String,
    /// Manifest JSON, not yet parsed.
    pub manifest_json: Vec<u8>,
}

/// Encode the box tree.
///
/// # Errors
///
/// Returns error if a length overflows the box header.
pub fn encode_binding(proof_uri: &str, manifest_json: &[u8]) -> Result<Vec<u8>, CodecError> {
    ContainerBox::new(TAG_SUPERBOX, Vec::new())
        .with_child(ContainerBox::new(TAG_DESCRIPTION, MANIFEST_DOMAIN.as_bytes()))
        .with_child(ContainerBox::new(TAG_PROOF_URI, proof_uri.as_bytes()))
        .with_child(ContainerBox::new(TAG_MANIFEST, manifest_json))
        .encode()
}

/// Decode the box tree. Any structural problem, including truncation,
/// yields `None`.
#[must_use]
pub fn decode_binding(bytes: &[u8]) -> Option<RawBinding> {
    let decoded = match decode_boxes(bytes) {
        Ok(d) => d,
        Err(e) => {
            debug!("binding: box decode failed: {}", e);
            return None;
        },
    };
    if decoded.truncated {
        debug!(boxes = decoded.boxes.len(), "binding: box tree truncated");
        return None;
    }

    let Some(superbox) = decoded.find(&TAG_SUPERBOX) else {
        let tags: Vec<String> = decoded.boxes.iter().map(|b| b.tag_str()).collect();
        debug!(?tags, "binding: no manifest superbox");
        return None;
    };
    let label = superbox.child(&TAG_DESCRIPTION)?;
    if label.payload != MANIFEST_DOMAIN.as_bytes() {
        debug!("binding: unknown description label");
        return None;
    }

    let proof_uri = String::from_utf8(superbox.child(&TAG_PROOF_URI)?.payload.clone()).ok()?;
    let manifest_json = superbox.child(&TAG_MANIFEST)?.payload.clone();
    Some(RawBinding {
        proof_uri,
        manifest_json,
    })
}
