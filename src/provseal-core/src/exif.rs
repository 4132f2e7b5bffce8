//! Auxiliary metadata record (minimal EXIF/TIFF).
//!
//! Written only when an image has no EXIF block of its own: a big-endian
//! TIFF header with one IFD holding `ImageDescription` (the proof
//! reference) and `Software`. Reading accepts either byte order.

/// `Exif\0\0` header preceding TIFF data in JPEG APP1 and some WEBP chunks.
pub const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Value written to the `Software` tag.
pub const SOFTWARE_TAG_VALUE: &str = "provseal";

const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_SOFTWARE: u16 = 0x0131;
const TYPE_ASCII: u16 = 2;
const IFD_ENTRY_LEN: usize = 12;

/// Fields read from IFD0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifFields {
    /// `ImageDescription`.
    pub description: Option<String>,
    /// `Software`.
    pub software: Option<String>,
}

impl ExifFields {
    /// Whether provseal wrote this block.
    #[must_use]
    pub fn is_provseal(&self) -> bool {
        self.software.as_deref() == Some(SOFTWARE_TAG_VALUE)
    }
}

/// Build TIFF bytes carrying `description`.
#[must_use]
pub fn build_tiff(description: &str) -> Vec<u8> {
    let entries: [(u16, &str); 2] = [
        (TAG_IMAGE_DESCRIPTION, description),
        (TAG_SOFTWARE, SOFTWARE_TAG_VALUE),
    ];

    // header (8) + count (2) + entries + next-IFD offset (4)
    let ifd_end = 8 + 2 + entries.len() * IFD_ENTRY_LEN + 4;

    let mut out = Vec::new();
    out.extend_from_slice(b"MM\0\x2A");
    out.extend_from_slice(&8u32.to_be_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_be_bytes());

    let mut values = Vec::new();
    for (tag, text) in entries {
        let mut value = text.as_bytes().to_vec();
        value.push(0);

        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&TYPE_ASCII.to_be_bytes());
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        if value.len() <= 4 {
            value.resize(4, 0);
            out.extend_from_slice(&value);
        } else {
            out.extend_from_slice(&((ifd_end + values.len()) as u32).to_be_bytes());
            values.extend_from_slice(&value);
        }
    }
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&values);
    out
}

/// Parse IFD0 of TIFF bytes. Returns `None` on any structural problem.
#[must_use]
pub fn parse_tiff(tiff: &[u8]) -> Option<ExifFields> {
    let big_endian = match tiff.get(..4)? {
        b"MM\0\x2A" => true,
        b"II\x2A\0" => false,
        _ => return None,
    };
    let reader = Reader { data: tiff, big_endian };

    let ifd = reader.u32(4)? as usize;
    let count = reader.u16(ifd)? as usize;

    let mut fields = ExifFields::default();
    for i in 0..count {
        let entry = ifd.checked_add(2 + i * IFD_ENTRY_LEN)?;
        let tag = reader.u16(entry)?;
        if tag != TAG_IMAGE_DESCRIPTION && tag != TAG_SOFTWARE {
            continue;
        }
        if reader.u16(entry + 2)? != TYPE_ASCII {
            continue;
        }
        let len = reader.u32(entry + 4)? as usize;
        let start = if len <= 4 {
            entry + 8
        } else {
            reader.u32(entry + 8)? as usize
        };
        let raw = tiff.get(start..start.checked_add(len)?)?;
        let text = String::from_utf8_lossy(raw)
            .trim_end_matches('\0')
            .to_string();

        match tag {
            TAG_IMAGE_DESCRIPTION => fields.description = Some(text),
            _ => fields.software = Some(text),
        }
    }
    Some(fields)
}

/// Strip an optional `Exif\0\0` header.
#[must_use]
pub fn strip_header(block: &[u8]) -> &[u8] {
    block.strip_prefix(EXIF_HEADER).unwrap_or(block)
}

struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl Reader<'_> {
    fn u16(&self, at: usize) -> Option<u16> {
        let b: [u8; 2] = self.data.get(at..at.checked_add(2)?)?.try_into().ok()?;
        Some(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(&self, at: usize) -> Option<u32> {
        let b: [u8; 4] = self.data.get(at..at.checked_add(4)?)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let tiff = build_tiff("https://proofs.example.com/abc");
        let fields = parse_tiff(&tiff).unwrap();
        assert_eq!(
            fields.description.as_deref(),
            Some("https://proofs.example.com/abc")
        );
        assert!(fields.is_provseal());
    }

    #[test]
    fn test_little_endian_short_value() {
        // II header, IFD at 8, one ImageDescription entry with inline "ab\0".
        let mut tiff = b"II\x2A\0".to_vec();
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&TAG_IMAGE_DESCRIPTION.to_le_bytes());
        tiff.extend_from_slice(&TYPE_ASCII.to_le_bytes());
        tiff.extend_from_slice(&3u32.to_le_bytes());
        tiff.extend_from_slice(b"ab\0\0");
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let fields = parse_tiff(&tiff).unwrap();
        assert_eq!(fields.description.as_deref(), Some("ab"));
        assert!(!fields.is_provseal());
    }

    #[test]
    fn test_truncated_rejected() {
        let tiff = build_tiff("https://proofs.example.com/abc");
        assert!(parse_tiff(&tiff[..20]).is_none());
        assert!(parse_tiff(b"XX").is_none());
    }

    #[test]
    fn test_strip_header() {
        assert_eq!(strip_header(b"Exif\0\0MM"), b"MM");
        assert_eq!(strip_header(b"MM"), b"MM");
    }
}
