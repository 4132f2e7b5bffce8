//! Descriptive metadata record (XMP packet).
//!
//! The packet carries the proof reference as `provseal:proofUri` and, when
//! it fits, the manifest JSON as base64 in `provseal:manifest`. Reading
//! tries a structured parse of the `rdf:Description` attributes first and
//! falls back to a permissive scan for the same names.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{ProvenanceError, Result};
use crate::formats::find_bytes;

/// XMP namespace for provseal properties.
pub const PROVSEAL_NS: &str = "https://ns.provseal.dev/xmp/1.0/";

const PROOF_URI_ATTR: &str = "provseal:proofUri";
const MANIFEST_ATTR: &str = "provseal:manifest";

/// Fields recovered from a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmpBinding {
    /// `provseal:proofUri` value.
    pub proof_uri: Option<String>,
    /// Decoded `provseal:manifest` value.
    pub manifest_json: Option<Vec<u8>>,
}

impl XmpBinding {
    /// Whether anything was recovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proof_uri.is_none() && self.manifest_json.is_none()
    }
}

/// Build a packet of at most `max_len` bytes.
///
/// The manifest is dropped if including it would exceed `max_len`.
///
/// # Errors
///
/// Returns [`ProvenanceError::Validation`] if even the reference alone does
/// not fit.
pub fn build_packet(proof_uri: &str, manifest_json: Option<&[u8]>, max_len: usize) -> Result<Vec<u8>> {
    if let Some(json) = manifest_json {
        let packet = render(proof_uri, Some(&STANDARD.encode(json)));
        if packet.len() <= max_len {
            return Ok(packet.into_bytes());
        }
    }

    let packet = render(proof_uri, None);
    if packet.len() > max_len {
        return Err(ProvenanceError::validation(format!(
            "XMP packet of {} bytes exceeds {max_len}",
            packet.len()
        )));
    }
    Ok(packet.into_bytes())
}

fn render(proof_uri: &str, manifest_b64: Option<&str>) -> String {
    let manifest_attr = manifest_b64
        .map(|m| format!("\n    {MANIFEST_ATTR}=\"{m}\""))
        .unwrap_or_default();
    format!(
        concat!(
            "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n",
            "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n",
            " <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n",
            "  <rdf:Description rdf:about=\"\"\n",
            "    xmlns:provseal=\"{ns}\"\n",
            "    {uri_attr}=\"{uri}\"{manifest}/>\n",
            " </rdf:RDF>\n",
            "</x:xmpmeta>\n",
            "<?xpacket end=\"w\"?>"
        ),
        ns = PROVSEAL_NS,
        uri_attr = PROOF_URI_ATTR,
        uri = escape(proof_uri),
        manifest = manifest_attr,
    )
}

/// Whether `packet` was written by provseal.
#[must_use]
pub fn is_provseal_packet(packet: &[u8]) -> bool {
    find_bytes(packet, PROVSEAL_NS.as_bytes()).is_some()
}

/// Structured parse of the `rdf:Description` attributes.
///
/// Returns `None` if the packet is not well-formed enough to parse.
#[must_use]
pub fn parse_packet(packet: &[u8]) -> Option<XmpBinding> {
    let text = std::str::from_utf8(packet).ok()?;
    if !text.contains("<x:xmpmeta") {
        return None;
    }

    let mut binding = XmpBinding::default();
    let mut rest = text;
    while let Some(start) = rest.find("<rdf:Description") {
        let after = &rest[start + "<rdf:Description".len()..];
        let (attrs, tail) = parse_attributes(after)?;
        for (name, value) in attrs {
            match name {
                PROOF_URI_ATTR if binding.proof_uri.is_none() => binding.proof_uri = Some(value),
                MANIFEST_ATTR if binding.manifest_json.is_none() => {
                    binding.manifest_json = STANDARD.decode(value.as_bytes()).ok();
                },
                _ => {},
            }
        }
        rest = tail;
    }

    (!binding.is_empty()).then_some(binding)
}

/// Permissive scan for the provseal properties anywhere in `bytes`.
///
/// Accepts attribute (`name="v"`, `name='v'`) and element
/// (`<name>v</name>`) forms and tolerates invalid UTF-8 around them.
#[must_use]
pub fn scan_packet(bytes: &[u8]) -> Option<XmpBinding> {
    let text = String::from_utf8_lossy(bytes);
    let binding = XmpBinding {
        proof_uri: scan_value(&text, PROOF_URI_ATTR),
        manifest_json: scan_value(&text, MANIFEST_ATTR)
            .and_then(|v| STANDARD.decode(v.as_bytes()).ok()),
    };
    (!binding.is_empty()).then_some(binding)
}

/// Parse `name="value"` pairs up to the end of the start tag.
fn parse_attributes(input: &str) -> Option<(Vec<(&str, String)>, &str)> {
    let mut attrs = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start();
        if let Some(tail) = rest.strip_prefix("/>") {
            return Some((attrs, tail));
        }
        if let Some(tail) = rest.strip_prefix('>') {
            return Some((attrs, tail));
        }

        let eq = rest.find('=')?;
        let name = rest[..eq].trim();
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
            return None;
        }
        let after_eq = rest[eq + 1..].trim_start();
        let quote = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let body = &after_eq[1..];
        let end = body.find(quote)?;
        attrs.push((name, unescape(&body[..end])));
        rest = &body[end + 1..];
    }
}

fn scan_value(text: &str, name: &str) -> Option<String> {
    let mut from = 0;
    while let Some(pos) = text[from..].find(name) {
        let at = from + pos;
        let after = &text[at + name.len()..];

        let attr = after.trim_start().strip_prefix('=').map(str::trim_start);
        if let Some(value) = attr.and_then(|v| {
            let quote = v.chars().next().filter(|c| *c == '"' || *c == '\'')?;
            let body = &v[1..];
            body.find(quote).map(|end| &body[..end])
        }) {
            if !value.is_empty() {
                return Some(unescape(value));
            }
        }

        if let Some(body) = after.strip_prefix('>') {
            if let Some(end) = body.find('<') {
                let value = body[..end].trim();
                if !value.is_empty() {
                    return Some(unescape(value));
                }
            }
        }

        from = at + name.len();
    }
    None
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
