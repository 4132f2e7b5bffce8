//! Proof reference validation.
//!
//! A proof reference recovered from an image is attacker-controlled and is
//! later dereferenced by verifiers. Both the embedder (before writing) and
//! the extractor (after reading) run it through [`validate_proof_uri`].

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::{ProvenanceError, Result};

/// Default upper bound on proof reference length.
pub const DEFAULT_MAX_PROOF_URI_LEN: usize = 2048;

/// Validate a proof reference.
///
/// Requirements: `https` scheme, at most `max_len` bytes, no control
/// characters or whitespace, no userinfo, and a host that is neither
/// `localhost` nor a loopback, private, link-local or unspecified IP
/// literal.
///
/// # Errors
///
/// Returns [`ProvenanceError::Validation`] describing the first violation.
pub fn validate_proof_uri(uri: &str, max_len: usize) -> Result<Url> {
    if uri.is_empty() {
        return Err(ProvenanceError::validation("proof reference is empty"));
    }
    if uri.len() > max_len {
        return Err(ProvenanceError::validation(format!(
            "proof reference is {} bytes, maximum {max_len}",
            uri.len()
        )));
    }
    // The URL parser silently strips tabs and newlines, so check first.
    if uri.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ProvenanceError::validation(
            "proof reference contains control or whitespace characters",
        ));
    }

    let url = Url::parse(uri)
        .map_err(|e| ProvenanceError::validation(format!("proof reference is not a URL: {e}")))?;

    if url.scheme() != "https" {
        return Err(ProvenanceError::validation(format!(
            "proof reference must use https, got {}",
            url.scheme()
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ProvenanceError::validation(
            "proof reference must not embed credentials",
        ));
    }

    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(ProvenanceError::validation(
                    "proof reference must not point at localhost",
                ));
            }
        },
        Some(Host::Ipv4(ip)) => {
            if is_internal_v4(ip) {
                return Err(ProvenanceError::validation(format!(
                    "proof reference host {ip} is not a public address"
                )));
            }
        },
        Some(Host::Ipv6(ip)) => {
            if is_internal_v6(ip) {
                return Err(ProvenanceError::validation(format!(
                    "proof reference host {ip} is not a public address"
                )));
            }
        },
        None => return Err(ProvenanceError::validation("proof reference has no host")),
    }

    Ok(url)
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xC0) == 0x40)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xFE00) == 0xFC00
        // fe80::/10 link local
        || (first & 0xFFC0) == 0xFE80
}
