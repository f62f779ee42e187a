// src/fingerprint.rs
//! Stable content fingerprints for duplicate detection.
//!
//! Text fingerprints are computed over a normalized form (whitespace collapsed,
//! trimmed, lowercased) so that cosmetic reposts hash identically. Media
//! fingerprints hash the raw bytes and carry an `img:` prefix to keep the two
//! namespaces disjoint.

use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Prefix for media fingerprints; text fingerprints are bare hex.
pub const MEDIA_PREFIX: &str = "img:";

fn ws_regex() -> &'static Regex {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Collapse whitespace runs to a single space, trim, lowercase.
pub fn normalize(text: &str) -> String {
    ws_regex()
        .replace_all(text, " ")
        .trim()
        .to_lowercase()
}

/// SHA-256 over the normalized text, lowercase hex. `None` when the text
/// normalizes to nothing (such items are not deduplicable).
pub fn text_fingerprint(text: &str) -> Option<String> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    Some(hex_sha256(normalized.as_bytes()))
}

/// SHA-256 over the raw media bytes, prefixed with [`MEDIA_PREFIX`].
pub fn media_fingerprint(bytes: &[u8]) -> String {
    format!("{MEDIA_PREFIX}{}", hex_sha256(bytes))
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
