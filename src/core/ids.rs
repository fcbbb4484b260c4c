//! Record identifiers.
//!
//! Every persistent record is keyed by a ULID string. Fresh records get a
//! random ULID; content-derived identities (filesystem id, semantic id,
//! MIME-whitelist id) are *stable* ULIDs built from the first 128 bits of a
//! SHA-256 digest, so the same input always maps to the same id.

use sha2::{Digest, Sha256};
use ulid::Ulid;

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Deterministic id for a canonical string form of some value.
pub fn stable_id(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ulid::from_bytes(bytes).to_string()
}

/// Deterministic id for an ordered list of parts.
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn stable_id_of_parts<S: AsRef<str>>(parts: &[S]) -> String {
    let mut canonical = String::new();
    for part in parts {
        let part = part.as_ref();
        canonical.push_str(&part.len().to_string());
        canonical.push(':');
        canonical.push_str(part);
        canonical.push(';');
    }
    stable_id(&canonical)
}

/// Parse an id back out of free text (e.g. a symlink stem).
pub fn parse_id(text: &str) -> Option<String> {
    let trimmed = text.trim().trim_matches('.');
    Ulid::from_string(trimmed).ok().map(|u| u.to_string())
}
