//! Text canonicalization shared by ingestion and search.

use sha2::{Digest, Sha256};

/// Lower-case, trim, and collapse whitespace runs to a single space.
///
/// Total and deterministic: empty input gives empty output.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable content fingerprint: hex SHA-256 of the normalized text.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(normalize(text).as_bytes()))
}
