//! Content hashing for cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute the SHA256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, so equal values always
/// produce the same digest. Returns a 64-character lowercase hex string.
///
/// # Errors
/// Returns an error if the value cannot be serialized to JSON.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(hex_digest(json.as_bytes()))
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
