//! Common utilities shared across modules.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Get current UTC timestamp in seconds since UNIX_EPOCH.
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Content hash of an embedding vector (little-endian f32 bytes).
pub fn vector_hash(vector: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for value in vector {
        hasher.update(value.to_le_bytes());
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}
