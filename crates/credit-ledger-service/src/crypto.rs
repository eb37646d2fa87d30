//! Cryptographic utilities for webhook verification.
//!
//! Payment gateway webhooks carry an HMAC-SHA256 of the raw request body,
//! hex-encoded, keyed with the shared webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return the hex-encoded result (64 characters).
///
/// Returns `None` only if the MAC cannot be keyed, which HMAC never rejects
/// for any key length.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check a hex signature against the body.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    hmac_sha256_hex(secret, body)
        .is_some_and(|expected| constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()))
}
