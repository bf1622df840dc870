//! Device identifiers derived from Ed25519 public keys.
//!
//! device_id = lowercase hex of SHA-256(raw 32-byte public key). The gateway
//! recomputes it from the public key in the connect request, so the encoding
//! must not change.

use sha2::{Digest, Sha256};

/// Number of hex characters shown in log lines.
const SHORT_ID_LEN: usize = 12;

/// Compute the device identifier for a raw public key.
pub fn device_id(public_key: &[u8]) -> String {
    let hash = Sha256::digest(public_key);
    hex::encode(hash)
}

/// Abbreviated device id for logs and status lines.
pub fn short_id(device_id: &str) -> &str {
    match device_id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &device_id[..idx],
        None => device_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_lowercase_hex_sha256() {
        let id = device_id(&[7u8; 32]);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn device_id_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            device_id(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn device_id_is_deterministic_and_key_sensitive() {
        let a = device_id(&[1u8; 32]);
        assert_eq!(a, device_id(&[1u8; 32]));
        assert_ne!(a, device_id(&[2u8; 32]));
    }

    #[test]
    fn short_id_truncates() {
        let id = device_id(&[3u8; 32]);
        assert_eq!(short_id(&id).len(), 12);
        assert_eq!(short_id("abc"), "abc");
    }
}
