//! Device authentication for the gateway handshake.
//!
//! The node answers `connect.challenge` by signing a canonical payload:
//!   `v2|deviceId|clientId|node|node||signedAtMs|token|nonce`
//! The empty field is the reserved scopes slot. Public key and signature are
//! sent base64url without padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use clawsy_core::messages::{DeviceAuth, NODE_MODE, NODE_ROLE, SIGNATURE_VERSION};
use clawsy_core::NodeResult;

use crate::device::DeviceIdentity;

/// Fields of the canonical signing payload, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPayload<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub signed_at_ms: i64,
    pub token: &'a str,
    pub nonce: &'a str,
}

impl SigningPayload<'_> {
    pub fn render(&self) -> String {
        format!(
            "{SIGNATURE_VERSION}|{}|{}|{NODE_ROLE}|{NODE_MODE}||{}|{}|{}",
            self.device_id, self.client_id, self.signed_at_ms, self.token, self.nonce
        )
    }
}

/// Sign the challenge nonce and build the `device` block of the connect request.
pub fn sign_device(
    identity: &DeviceIdentity,
    client_id: &str,
    token: &str,
    nonce: &str,
    signed_at_ms: i64,
) -> NodeResult<DeviceAuth> {
    let payload = SigningPayload {
        device_id: identity.device_id(),
        client_id,
        signed_at_ms,
        token,
        nonce,
    }
    .render();
    let signature = identity.sign(payload.as_bytes())?;

    Ok(DeviceAuth {
        id: identity.device_id().to_string(),
        public_key: encode_b64url(&identity.public_key_raw()),
        signature: encode_b64url(&signature),
        signed_at: signed_at_ms,
        nonce: nonce.to_string(),
    })
}

/// Verify a base64url signature over `payload` against a base64url public key.
pub fn verify_payload(public_key_b64url: &str, signature_b64url: &str, payload: &str) -> bool {
    let Some(key) = decode_b64url(public_key_b64url) else {
        return false;
    };
    let Ok(key): Result<[u8; 32], _> = key.try_into() else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key) else {
        return false;
    };
    let Some(sig) = decode_b64url(signature_b64url) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig) else {
        return false;
    };
    key.verify(payload.as_bytes(), &sig).is_ok()
}

pub fn encode_b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode_b64url(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(text.trim_end_matches('=')).ok()
}
