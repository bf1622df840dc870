//! Ed25519 device identity.
//!
//! The device id presented to the gateway is derived from the public key, so
//! a node keeps the same identity for as long as it keeps its signing key.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

use clawsy_core::{NodeError, NodeResult};

/// Signing keypair plus the device id derived from it.
pub struct DeviceIdentity {
    signing_key: SigningKey,
    device_id: String,
}

impl DeviceIdentity {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Rebuild an identity from a raw 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8]) -> NodeResult<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            NodeError::Crypto(format!(
                "invalid secret key length {} (expected 32 bytes)",
                bytes.len()
            ))
        })?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let device_id = clawsy_core::device_id(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            device_id,
        }
    }

    /// Lowercase hex SHA-256 of the raw public key.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Raw 32-byte public key.
    pub fn public_key_raw(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Raw 32-byte secret key, for the keystore only.
    pub(crate) fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign `payload`, returning the 64-byte signature.
    pub fn sign(&self, payload: &[u8]) -> NodeResult<Vec<u8>> {
        let signature = self
            .signing_key
            .try_sign(payload)
            .map_err(|e| NodeError::Crypto(format!("signing failed: {e}")))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}
