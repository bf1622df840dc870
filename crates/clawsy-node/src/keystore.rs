//! File-based storage for the device signing key.
//!
//! The key lives at `~/.clawsy/device.key` by default as the base64 of the
//! raw 32-byte Ed25519 secret. The directory is created 0700 and the file
//! written 0600.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use clawsy_core::{NodeError, NodeResult};

use crate::device::DeviceIdentity;

/// Persistent store for a single device key.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    /// Store the key at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location (`~/.clawsy/device.key`).
    pub fn default_location() -> NodeResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| NodeError::Keystore("cannot determine home directory".into()))?;
        Ok(Self::new(home.join(".clawsy").join("device.key")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the stored identity.
    pub fn load(&self) -> NodeResult<DeviceIdentity> {
        if !self.path.exists() {
            return Err(NodeError::Keystore(format!(
                "no device key at {}",
                self.path.display()
            )));
        }

        let encoded = fs::read_to_string(&self.path)?;
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| NodeError::Keystore(format!("corrupt device key: {e}")))?;
        DeviceIdentity::from_secret_bytes(&raw)
            .map_err(|e| NodeError::Keystore(format!("corrupt device key: {e}")))
    }

    /// Load the stored identity, generating and saving one on first use.
    pub fn load_or_generate(&self) -> NodeResult<DeviceIdentity> {
        if self.path.exists() {
            return self.load();
        }
        let identity = DeviceIdentity::generate();
        self.save(&identity)?;
        tracing::info!(
            device = clawsy_core::short_id(identity.device_id()),
            path = %self.path.display(),
            "generated new device key"
        );
        Ok(identity)
    }

    /// Replace the stored key with a fresh one.
    pub fn regenerate(&self) -> NodeResult<DeviceIdentity> {
        let identity = DeviceIdentity::generate();
        self.save(&identity)?;
        tracing::info!(
            device = clawsy_core::short_id(identity.device_id()),
            "device key regenerated"
        );
        Ok(identity)
    }

    fn save(&self, identity: &DeviceIdentity) -> NodeResult<()> {
        self.ensure_dir()?;
        let encoded = STANDARD.encode(identity.secret_bytes());
        fs::write(&self.path, format!("{encoded}\n"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Ensure the parent directory exists with secure permissions.
    fn ensure_dir(&self) -> NodeResult<()> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() || dir.exists() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_generate_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tmp.path().join("keys").join("device.key"));

        assert!(!store.exists());
        let first = store.load_or_generate().unwrap();
        assert!(store.exists());
        let second = store.load_or_generate().unwrap();
        assert_eq!(first.device_id(), second.device_id());
    }

    #[test]
    fn regenerate_changes_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tmp.path().join("device.key"));

        let first = store.load_or_generate().unwrap();
        let fresh = store.regenerate().unwrap();
        assert_ne!(first.device_id(), fresh.device_id());
        assert_eq!(store.load().unwrap().device_id(), fresh.device_id());
    }

    #[test]
    fn missing_and_corrupt_keys_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tmp.path().join("device.key"));
        assert!(matches!(store.load(), Err(NodeError::Keystore(_))));

        fs::write(store.path(), "not base64 !!").unwrap();
        assert!(matches!(store.load(), Err(NodeError::Keystore(_))));

        fs::write(store.path(), STANDARD.encode([1u8; 8])).unwrap();
        assert!(matches!(store.load(), Err(NodeError::Keystore(_))));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tmp.path().join("sub").join("device.key"));
        store.load_or_generate().unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = fs::metadata(tmp.path().join("sub")).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
