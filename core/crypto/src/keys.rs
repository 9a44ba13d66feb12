//! Device key type with secure memory handling.
//!
//! The key automatically zeroizes its memory on drop to prevent sensitive
//! data from persisting in memory.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use invigil_common::{Error, Result};

/// Length of the device key in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Symmetric key protecting media evidence at rest.
///
/// Exactly one logical key exists per device: generated lazily on first
/// use and persisted in the metadata collection in exported form. The key
/// is never rotated within a device's lifetime.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey {
    key: [u8; KEY_LENGTH],
}

impl DeviceKey {
    /// Create a device key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Generate a random device key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Serialize the key for persistence in the metadata collection.
    pub fn export(&self) -> String {
        BASE64.encode(self.key)
    }

    /// Restore a key from its exported form.
    ///
    /// # Errors
    /// - Returns error if the encoding is invalid or the length is wrong
    pub fn import(serialized: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(serialized)
            .map_err(|e| Error::Encryption(format!("Invalid key encoding: {}", e)))?;

        if bytes.len() != KEY_LENGTH {
            return Err(Error::Encryption(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }
}

impl PartialEq for DeviceKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for DeviceKey {}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceKey([REDACTED])")
    }
}
