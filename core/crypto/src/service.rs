//! Key provisioning and payload encryption service.
//!
//! Owns the lazy read-generate-store lifecycle of the device key and
//! applies the encryption on/off configuration symmetrically.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::aead;
use crate::keys::DeviceKey;
use crate::text;
use invigil_common::Result;

/// Reserved metadata key the serialized device key persists under.
pub const DEVICE_KEY_METADATA_KEY: &str = "device_key";

/// Persistence seam for the serialized device key.
///
/// Implemented by the local store against its metadata collection.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the serialized key material, if any.
    async fn load_key_material(&self) -> Result<Option<String>>;

    /// Persist the serialized key material. Last writer wins.
    async fn store_key_material(&self, material: &str) -> Result<()>;
}

/// Encrypts and decrypts record payloads with the per-device key.
///
/// When constructed disabled, [`encrypt_bytes`](Self::encrypt_bytes) and
/// [`decrypt_bytes`](Self::decrypt_bytes) are identity functions in both
/// directions.
#[derive(Clone)]
pub struct EncryptionService {
    keys: Arc<dyn KeyStore>,
    enabled: bool,
    cached: Arc<RwLock<Option<DeviceKey>>>,
}

impl EncryptionService {
    /// Create a service over the given key persistence.
    pub fn new(keys: Arc<dyn KeyStore>, enabled: bool) -> Self {
        Self {
            keys,
            enabled,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Whether payload encryption is configured on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fetch the device key, generating and persisting one on first use.
    ///
    /// Safe under concurrent callers: provisioning is serialized on the
    /// in-process cache lock, and the store write is the cross-instance
    /// serialization point (last writer wins, at most one logical key
    /// survives).
    pub async fn get_or_create_key(&self) -> Result<DeviceKey> {
        if let Some(key) = self.cached.read().await.as_ref() {
            return Ok(key.clone());
        }

        let mut slot = self.cached.write().await;
        // A concurrent caller may have provisioned while we waited.
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.keys.load_key_material().await? {
            Some(material) => {
                debug!("Loaded existing device key");
                DeviceKey::import(&material)?
            }
            None => {
                let key = DeviceKey::generate();
                self.keys.store_key_material(&key.export()).await?;
                info!("Generated new device key");
                key
            }
        };

        *slot = Some(key.clone());
        Ok(key)
    }

    /// Encrypt a binary payload; identity when encryption is disabled.
    pub async fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if !self.enabled {
            return Ok(plaintext.to_vec());
        }
        let key = self.get_or_create_key().await?;
        aead::encrypt(&key, plaintext)
    }

    /// Decrypt a binary payload; identity when encryption is disabled.
    pub async fn decrypt_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.enabled {
            return Ok(payload.to_vec());
        }
        let key = self.get_or_create_key().await?;
        aead::decrypt(&key, payload)
    }

    /// Encrypt a string payload; identity when encryption is disabled.
    pub async fn encrypt_text(&self, plaintext: &str) -> Result<String> {
        if !self.enabled {
            return Ok(plaintext.to_string());
        }
        let key = self.get_or_create_key().await?;
        text::encrypt_string(&key, plaintext)
    }

    /// Decrypt a string payload; identity when encryption is disabled.
    pub async fn decrypt_text(&self, payload: &str) -> Result<String> {
        if !self.enabled {
            return Ok(payload.to_string());
        }
        let key = self.get_or_create_key().await?;
        text::decrypt_string(&key, payload)
    }

    /// Prepare a media payload for storage.
    ///
    /// Returns the stored bytes and the `encrypted` flag that must be
    /// recorded alongside them.
    pub async fn encrypt_media(&self, plaintext: &[u8]) -> Result<(Vec<u8>, bool)> {
        if !self.enabled {
            return Ok((plaintext.to_vec(), false));
        }
        let key = self.get_or_create_key().await?;
        Ok((aead::encrypt(&key, plaintext)?, true))
    }

    /// Recover a stored media payload for upload.
    ///
    /// The record's own `encrypted` flag decides whether to decrypt, not
    /// the current configuration, so flipping the configuration never
    /// corrupts previously stored records.
    pub async fn decrypt_media(&self, encrypted: bool, payload: &[u8]) -> Result<Vec<u8>> {
        if !encrypted {
            return Ok(payload.to_vec());
        }
        let key = self.get_or_create_key().await?;
        aead::decrypt(&key, payload)
    }
}
