//! Cryptographic primitives for Invigil.
//!
//! This module provides:
//! - Authenticated encryption using XChaCha20-Poly1305
//! - A per-device symmetric key with automatic zeroization
//! - Text-safe encryption for string payloads
//! - Lazy key provisioning through the metadata collection
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod keys;
pub mod service;
pub mod text;

pub use aead::{decrypt, encrypt};
pub use keys::{DeviceKey, KEY_LENGTH};
pub use service::{EncryptionService, KeyStore, DEVICE_KEY_METADATA_KEY};
pub use text::{decrypt_string, encrypt_string};
