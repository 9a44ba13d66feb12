//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::DeviceKey;
use invigil_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext under the device key.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated per call
/// - Output length is plaintext length + NONCE_SIZE + TAG_SIZE
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &DeviceKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Encryption(format!("Encryption failed: {}", e)))?;

    // Prepend nonce to ciphertext
    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Preconditions
/// - `payload` must be at least NONCE_SIZE + TAG_SIZE bytes
/// - Payload format: nonce || encrypted_data || tag
///
/// # Errors
/// - Returns error if the payload is too short
/// - Returns error if authentication fails (wrong key or tampered data)
pub fn decrypt(key: &DeviceKey, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Encryption("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = payload.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|e| Error::Encryption(format!("Decryption failed: {}", e)))
}
