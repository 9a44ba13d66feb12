//! Text-safe encryption for string payloads.
//!
//! Wraps the binary AEAD primitive in base64 so ciphertext can travel
//! through string-only channels.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::aead;
use crate::keys::DeviceKey;
use invigil_common::{Error, Result};

/// Encrypt a UTF-8 string, returning base64-encoded ciphertext.
pub fn encrypt_string(key: &DeviceKey, plaintext: &str) -> Result<String> {
    let ciphertext = aead::encrypt(key, plaintext.as_bytes())?;
    Ok(BASE64.encode(ciphertext))
}

/// Decrypt base64 ciphertext produced by [`encrypt_string`].
///
/// # Errors
/// - Returns error if the encoding is invalid
/// - Returns error if authentication fails or the plaintext is not UTF-8
pub fn decrypt_string(key: &DeviceKey, ciphertext: &str) -> Result<String> {
    let raw = BASE64
        .decode(ciphertext)
        .map_err(|e| Error::Encryption(format!("Invalid ciphertext encoding: {}", e)))?;

    let plaintext = aead::decrypt(key, &raw)?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::Encryption(format!("Decrypted payload is not UTF-8: {}", e)))
}
