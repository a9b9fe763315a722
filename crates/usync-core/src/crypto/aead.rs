//! AES-256-GCM sealing with random nonces.
//!
//! Blob layout is always `nonce || ciphertext || tag` (the tag is appended to
//! the ciphertext by the cipher). Tag mismatch surfaces as
//! `CoreError::Integrity`; nothing is returned on failure.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::CoreError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const SALT_SIZE: usize = 32;

/// Encrypt `plaintext` under `key` with optional associated data.
/// Returns `nonce || ciphertext || tag`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .expect("AES-GCM encryption is infallible for in-memory buffers");

    let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    out
}

/// Decrypt a `nonce || ciphertext || tag` blob produced by [`seal`].
pub fn open(key: &[u8; KEY_SIZE], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>, CoreError> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CoreError::InvalidFormat(format!(
            "AEAD blob too short: {} bytes",
            blob.len()
        )));
    }
    let (nonce, ct) = blob.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad })
        .map_err(|_| CoreError::Integrity("AEAD tag mismatch".to_string()))
}

/// Wrap an inner 32-byte key under an outer key: `nonce || ciphertext || tag`.
pub fn wrap_key(inner: &[u8; KEY_SIZE], outer: &[u8; KEY_SIZE], aad: &[u8]) -> Vec<u8> {
    seal(outer, inner, aad)
}

/// Reverse of [`wrap_key`].
pub fn unwrap_key(
    wrapped: &[u8],
    outer: &[u8; KEY_SIZE],
    aad: &[u8],
) -> Result<[u8; KEY_SIZE], CoreError> {
    let plain = open(outer, wrapped, aad)?;
    let key: [u8; KEY_SIZE] = plain
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::InvalidFormat("wrapped key has wrong length".to_string()))?;
    Ok(key)
}
