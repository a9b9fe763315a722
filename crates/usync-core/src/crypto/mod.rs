//! Cryptographic primitives: AES-256-GCM sealing, password KDFs, and
//! per-folder signing keys.

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal, unwrap_key, wrap_key, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{Actor, FolderKeys};

use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// HMAC-SHA256 of `data` under `key` as a 32-byte array.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    use hmac::{Hmac, Mac};
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Fill a fresh 32-byte key from the OS CSPRNG.
pub fn random_key() -> [u8; 32] {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Fresh 32-byte salt from the OS CSPRNG.
pub fn random_salt() -> [u8; SALT_SIZE] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
