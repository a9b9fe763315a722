//! Per-folder key material and the acting user identity.
//!
//! Every folder owns an Ed25519 signing keypair (index envelopes are signed
//! with it) and a 32-byte symmetric root. The root never leaves the machine
//! in the clear: segment and commitment keys are derived from it with
//! domain-separated HMAC, and the at-rest rows in the store are sealed under
//! a key belonging to the acting user.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use zeroize::Zeroize;

use crate::error::CoreError;

use super::aead::{self, KEY_SIZE};
use super::{hmac_sha256, random_key, sha256};

/// The acting user on every publish/consume call. Not a global: callers pass
/// it explicitly, and persistence of "who I am" lives outside the core.
#[derive(Clone)]
pub struct Actor {
    /// Stable opaque user id (hashed into access commitments).
    pub user_id: String,
    /// Secret used to seal folder keys at rest.
    store_key: [u8; KEY_SIZE],
}

impl Actor {
    pub fn new(user_id: impl Into<String>, store_key: [u8; KEY_SIZE]) -> Self {
        Self {
            user_id: user_id.into(),
            store_key,
        }
    }

    /// SHA-256 of the user id, hex-encoded. This is what private shares embed.
    pub fn user_id_hash(&self) -> String {
        hex::encode(sha256(self.user_id.as_bytes()))
    }

    /// Key under which this user's folder-key rows are sealed.
    fn at_rest_key(&self) -> [u8; KEY_SIZE] {
        hmac_sha256(&self.store_key, b"usync-at-rest-v1")
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        self.store_key.zeroize();
    }
}

/// Per-folder signing keypair plus symmetric root.
pub struct FolderKeys {
    signing: SigningKey,
    root: [u8; KEY_SIZE],
}

impl FolderKeys {
    /// Generate fresh keys for a new folder.
    pub fn generate() -> Self {
        let signing = SigningKey::from_bytes(&random_key());
        Self {
            signing,
            root: random_key(),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// The folder symmetric root. Callers must not persist it unsealed.
    pub fn root(&self) -> &[u8; KEY_SIZE] {
        &self.root
    }

    /// Stable key that encrypts every posted segment body of this folder.
    /// Carried to recipients inside the encrypted index document, so segments
    /// posted for one share stay decodable by later shares of the same folder.
    pub fn segment_key(&self, folder_id: &str) -> [u8; KEY_SIZE] {
        segment_key_from_root(&self.root, folder_id)
    }

    /// Seal for at-rest storage. Returns `(encrypted_signing_key, encrypted_root)`.
    pub fn seal(&self, actor: &Actor, folder_id: &str) -> (Vec<u8>, Vec<u8>) {
        let key = actor.at_rest_key();
        let aad = folder_id.as_bytes();
        let enc_signing = aead::seal(&key, &self.signing.to_bytes(), aad);
        let enc_root = aead::seal(&key, &self.root, aad);
        (enc_signing, enc_root)
    }

    /// Open at-rest rows written by [`FolderKeys::seal`].
    pub fn unseal(
        actor: &Actor,
        folder_id: &str,
        enc_signing: &[u8],
        enc_root: &[u8],
    ) -> Result<Self, CoreError> {
        let key = actor.at_rest_key();
        let aad = folder_id.as_bytes();
        let signing_bytes = aead::open(&key, enc_signing, aad)?;
        let root_bytes = aead::open(&key, enc_root, aad)?;

        let signing: [u8; 32] = signing_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidFormat("signing key has wrong length".into()))?;
        let root: [u8; KEY_SIZE] = root_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidFormat("folder root has wrong length".into()))?;

        Ok(Self {
            signing: SigningKey::from_bytes(&signing),
            root,
        })
    }
}

impl Drop for FolderKeys {
    fn drop(&mut self) {
        self.root.zeroize();
        // SigningKey zeroizes itself on drop.
    }
}

/// Segment data key derived from a folder root (recipient side: the root is
/// not available, only this derived key, delivered via the index document).
pub fn segment_key_from_root(root: &[u8; KEY_SIZE], folder_id: &str) -> [u8; KEY_SIZE] {
    let mut msg = b"segment-key\x00".to_vec();
    msg.extend_from_slice(folder_id.as_bytes());
    hmac_sha256(root, &msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Actor {
        Actor::new("alice@example", [3u8; KEY_SIZE])
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let keys = FolderKeys::generate();
        let (enc_signing, enc_root) = keys.seal(&actor(), "folder-1");
        let back = FolderKeys::unseal(&actor(), "folder-1", &enc_signing, &enc_root).unwrap();
        assert_eq!(back.root(), keys.root());
        assert_eq!(
            back.verifying_key().to_bytes(),
            keys.verifying_key().to_bytes()
        );
    }

    #[test]
    fn wrong_actor_cannot_unseal() {
        let keys = FolderKeys::generate();
        let (enc_signing, enc_root) = keys.seal(&actor(), "folder-1");
        let mallory = Actor::new("mallory", [9u8; KEY_SIZE]);
        assert!(FolderKeys::unseal(&mallory, "folder-1", &enc_signing, &enc_root).is_err());
    }

    #[test]
    fn wrong_folder_aad_cannot_unseal() {
        let keys = FolderKeys::generate();
        let (enc_signing, enc_root) = keys.seal(&actor(), "folder-1");
        assert!(FolderKeys::unseal(&actor(), "folder-2", &enc_signing, &enc_root).is_err());
    }

    #[test]
    fn signature_verifies() {
        let keys = FolderKeys::generate();
        let sig = keys.sign(b"envelope");
        assert!(keys.verifying_key().verify_strict(b"envelope", &sig).is_ok());
        assert!(keys
            .verifying_key()
            .verify_strict(b"tampered", &sig)
            .is_err());
    }

    #[test]
    fn segment_key_is_per_folder() {
        let keys = FolderKeys::generate();
        assert_ne!(keys.segment_key("a"), keys.segment_key("b"));
        assert_eq!(
            keys.segment_key("a"),
            segment_key_from_root(keys.root(), "a")
        );
    }
}
