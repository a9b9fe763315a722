//! The core-index document and its access header.
//!
//! The document is the bootstrap artifact: it maps a share to every
//! Message-ID needed to rebuild the folder. It travels deflated and
//! AEAD-encrypted inside a signed envelope. The access header repeats the
//! key-wrapping fields in the clear, since a recipient needs them before it
//! can decrypt anything.

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;
use crate::store::AccessClass;

pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreIndex {
    pub version: u32,
    pub created_at: i64,
    pub share: ShareMeta,
    pub folder: FolderMeta,
    pub files: Vec<FileEntry>,
    pub encryption: EncryptionMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareMeta {
    pub share_id: String,
    pub folder_id: String,
    pub access_class: AccessClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMeta {
    pub relative_root: String,
    pub file_count: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_id: i64,
    pub path: String,
    pub size: u64,
    pub content_hash: String,
    pub segments: Vec<SegmentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub index: u32,
    pub size: u64,
    pub plaintext_hash: String,
    pub message_id: String,
    #[serde(default)]
    pub replica_message_ids: Vec<String>,
}

/// KDF parameters and salt for protected shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfMeta {
    #[serde(flatten)]
    pub params: KdfParams,
    /// Base64 salt, fresh per publish.
    pub salt: String,
}

/// One per-recipient entry in a private share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentEntry {
    pub user_id_hash: String,
    pub verification_key: String,
    /// Base64 AEAD blob holding the session key.
    pub wrapped_session_key: String,
}

/// Key-wrapping metadata. Appears twice with the same shape: in the clear
/// access header of the envelope, and inside the encrypted document (where
/// `segment_key` is additionally present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMeta {
    pub aead: String,
    pub sig_alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfMeta>,
    /// Base64 wrapped session key (public and protected shares).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_commitments: Option<Vec<CommitmentEntry>>,
    /// Base64 folder segment key; only ever present in the encrypted copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_key: Option<String>,
}

/// The clear portion of the envelope a recipient reads before decrypting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessHeader {
    pub share_id: String,
    pub access_class: AccessClass,
    #[serde(flatten)]
    pub encryption: EncryptionMeta,
}

pub const AEAD_NAME: &str = "AES-256-GCM";
pub const SIG_ALG_NAME: &str = "ed25519";

impl EncryptionMeta {
    pub fn new() -> Self {
        Self {
            aead: AEAD_NAME.to_string(),
            sig_alg: SIG_ALG_NAME.to_string(),
            kdf: None,
            wrapped_key: None,
            access_commitments: None,
            segment_key: None,
        }
    }

    /// Copy for the clear access header: identical wrapping fields, but the
    /// segment key never leaves the ciphertext.
    pub fn for_access_header(&self) -> Self {
        Self {
            segment_key: None,
            ..self.clone()
        }
    }
}

impl Default for EncryptionMeta {
    fn default() -> Self {
        Self::new()
    }
}
