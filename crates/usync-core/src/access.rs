//! Access control: session-key wrapping per access class, per-recipient
//! commitments, and the shareable handle.
//!
//! A private share lists one commitment per recipient. The unwrap key for a
//! recipient derives from the folder root and the recipient's hashed user
//! id; omitting a user from a later share denies them that share's session
//! key while old shares stay readable (the relay is append-only, so
//! revocation is forward-only). A failed commitment scan is a bare
//! `AccessDenied`: nothing distinguishes "unknown user" from "wrong share".

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto::{self, aead, derive_key, hmac_sha256, sha256, KdfParams};
use crate::error::CoreError;
use crate::index::{AccessHeader, CommitmentEntry, EncryptionMeta, KdfMeta};
use crate::obfuscate::{is_share_id, share_encoding};
use crate::store::{AccessClass, CommitmentRow};

/// How a publish protects its share.
#[derive(Debug, Clone)]
pub enum AccessSpec {
    Public,
    Protected { password: String },
    Private { user_ids: Vec<String> },
}

impl AccessSpec {
    pub fn class(&self) -> AccessClass {
        match self {
            AccessSpec::Public => AccessClass::Public,
            AccessSpec::Protected { .. } => AccessClass::Protected,
            AccessSpec::Private { .. } => AccessClass::Private,
        }
    }
}

/// What a consumer presents when opening a share.
#[derive(Clone)]
pub enum Credentials {
    /// Public shares only.
    Anonymous,
    /// Protected shares.
    Password(String),
    /// Private shares: the recipient's id plus the folder root conveyed to
    /// them when access was granted.
    User {
        user_id: String,
        folder_root: [u8; 32],
    },
}

/// The opaque string handed to recipients. Carries the share id and the
/// index Message-ID, so no subject scanning is ever needed to bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareHandle {
    pub share_id: String,
    pub index_message_id: String,
}

impl ShareHandle {
    /// `<share_id>.<base32(index message id)>` in the confusion-free alphabet.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}",
            self.share_id,
            share_encoding().encode(self.index_message_id.as_bytes())
        )
    }

    pub fn decode(s: &str) -> Result<Self, CoreError> {
        let (share_id, locator) = s
            .split_once('.')
            .ok_or_else(|| CoreError::InvalidFormat("share handle missing locator".into()))?;
        if !is_share_id(share_id) {
            return Err(CoreError::InvalidFormat("malformed share id".into()));
        }
        let raw = share_encoding()
            .decode(locator.as_bytes())
            .map_err(|_| CoreError::InvalidFormat("malformed share locator".into()))?;
        let index_message_id = String::from_utf8(raw)
            .map_err(|_| CoreError::InvalidFormat("share locator is not UTF-8".into()))?;
        Ok(Self {
            share_id: share_id.to_string(),
            index_message_id,
        })
    }
}

/// Hex SHA-256 of a user id.
pub fn user_id_hash(user_id: &str) -> String {
    hex::encode(sha256(user_id.as_bytes()))
}

fn verification_key(folder_root: &[u8; 32], uid_hash: &str) -> String {
    let mut msg = b"v".to_vec();
    msg.extend_from_slice(uid_hash.as_bytes());
    hex::encode(hmac_sha256(folder_root, &msg))
}

fn unwrap_key_for(folder_root: &[u8; 32], uid_hash: &str) -> [u8; 32] {
    let mut msg = b"k".to_vec();
    msg.extend_from_slice(uid_hash.as_bytes());
    hmac_sha256(folder_root, &msg)
}

/// Key under which a public share's session key is wrapped: a published
/// derivation, present only to keep the envelope shape uniform.
fn public_wrap_key(share_id: &str) -> [u8; 32] {
    let mut msg = b"usync-public-v1".to_vec();
    msg.extend_from_slice(share_id.as_bytes());
    sha256(&msg)
}

/// Build the encryption metadata for one publish.
///
/// Returns the metadata destined for the encrypted document (access-header
/// form is derived from it) plus the commitment rows to persist for private
/// shares.
pub fn wrap_session_key(
    class: AccessClass,
    share_id: &str,
    session_key: &[u8; 32],
    folder_root: &[u8; 32],
    password: Option<&str>,
    recipients: &[String],
) -> Result<(EncryptionMeta, Vec<CommitmentRow>), CoreError> {
    let mut meta = EncryptionMeta::new();
    let mut rows = Vec::new();
    match class {
        AccessClass::Public => {
            let outer = public_wrap_key(share_id);
            meta.wrapped_key = Some(BASE64.encode(aead::wrap_key(
                session_key,
                &outer,
                share_id.as_bytes(),
            )));
        }
        AccessClass::Protected => {
            let password = password
                .ok_or_else(|| CoreError::InvalidFormat("protected share needs a password".into()))?;
            let salt = crypto::random_salt();
            let params = KdfParams::default();
            let outer = derive_key(password, &salt, &params)?;
            meta.wrapped_key = Some(BASE64.encode(aead::wrap_key(
                session_key,
                &outer,
                share_id.as_bytes(),
            )));
            meta.kdf = Some(KdfMeta {
                params,
                salt: BASE64.encode(salt),
            });
        }
        AccessClass::Private => {
            if recipients.is_empty() {
                return Err(CoreError::InvalidFormat(
                    "private share with zero recipients".into(),
                ));
            }
            let mut entries = Vec::with_capacity(recipients.len());
            for user_id in recipients {
                let uid_hash = user_id_hash(user_id);
                let vkey = verification_key(folder_root, &uid_hash);
                let outer = unwrap_key_for(folder_root, &uid_hash);
                let wrapped = aead::wrap_key(session_key, &outer, share_id.as_bytes());
                entries.push(CommitmentEntry {
                    user_id_hash: uid_hash.clone(),
                    verification_key: vkey.clone(),
                    wrapped_session_key: BASE64.encode(&wrapped),
                });
                rows.push(CommitmentRow {
                    share_id: share_id.to_string(),
                    user_id_hash: uid_hash,
                    verification_key: vkey,
                    wrapped_session_key: wrapped,
                });
            }
            meta.access_commitments = Some(entries);
        }
    }
    Ok((meta, rows))
}

/// Recover the session key from an access header using the caller's
/// credentials. Every failure path is `AccessDenied`; no oracle leaks why.
pub fn unwrap_session_key(
    header: &AccessHeader,
    credentials: &Credentials,
) -> Result<[u8; 32], CoreError> {
    let share_id = header.share_id.as_bytes();
    match (header.access_class, credentials) {
        (AccessClass::Public, _) => {
            let wrapped = decode_b64(header.encryption.wrapped_key.as_deref())?;
            let outer = public_wrap_key(&header.share_id);
            aead::unwrap_key(&wrapped, &outer, share_id).map_err(|_| CoreError::AccessDenied)
        }
        (AccessClass::Protected, Credentials::Password(password)) => {
            let kdf = header
                .encryption
                .kdf
                .as_ref()
                .ok_or_else(|| CoreError::InvalidFormat("protected share missing kdf".into()))?;
            let salt = BASE64
                .decode(&kdf.salt)
                .map_err(|_| CoreError::InvalidFormat("malformed kdf salt".into()))?;
            let outer = derive_key(password, &salt, &kdf.params)?;
            let wrapped = decode_b64(header.encryption.wrapped_key.as_deref())?;
            aead::unwrap_key(&wrapped, &outer, share_id).map_err(|_| CoreError::AccessDenied)
        }
        (AccessClass::Private, Credentials::User { user_id, folder_root }) => {
            let commitments = header
                .encryption
                .access_commitments
                .as_deref()
                .unwrap_or(&[]);
            let uid_hash = user_id_hash(user_id);
            let vkey = verification_key(folder_root, &uid_hash);
            // Linear scan; a miss and a bad unwrap are indistinguishable.
            for entry in commitments {
                if entry.verification_key == vkey {
                    let wrapped = BASE64
                        .decode(&entry.wrapped_session_key)
                        .map_err(|_| CoreError::AccessDenied)?;
                    let outer = unwrap_key_for(folder_root, &uid_hash);
                    return aead::unwrap_key(&wrapped, &outer, share_id)
                        .map_err(|_| CoreError::AccessDenied);
                }
            }
            Err(CoreError::AccessDenied)
        }
        // Credentials of the wrong shape for the class.
        _ => Err(CoreError::AccessDenied),
    }
}

fn decode_b64(value: Option<&str>) -> Result<Vec<u8>, CoreError> {
    let value = value.ok_or_else(|| CoreError::InvalidFormat("missing wrapped key".into()))?;
    BASE64
        .decode(value)
        .map_err(|_| CoreError::InvalidFormat("malformed wrapped key".into()))
}
