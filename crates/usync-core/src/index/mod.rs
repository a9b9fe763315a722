//! Core-index manager: build the bootstrap document from store rows, seal
//! and post it, and fetch/open it from a share handle.
//!
//! The share handle carries the index Message-ID, so fetching never scans
//! subjects: handle → fetch → verify → decrypt → document.

pub mod document;
mod envelope;

pub use document::{
    AccessHeader, CommitmentEntry, CoreIndex, EncryptionMeta, FileEntry, FolderMeta, KdfMeta,
    SegmentEntry, ShareMeta, AEAD_NAME, INDEX_VERSION, SIG_ALG_NAME,
};
pub use envelope::{open_envelope, read_access_header, seal_envelope, ENVELOPE_VERSION, INDEX_MAGIC};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;

use crate::access::{wrap_session_key, AccessSpec, Credentials, ShareHandle};
use crate::crypto::{self, FolderKeys};
use crate::error::{CoreError, RetryDecision, RetryPolicy};
use crate::obfuscate;
use crate::relay::Relay;
use crate::store::{FolderRow, ShareRow, Store};
use crate::store::unix_timestamp;

/// Assemble the index document for one share from the store.
///
/// Every original segment (replica 0) of every live file must have a
/// durably posted Message-ID; anything else is a publish-ordering bug and
/// surfaces as `Permanent`.
pub async fn build_document(
    store: &Store,
    folder: &FolderRow,
    share: &ShareRow,
    encryption: EncryptionMeta,
) -> Result<CoreIndex, CoreError> {
    let files = store
        .latest_files(&folder.folder_id)
        .await
        .map_err(CoreError::store)?;

    let mut entries = Vec::with_capacity(files.len());
    let mut total_size = 0u64;
    for file in &files {
        let segments = store
            .segments_for_file(file.file_id)
            .await
            .map_err(CoreError::store)?;
        let mut by_index: Vec<SegmentEntry> = Vec::new();
        for seg in &segments {
            if seg.replica_index == 0 {
                let message_id = match (&seg.message_id, seg.posted) {
                    (Some(id), true) => id.clone(),
                    _ => {
                        return Err(CoreError::Permanent(format!(
                            "segment {} of {} has no durably posted article",
                            seg.segment_index, file.relative_path
                        )))
                    }
                };
                by_index.push(SegmentEntry {
                    index: seg.segment_index as u32,
                    size: seg.size as u64,
                    plaintext_hash: seg.plaintext_hash.clone(),
                    message_id,
                    replica_message_ids: Vec::new(),
                });
            } else if let (Some(id), true) = (&seg.message_id, seg.posted) {
                // Replicas are best-effort, but positions must stay aligned
                // with replica indices (the AEAD binds them): stop the list
                // at the first gap.
                if let Some(entry) = by_index
                    .iter_mut()
                    .find(|e| e.index == seg.segment_index as u32)
                {
                    if seg.replica_index as usize == entry.replica_message_ids.len() + 1 {
                        entry.replica_message_ids.push(id.clone());
                    }
                }
            }
        }
        total_size += file.size as u64;
        entries.push(FileEntry {
            file_id: file.file_id,
            path: file.relative_path.clone(),
            size: file.size as u64,
            content_hash: file.content_hash.clone(),
            segments: by_index,
        });
    }

    Ok(CoreIndex {
        version: INDEX_VERSION,
        created_at: unix_timestamp(),
        share: ShareMeta {
            share_id: share.share_id.clone(),
            folder_id: folder.folder_id.clone(),
            access_class: share.access_class,
            expires_at: share.expires_at,
        },
        folder: FolderMeta {
            relative_root: folder.display_name.clone(),
            file_count: entries.len() as u64,
            total_size,
        },
        files: entries,
        encryption,
    })
}

/// Seal and post the index article, record the share's Message-ID and any
/// commitments, and return the handle recipients use.
///
/// Draws the fresh per-publish session key here so the key and the envelope
/// it protects never exist apart.
pub async fn publish_index(
    store: &Store,
    relay: &Arc<dyn Relay>,
    keys: &FolderKeys,
    folder: &FolderRow,
    share: &ShareRow,
    access: &AccessSpec,
    newsgroups: &[String],
) -> Result<ShareHandle, CoreError> {
    let session_key = crypto::random_key();
    let (password, recipients): (Option<&str>, &[String]) = match access {
        AccessSpec::Public => (None, &[]),
        AccessSpec::Protected { password } => (Some(password.as_str()), &[]),
        AccessSpec::Private { user_ids } => (None, user_ids.as_slice()),
    };
    let (mut encryption, commitments) = wrap_session_key(
        access.class(),
        &share.share_id,
        &session_key,
        keys.root(),
        password,
        recipients,
    )?;
    // Recipients decrypt segments with the folder segment key; it rides
    // inside the encrypted document only.
    encryption.segment_key = Some(BASE64.encode(keys.segment_key(&folder.folder_id)));

    let doc = build_document(store, folder, share, encryption).await?;
    let envelope = seal_envelope(&doc, &session_key, keys)?;

    let message_id = obfuscate::message_id();
    let headers = obfuscate::article_headers(message_id.clone(), obfuscate::wire_subject(), newsgroups);

    let policy = RetryPolicy::default();
    let mut attempt = 1u32;
    loop {
        match relay.post(&headers, &envelope).await {
            Ok(_) => break,
            Err(e) => {
                let err = CoreError::from(e);
                match policy.decide(attempt, &err) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::warn!(attempt, "index post failed, retrying: {err}");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::NoRetry => return Err(err),
                }
            }
        }
    }

    store
        .set_share_index_message_id(&share.share_id, &message_id)
        .await
        .map_err(CoreError::store)?;
    if !commitments.is_empty() {
        store
            .insert_commitments(&commitments)
            .await
            .map_err(CoreError::store)?;
    }
    if let Some(kdf) = &doc.encryption.kdf {
        let salt = BASE64
            .decode(&kdf.salt)
            .map_err(|_| CoreError::InvalidFormat("malformed kdf salt".into()))?;
        let params_json = serde_json::to_string(&kdf.params)
            .map_err(|e| CoreError::Permanent(format!("serializing kdf params: {e}")))?;
        store
            .set_share_kdf(&share.share_id, &salt, &params_json)
            .await
            .map_err(CoreError::store)?;
    }

    tracing::info!(share_id = %share.share_id, "published index");
    Ok(ShareHandle {
        share_id: share.share_id.clone(),
        index_message_id: message_id,
    })
}

/// Fetch and open the index named by a share handle.
pub async fn fetch_index(
    relay: &Arc<dyn Relay>,
    handle: &ShareHandle,
    credentials: &Credentials,
) -> Result<CoreIndex, CoreError> {
    let (_, body) = relay
        .fetch(&handle.index_message_id)
        .await
        .map_err(CoreError::from)?;
    let doc = open_envelope(&body, credentials)?;
    if doc.share.share_id != handle.share_id {
        return Err(CoreError::Integrity(
            "fetched index belongs to a different share".into(),
        ));
    }
    Ok(doc)
}

/// Decode the folder segment key carried inside an opened document.
pub fn segment_key_from_document(doc: &CoreIndex) -> Result<[u8; 32], CoreError> {
    let b64 = doc
        .encryption
        .segment_key
        .as_deref()
        .ok_or_else(|| CoreError::InvalidFormat("index missing segment key".into()))?;
    let raw = BASE64
        .decode(b64)
        .map_err(|_| CoreError::InvalidFormat("malformed segment key".into()))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| CoreError::InvalidFormat("segment key has wrong length".into()))
}
