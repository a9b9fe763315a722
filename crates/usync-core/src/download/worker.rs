//! One download task: fetch and verify every segment of one file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::control::TaskControl;
use crate::crypto::aead;
use crate::error::{CoreError, CoreResult};
use crate::relay::{Relay, RelayError};
use crate::scanner::sha256_hex;
use crate::segment::{decode_segment, decompress};
use crate::store::{Store, TaskKind, TaskRow};

use super::{DownloadPayload, DownloadProgress};
use crate::index::{FileEntry, SegmentEntry};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-file fetch result; feeds reconstruction and the consume report.
#[derive(Debug, Clone)]
pub struct FileFetchResult {
    pub path: String,
    pub verified_segments: Vec<u32>,
    pub missing_segments: Vec<u32>,
    pub bytes_fetched: u64,
}

#[derive(Debug)]
pub(super) enum TaskFetchOutcome {
    Done(FileFetchResult),
    /// Transient trouble: task parked in `retrying` for another pass.
    Requeued,
    /// Cooperative abort: progress persisted, task parked in `retrying`.
    Aborted,
}

pub struct DownloadWorkerContext {
    pub store: Store,
    pub relay: Arc<dyn Relay>,
    pub files: Arc<HashMap<String, FileEntry>>,
    pub folder_id: String,
    pub segment_key: [u8; 32],
    pub staging_dir: PathBuf,
    pub control: Option<Arc<TaskControl>>,
}

/// Path of a verified blob in the staging directory.
pub fn staged_path(staging_dir: &Path, plaintext_hash: &str) -> PathBuf {
    staging_dir.join(format!("{plaintext_hash}.seg"))
}

pub(super) async fn process_task(
    ctx: DownloadWorkerContext,
    task: TaskRow,
) -> CoreResult<TaskFetchOutcome> {
    let payload: DownloadPayload = serde_json::from_str(&task.payload_json)
        .map_err(|e| CoreError::InvalidFormat(format!("download payload: {e}")))?;
    let file = ctx
        .files
        .get(&payload.path)
        .ok_or_else(|| CoreError::NotFound(format!("file {} in index", payload.path)))?
        .clone();
    let mut progress: DownloadProgress =
        serde_json::from_str(&task.progress_json).unwrap_or_default();

    let abort = ctx.control.as_ref().map(|c| c.register(&task.task_id));
    let result = fetch_segments(&ctx, &task, &file, &mut progress, abort.as_deref()).await;
    if let Some(ref c) = ctx.control {
        c.unregister(&task.task_id);
    }

    match result {
        Ok(Fetched::All { had_retryable }) => {
            // Segments that stayed missing after replica fallback: park the
            // task for another pass while attempts remain if the cause
            // looked transient.
            if !progress.missing_segments.is_empty()
                && had_retryable
                && task.retry_count < task.max_retries
            {
                ctx.store
                    .mark_task_retrying(TaskKind::Download, &task.task_id)
                    .await
                    .map_err(CoreError::store)?;
                return Ok(TaskFetchOutcome::Requeued);
            }
            ctx.store
                .complete_task(TaskKind::Download, &task.task_id)
                .await
                .map_err(CoreError::store)?;
            Ok(TaskFetchOutcome::Done(FileFetchResult {
                path: file.path.clone(),
                verified_segments: progress.verified_segments.clone(),
                missing_segments: progress.missing_segments.clone(),
                bytes_fetched: progress.bytes_fetched,
            }))
        }
        Ok(Fetched::Aborted) => {
            // Cancellation marks the task `retrying`; re-admission (or the
            // next startup's recovery) returns it to the queue.
            ctx.store
                .suspend_task(TaskKind::Download, &task.task_id)
                .await
                .map_err(CoreError::store)?;
            Ok(TaskFetchOutcome::Aborted)
        }
        Err(err) => {
            ctx.store
                .fail_task(TaskKind::Download, &task.task_id)
                .await
                .map_err(CoreError::store)?;
            Err(err)
        }
    }
}

enum Fetched {
    All { had_retryable: bool },
    Aborted,
}

/// Fetch order: segment 0 first (progressive preview), then ascending.
fn fetch_order(file: &FileEntry) -> Vec<&SegmentEntry> {
    let mut ordered: Vec<&SegmentEntry> = file.segments.iter().collect();
    ordered.sort_by_key(|s| s.index);
    ordered
}

async fn fetch_segments(
    ctx: &DownloadWorkerContext,
    task: &TaskRow,
    file: &FileEntry,
    progress: &mut DownloadProgress,
    abort: Option<&std::sync::atomic::AtomicBool>,
) -> CoreResult<Fetched> {
    let mut had_retryable = false;
    progress.missing_segments.clear();

    for entry in fetch_order(file) {
        if abort.map(|a| a.load(Ordering::Relaxed)).unwrap_or(false) {
            return Ok(Fetched::Aborted);
        }

        let staged = staged_path(&ctx.staging_dir, &entry.plaintext_hash);
        if tokio::fs::try_exists(&staged)
            .await
            .map_err(|e| CoreError::Permanent(format!("staging dir: {e}")))?
        {
            // Verified on a previous pass (or an identical segment of
            // another file); nothing to fetch.
            if !progress.verified_segments.contains(&entry.index) {
                progress.verified_segments.push(entry.index);
            }
            continue;
        }

        match fetch_one(ctx, file, entry).await {
            Ok(plaintext) => {
                write_staged(&staged, &plaintext).await?;
                progress.verified_segments.push(entry.index);
                progress.bytes_fetched += plaintext.len() as u64;
                progress.last_message_id = Some(entry.message_id.clone());
                let progress_json = serde_json::to_string(progress).expect("progress serializes");
                ctx.store
                    .set_task_progress(TaskKind::Download, &task.task_id, &progress_json)
                    .await
                    .map_err(CoreError::store)?;
            }
            Err(SegmentFetchError { retryable }) => {
                if retryable {
                    had_retryable = true;
                }
                progress.missing_segments.push(entry.index);
                tracing::warn!(
                    path = %file.path,
                    segment = entry.index,
                    "segment unavailable after replica fallback"
                );
            }
        }
    }
    Ok(Fetched::All { had_retryable })
}

/// All replicas exhausted for one segment.
struct SegmentFetchError {
    retryable: bool,
}

/// Try the original, then each replica, until one article decrypts,
/// decodes, and hashes correctly.
async fn fetch_one(
    ctx: &DownloadWorkerContext,
    file: &FileEntry,
    entry: &SegmentEntry,
) -> Result<Vec<u8>, SegmentFetchError> {
    let mut had_retryable = false;
    let candidates = std::iter::once(&entry.message_id).chain(entry.replica_message_ids.iter());

    for (replica_index, message_id) in candidates.enumerate() {
        let body = match tokio::time::timeout(FETCH_TIMEOUT, ctx.relay.fetch(message_id)).await {
            Ok(Ok((_, body))) => body,
            Ok(Err(RelayError::NotFound)) => continue,
            Ok(Err(RelayError::Permanent(_))) => continue,
            Ok(Err(RelayError::Retryable(_))) | Err(_) => {
                had_retryable = true;
                continue;
            }
        };
        match verify_segment(ctx, file, entry, replica_index as i64, &body) {
            Ok(plaintext) => return Ok(plaintext),
            Err(e) => {
                tracing::debug!(
                    segment = entry.index,
                    replica = replica_index,
                    "replica discarded: {e}"
                );
                continue;
            }
        }
    }
    Err(SegmentFetchError {
        retryable: had_retryable,
    })
}

/// AEAD-open, decode, decompress, and hash-check one article body.
fn verify_segment(
    ctx: &DownloadWorkerContext,
    file: &FileEntry,
    entry: &SegmentEntry,
    replica_index: i64,
    body: &[u8],
) -> CoreResult<Vec<u8>> {
    let aad = format!(
        "{}:{}:{}:{}",
        ctx.folder_id, file.file_id, entry.index, replica_index
    );
    let wire = aead::open(&ctx.segment_key, body, aad.as_bytes())?;
    let decoded = decode_segment(&wire)?;
    if decoded.segment_index != entry.index || decoded.file_id != file.file_id as u32 {
        return Err(CoreError::Integrity(
            "segment header does not match index entry".into(),
        ));
    }
    let plaintext = if decoded.compressed {
        decompress(&decoded.payload).map_err(|e| CoreError::Integrity(format!("{e:#}")))?
    } else {
        decoded.payload
    };
    let hash = sha256_hex(&plaintext);
    if hash != entry.plaintext_hash || hash != hex::encode(decoded.plaintext_hash) {
        return Err(CoreError::Integrity("segment hash mismatch".into()));
    }
    Ok(plaintext)
}

/// Atomic write into the staging directory.
async fn write_staged(path: &Path, plaintext: &[u8]) -> CoreResult<()> {
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, plaintext)
        .await
        .map_err(|e| CoreError::Permanent(format!("staging write: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CoreError::Permanent(format!("staging rename: {e}")))?;
    Ok(())
}
