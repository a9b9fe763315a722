//! One upload task: post every unposted segment of one file.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::control::TaskControl;
use crate::crypto::{aead, keys::segment_key_from_root};
use crate::error::{CoreError, CoreResult};
use crate::obfuscate;
use crate::relay::{Relay, RelayError};
use crate::segment::{compress, encode_segment, read_segment};
use crate::store::{FileState, SegmentRow, Store, TaskKind, TaskRow};

use super::{UploadPayload, UploadProgress};

/// Per-post deadline; a stuck relay call counts as retryable.
const POST_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed {
        segments_posted: usize,
        bytes_posted: u64,
    },
    /// Retryable failure: the task is parked in `retrying`, deprioritized,
    /// until the queue re-admits it.
    Requeued,
    Failed,
    /// Cooperative abort: progress persisted, task parked in `retrying`.
    Aborted,
}

/// Everything a worker needs, cloneable into the task.
pub struct UploadWorkerContext {
    pub store: Store,
    pub relay: Arc<dyn Relay>,
    pub keys_root: [u8; 32],
    pub control: Option<Arc<TaskControl>>,
}

pub(super) async fn process_task(
    ctx: UploadWorkerContext,
    task: TaskRow,
) -> CoreResult<TaskOutcome> {
    let payload: UploadPayload = serde_json::from_str(&task.payload_json)
        .map_err(|e| CoreError::InvalidFormat(format!("upload payload: {e}")))?;
    let mut progress: UploadProgress =
        serde_json::from_str(&task.progress_json).unwrap_or_default();

    let folder = ctx
        .store
        .get_folder(&payload.folder_id)
        .await
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::NotFound(format!("folder {}", payload.folder_id)))?;
    let file = ctx
        .store
        .get_file(payload.file_id)
        .await
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::NotFound(format!("file {}", payload.file_id)))?;
    let local_path = PathBuf::from(&folder.local_path).join(&file.relative_path);
    let segment_key = segment_key_from_root(&ctx.keys_root, &payload.folder_id);

    let abort = ctx
        .control
        .as_ref()
        .map(|c| c.register(&task.task_id));
    let result = post_segments(
        &ctx,
        &task,
        &payload,
        &local_path,
        &segment_key,
        &mut progress,
        abort.as_deref(),
    )
    .await;
    if let Some(ref c) = ctx.control {
        c.unregister(&task.task_id);
    }

    match result {
        Ok(Posted::All {
            segments_posted,
            bytes_posted,
        }) => {
            ctx.store
                .set_file_state(file.file_id, FileState::Uploaded)
                .await
                .map_err(CoreError::store)?;
            ctx.store
                .complete_task(TaskKind::Upload, &task.task_id)
                .await
                .map_err(CoreError::store)?;
            tracing::debug!(task_id = %task.task_id, file = %file.relative_path, "upload task completed");
            Ok(TaskOutcome::Completed {
                segments_posted,
                bytes_posted,
            })
        }
        Ok(Posted::Aborted) => {
            // Cancellation marks the task `retrying`; re-admission (or the
            // next startup's recovery) returns it to the queue.
            ctx.store
                .suspend_task(TaskKind::Upload, &task.task_id)
                .await
                .map_err(CoreError::store)?;
            tracing::info!(task_id = %task.task_id, "upload task aborted, parked as retrying");
            Ok(TaskOutcome::Aborted)
        }
        Err(err) if err.is_retryable() => {
            if task.retry_count >= task.max_retries {
                ctx.store
                    .fail_task(TaskKind::Upload, &task.task_id)
                    .await
                    .map_err(CoreError::store)?;
                tracing::warn!(task_id = %task.task_id, "upload retries exhausted: {err}");
                Ok(TaskOutcome::Failed)
            } else {
                ctx.store
                    .mark_task_retrying(TaskKind::Upload, &task.task_id)
                    .await
                    .map_err(CoreError::store)?;
                tracing::debug!(task_id = %task.task_id, "upload task parked as retrying: {err}");
                Ok(TaskOutcome::Requeued)
            }
        }
        Err(err) => {
            ctx.store
                .fail_task(TaskKind::Upload, &task.task_id)
                .await
                .map_err(CoreError::store)?;
            tracing::warn!(task_id = %task.task_id, "upload task failed: {err}");
            Ok(TaskOutcome::Failed)
        }
    }
}

enum Posted {
    All {
        segments_posted: usize,
        bytes_posted: u64,
    },
    Aborted,
}

async fn post_segments(
    ctx: &UploadWorkerContext,
    task: &TaskRow,
    payload: &UploadPayload,
    local_path: &std::path::Path,
    segment_key: &[u8; 32],
    progress: &mut UploadProgress,
    abort: Option<&std::sync::atomic::AtomicBool>,
) -> CoreResult<Posted> {
    let segments = ctx
        .store
        .unposted_segments_for_file(payload.file_id)
        .await
        .map_err(CoreError::store)?;

    let mut segments_posted = 0usize;
    let mut bytes_posted = 0u64;
    for seg in segments {
        if abort.map(|a| a.load(Ordering::Relaxed)).unwrap_or(false) {
            return Ok(Posted::Aborted);
        }

        let message_id = post_one(ctx, payload, local_path, segment_key, &seg).await?;
        segments_posted += 1;
        bytes_posted += seg.size as u64;

        // Checkpoint in the same transaction as the segment update.
        progress.completed_segment_ids.push(seg.segment_id);
        progress.bytes_transferred += seg.size as u64;
        progress.last_message_id = Some(message_id);
        let progress_json = serde_json::to_string(progress).expect("progress serializes");
        ctx.store
            .checkpoint_segment_post(TaskKind::Upload, &task.task_id, seg.segment_id, &progress_json)
            .await
            .map_err(CoreError::store)?;
    }
    Ok(Posted::All {
        segments_posted,
        bytes_posted,
    })
}

/// Post a single segment and return the Message-ID it lives under.
async fn post_one(
    ctx: &UploadWorkerContext,
    payload: &UploadPayload,
    local_path: &std::path::Path,
    segment_key: &[u8; 32],
    seg: &SegmentRow,
) -> CoreResult<String> {
    // Message-ID is drawn once and persisted before the first attempt so
    // every retry re-posts under the same id.
    let message_id = match &seg.message_id {
        Some(id) => id.clone(),
        None => {
            let id = obfuscate::message_id();
            ctx.store
                .set_segment_message_id(seg.segment_id, &id)
                .await
                .map_err(CoreError::store)?;
            id
        }
    };

    let path = local_path.to_path_buf();
    let (offset, size) = (seg.offset as u64, seg.size as u64);
    let raw = tokio::task::spawn_blocking(move || read_segment(&path, offset, size))
        .await
        .map_err(|e| CoreError::Permanent(format!("read worker panicked: {e}")))?
        .map_err(|e| CoreError::Permanent(format!("{e:#}")))?;

    let body = if seg.compressed {
        compress(&raw).map_err(|e| CoreError::Permanent(format!("{e:#}")))?
    } else {
        raw
    };

    let mut hash = [0u8; 32];
    hex::decode_to_slice(&seg.plaintext_hash, &mut hash)
        .map_err(|_| CoreError::InvalidFormat("stored plaintext hash is not hex".into()))?;
    let wire = encode_segment(
        seg.compressed,
        seg.replica_index as u8,
        seg.segment_index as u32,
        seg.file_id as u32,
        &hash,
        &body,
    );
    let aad = format!(
        "{}:{}:{}:{}",
        payload.folder_id, seg.file_id, seg.segment_index, seg.replica_index
    );
    let cipher = aead::seal(segment_key, &wire, aad.as_bytes());

    let headers = obfuscate::article_headers(
        message_id.clone(),
        seg.wire_subject.clone(),
        std::slice::from_ref(&seg.newsgroup),
    );
    match tokio::time::timeout(POST_TIMEOUT, ctx.relay.post(&headers, &cipher)).await {
        Ok(Ok(_)) => Ok(message_id),
        Ok(Err(RelayError::NotFound)) => {
            Err(CoreError::Permanent("relay rejected post as not found".into()))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(CoreError::Retryable("post deadline exceeded".into())),
    }
}
