//! Persistent download queue and its worker pool.
//!
//! Consuming a share turns each selected file of the decrypted index into
//! one task. Workers fetch that file's segments (first segment first, then
//! interior ascending, so a progressive preview is possible), falling back
//! through replicas on loss or corruption, and stage every verified blob
//! under the staging directory keyed by plaintext hash. Staged blobs make
//! resume cheap: a re-run skips whatever already verified, even across
//! process restarts.

mod worker;

pub use worker::{staged_path, DownloadWorkerContext, FileFetchResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::config::UsyncConfig;
use crate::control::TaskControl;
use crate::error::{CoreError, CoreResult};
use crate::index::{CoreIndex, FileEntry};
use crate::progress::ProgressStats;
use crate::relay::Relay;
use crate::store::{Store, TaskKind};

/// Payload of one download task: one file of one share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub share_id: String,
    pub path: String,
}

/// Durable per-task progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    #[serde(default)]
    pub verified_segments: Vec<u32>,
    #[serde(default)]
    pub missing_segments: Vec<u32>,
    #[serde(default)]
    pub bytes_fetched: u64,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

/// Result of draining the queue for one share.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub files: Vec<FileFetchResult>,
    /// True when an abort request stopped the drain; remaining tasks are
    /// back in `pending` and staged blobs survive for the next run.
    pub aborted: bool,
}

pub struct DownloadQueue {
    store: Store,
    relay: Arc<dyn Relay>,
    cfg: UsyncConfig,
}

const FOLDER_CEILING: i64 = 4;

impl DownloadQueue {
    pub fn new(store: Store, relay: Arc<dyn Relay>, cfg: UsyncConfig) -> Self {
        Self { store, relay, cfg }
    }

    /// Reset tasks stranded by a crash. Call once at startup.
    pub async fn recover(&self) -> CoreResult<u64> {
        self.store
            .recover_stale_tasks(TaskKind::Download)
            .await
            .map_err(CoreError::store)
    }

    /// Enqueue one task per selected file. `selection` of None means every
    /// file in the index.
    pub async fn enqueue_share(
        &self,
        doc: &CoreIndex,
        selection: Option<&[String]>,
    ) -> CoreResult<Vec<String>> {
        let mut task_ids = Vec::new();
        for file in &doc.files {
            if let Some(paths) = selection {
                if !paths.iter().any(|p| p == &file.path) {
                    continue;
                }
            }
            let payload = serde_json::to_string(&DownloadPayload {
                share_id: doc.share.share_id.clone(),
                path: file.path.clone(),
            })
            .expect("payload serializes");
            let task_id = self
                .store
                .enqueue_task(
                    TaskKind::Download,
                    &doc.share.folder_id,
                    0,
                    self.cfg.max_retries as i64,
                    &payload,
                )
                .await
                .map_err(CoreError::store)?;
            task_ids.push(task_id);
        }
        Ok(task_ids)
    }

    /// Claim-and-fetch until no runnable task remains.
    pub async fn run_until_drained(
        &self,
        doc: &CoreIndex,
        segment_key: [u8; 32],
        staging_dir: &Path,
        control: Option<Arc<TaskControl>>,
        progress_tx: Option<tokio::sync::mpsc::Sender<ProgressStats>>,
    ) -> CoreResult<DownloadReport> {
        std::fs::create_dir_all(staging_dir)
            .map_err(|e| CoreError::Permanent(format!("creating staging dir: {e}")))?;

        let workers = self
            .cfg
            .download_workers
            .min(self.relay.capabilities().max_connections)
            .max(1);
        let files: Arc<HashMap<String, FileEntry>> = Arc::new(
            doc.files
                .iter()
                .map(|f| (f.path.clone(), f.clone()))
                .collect(),
        );
        let total_bytes: u64 = doc.files.iter().map(|f| f.size).sum();
        let segment_count: usize = doc.files.iter().map(|f| f.segments.len()).sum();
        let started = Instant::now();

        let mut report = DownloadReport::default();
        let mut bytes_done = 0u64;
        let mut segments_done = 0usize;
        let mut aborted = false;
        let mut join_set: JoinSet<CoreResult<worker::TaskFetchOutcome>> = JoinSet::new();

        loop {
            // Re-admit tasks parked in `retrying` (the retrying → pending
            // hop), then fill the pool. Once an abort is seen, stop both and
            // let in-flight tasks drain; parked tasks wait for the next run.
            if !aborted {
                self.store
                    .readmit_retrying_tasks(TaskKind::Download)
                    .await
                    .map_err(CoreError::store)?;
            }
            while !aborted && join_set.len() < workers {
                let claimed = self
                    .store
                    .claim_next_task(TaskKind::Download, FOLDER_CEILING)
                    .await
                    .map_err(CoreError::store)?;
                let Some(task) = claimed else { break };
                let ctx = DownloadWorkerContext {
                    store: self.store.clone(),
                    relay: Arc::clone(&self.relay),
                    files: Arc::clone(&files),
                    folder_id: doc.share.folder_id.clone(),
                    segment_key,
                    staging_dir: PathBuf::from(staging_dir),
                    control: control.clone(),
                };
                join_set.spawn(async move { worker::process_task(ctx, task).await });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let outcome = joined
                .map_err(|e| CoreError::Permanent(format!("download worker panicked: {e}")))??;
            match outcome {
                worker::TaskFetchOutcome::Done(result) => {
                    bytes_done += result.bytes_fetched;
                    segments_done += result.verified_segments.len();
                    report.files.push(result);
                    if let Some(ref tx) = progress_tx {
                        let _ = tx.try_send(ProgressStats {
                            bytes_done,
                            total_bytes,
                            elapsed_secs: started.elapsed().as_secs_f64(),
                            segments_done,
                            segment_count,
                        });
                    }
                }
                worker::TaskFetchOutcome::Requeued => {}
                worker::TaskFetchOutcome::Aborted => {
                    aborted = true;
                    report.aborted = true;
                }
            }
        }

        tracing::info!(
            files = report.files.len(),
            bytes = bytes_done,
            "download queue drained"
        );
        Ok(report)
    }
}
