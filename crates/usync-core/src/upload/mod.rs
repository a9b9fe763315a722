//! Persistent upload queue and its worker pool.
//!
//! Tasks are one file each and live in the store; workers claim them
//! atomically, post the file's unposted segments, and checkpoint every
//! success in the same transaction as the segment update. Message-IDs are
//! drawn and persisted before the first post attempt, so a crash or retry
//! re-posts under the same id and the relay's idempotence turns duplicates
//! into successes.

mod worker;

pub use worker::{TaskOutcome, UploadWorkerContext};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::UsyncConfig;
use crate::control::TaskControl;
use crate::crypto::FolderKeys;
use crate::error::{CoreError, CoreResult};
use crate::progress::ProgressStats;
use crate::relay::Relay;
use crate::store::{FileState, Store, TaskKind};

/// Payload of one upload task: a single file of a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPayload {
    pub folder_id: String,
    pub file_id: i64,
}

/// Durable per-task progress: which segments are posted and how many bytes
/// went over the wire. Survives crashes alongside the segment rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadProgress {
    #[serde(default)]
    pub completed_segment_ids: Vec<i64>,
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

/// Outcome of draining the queue once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub segments_posted: usize,
    pub bytes_posted: u64,
    /// True when an abort request stopped the drain; remaining tasks are
    /// back in `pending`.
    pub aborted: bool,
}

pub struct UploadQueue {
    store: Store,
    relay: Arc<dyn Relay>,
    cfg: UsyncConfig,
}

/// Ceiling on tasks of one folder running at once, to keep a big folder
/// from monopolizing the pool.
const FOLDER_CEILING: i64 = 2;

/// How long admission waits for the queue to drain below its high-water
/// mark before giving up.
const ADMISSION_WAIT: Duration = Duration::from_secs(30);

impl UploadQueue {
    pub fn new(store: Store, relay: Arc<dyn Relay>, cfg: UsyncConfig) -> Self {
        Self { store, relay, cfg }
    }

    /// Reset tasks stranded by a crash. Call once at startup.
    pub async fn recover(&self) -> CoreResult<u64> {
        self.store
            .recover_stale_tasks(TaskKind::Upload)
            .await
            .map_err(CoreError::store)
    }

    fn high_water(&self) -> i64 {
        (self.cfg.queue_high_water * self.cfg.upload_workers) as i64
    }

    /// Admission control: block while the pending queue is over its
    /// high-water mark, then enqueue. Gives up with `QuotaExceeded` if the
    /// queue stays saturated.
    pub async fn enqueue_file(
        &self,
        folder_id: &str,
        file_id: i64,
        priority: i64,
    ) -> CoreResult<String> {
        let deadline = Instant::now() + ADMISSION_WAIT;
        loop {
            let pending = self
                .store
                .pending_task_count(TaskKind::Upload)
                .await
                .map_err(CoreError::store)?;
            if pending < self.high_water() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(CoreError::QuotaExceeded(format!(
                    "upload queue has {pending} pending tasks"
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let payload = serde_json::to_string(&UploadPayload {
            folder_id: folder_id.to_string(),
            file_id,
        })
        .expect("payload serializes");
        self.store
            .enqueue_task(
                TaskKind::Upload,
                folder_id,
                priority,
                self.cfg.max_retries as i64,
                &payload,
            )
            .await
            .map_err(CoreError::store)
    }

    /// Enqueue every `segmented` file of a folder. Returns task ids.
    pub async fn enqueue_folder(&self, folder_id: &str) -> CoreResult<Vec<String>> {
        let files = self
            .store
            .latest_files(folder_id)
            .await
            .map_err(CoreError::store)?;
        let mut task_ids = Vec::new();
        for file in files {
            if file.state == FileState::Segmented {
                task_ids.push(self.enqueue_file(folder_id, file.file_id, 0).await?);
            }
        }
        Ok(task_ids)
    }

    /// Claim-and-post until no runnable task remains.
    ///
    /// Worker count is bounded by config and by the relay's advertised
    /// connection limit. Tasks that fail retryably requeue themselves
    /// (deprioritized) and are picked up again within the same drain.
    pub async fn run_until_drained(
        &self,
        keys: &FolderKeys,
        control: Option<Arc<TaskControl>>,
        progress_tx: Option<tokio::sync::mpsc::Sender<ProgressStats>>,
    ) -> CoreResult<UploadReport> {
        let workers = self
            .cfg
            .upload_workers
            .min(self.relay.capabilities().max_connections)
            .max(1);
        let started = Instant::now();
        let mut report = UploadReport::default();
        let mut aborted = false;
        let mut join_set: JoinSet<CoreResult<TaskOutcome>> = JoinSet::new();

        loop {
            // Re-admit tasks parked in `retrying` (the retrying → pending
            // hop), then fill the pool. Once an abort is seen, stop both and
            // let the in-flight tasks drain; parked tasks wait for the next
            // run.
            if !aborted {
                self.store
                    .readmit_retrying_tasks(TaskKind::Upload)
                    .await
                    .map_err(CoreError::store)?;
            }
            while !aborted && join_set.len() < workers {
                let claimed = self
                    .store
                    .claim_next_task(TaskKind::Upload, FOLDER_CEILING)
                    .await
                    .map_err(CoreError::store)?;
                let Some(task) = claimed else { break };
                let ctx = UploadWorkerContext {
                    store: self.store.clone(),
                    relay: Arc::clone(&self.relay),
                    keys_root: *keys.root(),
                    control: control.clone(),
                };
                join_set.spawn(async move { worker::process_task(ctx, task).await });
            }

            let Some(joined) = join_set.join_next().await else {
                // Pool empty and nothing claimable: drained.
                break;
            };
            let outcome = joined
                .map_err(|e| CoreError::Permanent(format!("upload worker panicked: {e}")))??;
            match outcome {
                TaskOutcome::Completed {
                    segments_posted,
                    bytes_posted,
                } => {
                    report.tasks_completed += 1;
                    report.segments_posted += segments_posted;
                    report.bytes_posted += bytes_posted;
                }
                TaskOutcome::Requeued => {}
                TaskOutcome::Failed => report.tasks_failed += 1,
                TaskOutcome::Aborted => {
                    aborted = true;
                    report.aborted = true;
                }
            }

            if let Some(ref tx) = progress_tx {
                let counts = self
                    .store
                    .task_counts(TaskKind::Upload)
                    .await
                    .map_err(CoreError::store)?;
                let total =
                    counts.pending + counts.in_progress + counts.completed + counts.failed;
                let _ = tx.try_send(ProgressStats {
                    bytes_done: report.bytes_posted,
                    total_bytes: 0,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    segments_done: report.segments_posted,
                    segment_count: total as usize,
                });
            }
        }

        tracing::info!(
            completed = report.tasks_completed,
            failed = report.tasks_failed,
            segments = report.segments_posted,
            "upload queue drained"
        );
        Ok(report)
    }
}
