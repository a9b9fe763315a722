//! High-level publish/consume orchestration.
//!
//! `publish_folder` chains scan → version → segment → upload queue → index
//! publish and hands back the share handle. `consume_share` reverses it:
//! handle → index fetch → download queue → reconstruction. The acting user
//! is an explicit parameter on every call; the core holds no identity
//! state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::access::{AccessSpec, Credentials, ShareHandle};
use crate::config::UsyncConfig;
use crate::control::TaskControl;
use crate::crypto::{Actor, FolderKeys};
use crate::download::DownloadQueue;
use crate::error::{CoreError, CoreResult};
use crate::index;
use crate::obfuscate;
use crate::progress::ProgressStats;
use crate::reconstruct::{reconstruct_file, FileOutcome, FileStatus};
use crate::relay::Relay;
use crate::scanner::{self, SkipPatterns};
use crate::segment::build_segment_rows;
use crate::store::{new_folder_id, FileState, ShareRow, Store};
use crate::store::unix_timestamp;
use crate::upload::{UploadQueue, UploadReport};

/// Options for one publish.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub access: AccessSpec,
    /// Overrides the configured newsgroups when set.
    pub newsgroups: Option<Vec<String>>,
    pub expires_at: Option<i64>,
}

impl PublishOptions {
    pub fn public() -> Self {
        Self {
            access: AccessSpec::Public,
            newsgroups: None,
            expires_at: None,
        }
    }
}

/// What a successful publish returns.
#[derive(Debug)]
pub struct PublishOutcome {
    pub handle: ShareHandle,
    pub report: UploadReport,
    pub file_count: usize,
}

/// Structured result of one consume. Missing segments surface here as
/// per-file `Incomplete` statuses, never as errors.
#[derive(Debug)]
pub struct ConsumeReport {
    pub files: Vec<FileOutcome>,
}

impl ConsumeReport {
    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Complete)
    }
}

/// Register a local folder and generate its keys.
pub async fn add_folder(
    store: &Store,
    actor: &Actor,
    local_path: &Path,
    display_name: &str,
) -> CoreResult<String> {
    let folder_id = new_folder_id();
    store
        .add_folder(&folder_id, display_name, &local_path.to_string_lossy())
        .await
        .map_err(CoreError::store)?;
    let keys = FolderKeys::generate();
    let (enc_signing, enc_root) = keys.seal(actor, &folder_id);
    store
        .put_folder_keys(&folder_id, &enc_signing, &enc_root)
        .await
        .map_err(CoreError::store)?;
    tracing::info!(%folder_id, display_name, "added folder");
    Ok(folder_id)
}

/// Load and unseal a folder's keys for the acting user.
async fn load_keys(store: &Store, actor: &Actor, folder_id: &str) -> CoreResult<FolderKeys> {
    let (enc_signing, enc_root) = store
        .get_folder_keys(folder_id)
        .await
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::NotFound(format!("keys for folder {folder_id}")))?;
    // A different actor's seal fails the AEAD open; that is denial, not
    // corruption.
    FolderKeys::unseal(actor, folder_id, &enc_signing, &enc_root)
        .map_err(|_| CoreError::AccessDenied)
}

/// Scan, segment, upload, and publish one folder; returns the handle to
/// give recipients.
#[allow(clippy::too_many_arguments)]
pub async fn publish_folder(
    store: &Store,
    relay: &Arc<dyn Relay>,
    actor: &Actor,
    folder_id: &str,
    options: PublishOptions,
    cfg: &UsyncConfig,
    control: Option<Arc<TaskControl>>,
    progress_tx: Option<tokio::sync::mpsc::Sender<ProgressStats>>,
) -> CoreResult<PublishOutcome> {
    let folder = store
        .get_folder(folder_id)
        .await
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::NotFound(format!("folder {folder_id}")))?;
    let keys = load_keys(store, actor, folder_id).await?;
    let newsgroups = options
        .newsgroups
        .clone()
        .unwrap_or_else(|| cfg.newsgroups.clone());
    let newsgroup = newsgroups
        .first()
        .cloned()
        .ok_or_else(|| CoreError::InvalidFormat("no newsgroups configured".into()))?;

    // 1. Scan and version.
    let skip = SkipPatterns::new(cfg.skip_patterns.iter().cloned());
    let previous = scanner::previous_snapshot(store, folder_id)
        .await
        .map_err(CoreError::store)?;
    let local_root = PathBuf::from(&folder.local_path);
    let diff = scanner::scan_folder(&local_root, &previous, cfg.scanner_workers, &skip)
        .await
        .map_err(|e| CoreError::Permanent(format!("{e:#}")))?;
    scanner::persist_diff(store, folder_id, &diff)
        .await
        .map_err(CoreError::store)?;

    // 2. Segment every file still waiting on it (fresh versions from this
    // scan plus any stranded `indexed` rows from an interrupted run).
    let to_segment: Vec<_> = store
        .latest_files(folder_id)
        .await
        .map_err(CoreError::store)?
        .into_iter()
        .filter(|f| f.state == FileState::Indexed)
        .collect();
    for file in &to_segment {
        if !store
            .segments_for_file(file.file_id)
            .await
            .map_err(CoreError::store)?
            .is_empty()
        {
            // Interrupted after the insert; just advance the state.
            store
                .set_file_state(file.file_id, FileState::Segmented)
                .await
                .map_err(CoreError::store)?;
            continue;
        }
        let path = local_root.join(&file.relative_path);
        let (file_id, segment_size, threshold, redundancy) = (
            file.file_id,
            cfg.segment_size,
            cfg.compression_threshold,
            cfg.redundancy_level,
        );
        let group = newsgroup.clone();
        let rows = tokio::task::spawn_blocking(move || {
            build_segment_rows(&path, file_id, segment_size, threshold, redundancy, &group)
        })
        .await
        .map_err(|e| CoreError::Permanent(format!("segment worker panicked: {e}")))?
        .map_err(|e| CoreError::Permanent(format!("{e:#}")))?;
        store
            .insert_segments(&rows)
            .await
            .map_err(CoreError::store)?;
        store
            .set_file_state(file.file_id, FileState::Segmented)
            .await
            .map_err(CoreError::store)?;
    }

    // 3. Drive the upload queue until every segment is durably posted.
    let queue = UploadQueue::new(store.clone(), Arc::clone(relay), cfg.clone());
    queue.recover().await?;
    queue.enqueue_folder(folder_id).await?;
    let report = queue
        .run_until_drained(&keys, control, progress_tx)
        .await?;
    if report.aborted {
        return Err(CoreError::Cancelled);
    }
    if report.tasks_failed > 0 {
        return Err(CoreError::Permanent(format!(
            "{} upload task(s) failed; share not published",
            report.tasks_failed
        )));
    }

    // 4. Index publication is ordered after every segment post.
    let files = store
        .latest_files(folder_id)
        .await
        .map_err(CoreError::store)?;
    let version_snapshot = store
        .version_snapshot(folder_id)
        .await
        .map_err(CoreError::store)?;
    let share = ShareRow {
        share_id: obfuscate::share_id(),
        folder_id: folder_id.to_string(),
        version_snapshot,
        access_class: options.access.class(),
        index_message_id: None,
        created_at: unix_timestamp(),
        expires_at: options.expires_at,
        password_salt: None,
        kdf_params: None,
    };
    store.insert_share(&share).await.map_err(CoreError::store)?;
    let handle = index::publish_index(
        store,
        relay,
        &keys,
        &folder,
        &share,
        &options.access,
        &newsgroups,
    )
    .await?;

    Ok(PublishOutcome {
        handle,
        report,
        file_count: files.len(),
    })
}

/// Fetch a share by handle, download its segments, and reconstruct the
/// folder under `destination`.
#[allow(clippy::too_many_arguments)]
pub async fn consume_share(
    store: &Store,
    relay: &Arc<dyn Relay>,
    handle: &ShareHandle,
    credentials: &Credentials,
    destination: &Path,
    selection: Option<&[String]>,
    cfg: &UsyncConfig,
    control: Option<Arc<TaskControl>>,
    progress_tx: Option<tokio::sync::mpsc::Sender<ProgressStats>>,
) -> CoreResult<ConsumeReport> {
    let doc = index::fetch_index(relay, handle, credentials).await?;
    let segment_key = index::segment_key_from_document(&doc)?;

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| CoreError::Permanent(format!("creating destination: {e}")))?;
    let staging_dir = destination.join(".usync-staging");

    let queue = DownloadQueue::new(store.clone(), Arc::clone(relay), cfg.clone());
    queue.recover().await?;
    queue.enqueue_share(&doc, selection).await?;
    let fetch_report = queue
        .run_until_drained(&doc, segment_key, &staging_dir, control, progress_tx)
        .await?;
    if fetch_report.aborted {
        return Err(CoreError::Cancelled);
    }

    // Reconstruction: out-of-order staging, ordered assembly, atomic writes.
    let mut files = Vec::with_capacity(fetch_report.files.len());
    for fetch in &fetch_report.files {
        let Some(entry) = doc.files.iter().find(|f| f.path == fetch.path) else {
            continue;
        };
        let entry = entry.clone();
        let fetch = fetch.clone();
        let staging = staging_dir.clone();
        let dest = destination.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || {
            reconstruct_file(&entry, &fetch, &staging, &dest)
        })
        .await
        .map_err(|e| CoreError::Permanent(format!("reconstruct worker panicked: {e}")))??;
        files.push(outcome);
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let report = ConsumeReport { files };
    if report.is_complete() {
        // Staged blobs only matter for resume; a clean finish clears them.
        let _ = tokio::fs::remove_dir_all(&staging_dir).await;
    }
    Ok(report)
}
