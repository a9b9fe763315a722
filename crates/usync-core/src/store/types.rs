//! Row types and state enums for the persistent store.

use serde::{Deserialize, Serialize};

/// Folder lifecycle. Folders are never implicitly destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderState {
    Active,
    Archived,
}

impl FolderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderState::Active => "active",
            FolderState::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "archived" => FolderState::Archived,
            _ => FolderState::Active,
        }
    }
}

/// File state machine: forward-only.
/// `indexed → segmented → uploaded`; any version superseded by an edit
/// becomes `obsolete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Indexed,
    Segmented,
    Uploaded,
    Obsolete,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Indexed => "indexed",
            FileState::Segmented => "segmented",
            FileState::Uploaded => "uploaded",
            FileState::Obsolete => "obsolete",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "segmented" => FileState::Segmented,
            "uploaded" => FileState::Uploaded,
            "obsolete" => FileState::Obsolete,
            _ => FileState::Indexed,
        }
    }
}

/// Who can open a share's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessClass {
    Public,
    Protected,
    Private,
}

impl AccessClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessClass::Public => "public",
            AccessClass::Protected => "protected",
            AccessClass::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "protected" => AccessClass::Protected,
            "private" => AccessClass::Private,
            _ => AccessClass::Public,
        }
    }
}

/// Task state machine: `pending → in_progress → (completed | retrying | failed)`,
/// `retrying → pending`. Terminal: completed, failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "retrying" => TaskStatus::Retrying,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

/// Which queue a task belongs to; selects the backing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Upload,
    Download,
}

impl TaskKind {
    /// Backing table name. Static strings only; never interpolate user input.
    pub(crate) fn table(&self) -> &'static str {
        match self {
            TaskKind::Upload => "upload_tasks",
            TaskKind::Download => "download_tasks",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FolderRow {
    pub folder_id: String,
    pub display_name: String,
    pub local_path: String,
    pub state: FolderState,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub file_id: i64,
    pub folder_id: String,
    pub relative_path: String,
    pub size: i64,
    pub content_hash: String,
    pub version: i64,
    pub previous_version_id: Option<i64>,
    pub state: FileState,
    pub modified_at: i64,
}

#[derive(Debug, Clone)]
pub struct SegmentRow {
    pub segment_id: i64,
    pub file_id: i64,
    pub segment_index: i64,
    pub offset: i64,
    pub size: i64,
    pub plaintext_hash: String,
    pub replica_index: i64,
    pub compressed: bool,
    pub message_id: Option<String>,
    pub wire_subject: String,
    pub newsgroup: String,
    pub posted: bool,
}

/// Insert payload for one segment row (ids are precomputed, see [`segment_row_id`]).
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub segment_id: i64,
    pub file_id: i64,
    pub segment_index: i64,
    pub offset: i64,
    pub size: i64,
    pub plaintext_hash: String,
    pub replica_index: i64,
    pub compressed: bool,
    pub wire_subject: String,
    pub newsgroup: String,
}

#[derive(Debug, Clone)]
pub struct ShareRow {
    pub share_id: String,
    pub folder_id: String,
    pub version_snapshot: i64,
    pub access_class: AccessClass,
    pub index_message_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub password_salt: Option<Vec<u8>>,
    pub kdf_params: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommitmentRow {
    pub share_id: String,
    pub user_id_hash: String,
    pub verification_key: String,
    pub wrapped_session_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub task_id: String,
    pub folder_id: String,
    pub priority: i64,
    pub status: TaskStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub payload_json: String,
    pub progress_json: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-status counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Aggregates for `status` displays.
#[derive(Debug, Clone, Default)]
pub struct FolderStats {
    pub file_count: i64,
    pub total_size: i64,
    pub segment_count: i64,
    pub posted_segments: i64,
}

/// Change-stream event emitted on row transitions. Consumers (status
/// displays, GUIs) subscribe via [`super::Store::subscribe`]; lagging
/// receivers drop events, they never block writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    FileChanged {
        file_id: i64,
        state: FileState,
    },
    TaskChanged {
        kind: TaskKind,
        task_id: String,
        status: TaskStatus,
    },
}

/// Fresh opaque 16-byte folder id, hex-encoded.
pub fn new_folder_id() -> String {
    use rand::RngCore;
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Injective row id over `(file_id, segment_index, replica_index)`.
///
/// Replica 0 keeps the `(file_id << 20) | segment_index` encoding; replicas
/// shift into the high bits. segment_index must stay below 2^20 and
/// file_id below 2^24.
pub fn segment_row_id(file_id: i64, segment_index: i64, replica_index: i64) -> i64 {
    (replica_index << 44) | (file_id << 20) | segment_index
}
