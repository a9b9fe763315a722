//! Persistent store (SQLite via sqlx).
//!
//! Holds folders, file versions, segments, packs, shares, access
//! commitments, folder keys, and both task queues. All queue and progress
//! state lives here so uploads and downloads survive crashes; there are no
//! sidecar files.

mod files;
mod folders;
mod segments;
mod shares;
mod tasks;
pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Handle to the SQLite-backed store.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/usync/usync.db` on Debian.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) events: tokio::sync::broadcast::Sender<StoreEvent>,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

impl Store {
    /// Subscribe to file-state and task-state transitions.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No subscribers is the common case; send errors are uninteresting.
        let _ = self.events.send(event);
    }
}

impl Store {
    /// Open (or create) the default store and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("usync")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        Self::open_path(state_dir.join("usync.db")).await
    }

    /// Open (or create) a store at an explicit path.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        // WAL + busy timeout: several workers write short transactions
        // concurrently.
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        let (events, _) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Store { pool, events };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory store (tests, dry runs). Single connection so the
    /// pool cannot hand back a different empty database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let (events, _) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Store { pool, events };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // raw_sql: the schema is several statements in one batch.
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                folder_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                local_path TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS folder_keys (
                folder_id TEXT PRIMARY KEY REFERENCES folders(folder_id),
                encrypted_signing_key BLOB NOT NULL,
                encrypted_root BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                file_id INTEGER PRIMARY KEY AUTOINCREMENT,
                folder_id TEXT NOT NULL REFERENCES folders(folder_id),
                relative_path TEXT NOT NULL,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                version INTEGER NOT NULL,
                previous_version_id INTEGER,
                state TEXT NOT NULL,
                modified_at INTEGER NOT NULL,
                UNIQUE(folder_id, relative_path, version)
            );

            CREATE TABLE IF NOT EXISTS segments (
                segment_id INTEGER PRIMARY KEY,
                file_id INTEGER NOT NULL REFERENCES files(file_id),
                segment_index INTEGER NOT NULL,
                offset INTEGER NOT NULL,
                size INTEGER NOT NULL,
                plaintext_hash TEXT NOT NULL,
                replica_index INTEGER NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                message_id TEXT,
                wire_subject TEXT NOT NULL,
                newsgroup TEXT NOT NULL,
                posted INTEGER NOT NULL DEFAULT 0,
                UNIQUE(file_id, segment_index, replica_index)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS segments_message_id
                ON segments(message_id) WHERE message_id IS NOT NULL;

            CREATE TABLE IF NOT EXISTS packs (
                pack_id INTEGER PRIMARY KEY AUTOINCREMENT,
                checksum TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pack_members (
                pack_id INTEGER NOT NULL REFERENCES packs(pack_id),
                segment_id INTEGER NOT NULL REFERENCES segments(segment_id),
                position INTEGER NOT NULL,
                UNIQUE(pack_id, position)
            );

            CREATE TABLE IF NOT EXISTS shares (
                share_id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL REFERENCES folders(folder_id),
                version_snapshot INTEGER NOT NULL,
                access_class TEXT NOT NULL,
                index_message_id TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                password_salt BLOB,
                kdf_params TEXT
            );

            CREATE TABLE IF NOT EXISTS access_commitments (
                share_id TEXT NOT NULL REFERENCES shares(share_id),
                user_id_hash TEXT NOT NULL,
                verification_key TEXT NOT NULL,
                wrapped_session_key BLOB NOT NULL,
                UNIQUE(share_id, user_id_hash)
            );

            CREATE TABLE IF NOT EXISTS upload_tasks (
                task_id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                payload_json TEXT NOT NULL,
                progress_json TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS download_tasks (
                task_id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                payload_json TEXT NOT NULL,
                progress_json TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
