//! Folder rows, folder keys at rest, and folder-level aggregates.

use anyhow::Result;
use sqlx::Row;

use super::types::{FolderRow, FolderState, FolderStats};
use super::{unix_timestamp, Store};

impl Store {
    /// Insert a new folder in `active` state.
    pub async fn add_folder(
        &self,
        folder_id: &str,
        display_name: &str,
        local_path: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folders (folder_id, display_name, local_path, state, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(folder_id)
        .bind(display_name)
        .bind(local_path)
        .bind(FolderState::Active.as_str())
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_folder(&self, folder_id: &str) -> Result<Option<FolderRow>> {
        let row = sqlx::query(
            r#"
            SELECT folder_id, display_name, local_path, state, created_at
            FROM folders WHERE folder_id = ?1
            "#,
        )
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FolderRow {
            folder_id: row.get("folder_id"),
            display_name: row.get("display_name"),
            local_path: row.get("local_path"),
            state: FolderState::from_str(row.get::<String, _>("state").as_str()),
            created_at: row.get("created_at"),
        }))
    }

    pub async fn list_folders(&self) -> Result<Vec<FolderRow>> {
        let rows = sqlx::query(
            r#"
            SELECT folder_id, display_name, local_path, state, created_at
            FROM folders ORDER BY created_at ASC, folder_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FolderRow {
                folder_id: row.get("folder_id"),
                display_name: row.get("display_name"),
                local_path: row.get("local_path"),
                state: FolderState::from_str(row.get::<String, _>("state").as_str()),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn set_folder_state(&self, folder_id: &str, state: FolderState) -> Result<()> {
        sqlx::query("UPDATE folders SET state = ?1 WHERE folder_id = ?2")
            .bind(state.as_str())
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store sealed folder keys. Replaces any previous row for the folder.
    pub async fn put_folder_keys(
        &self,
        folder_id: &str,
        encrypted_signing_key: &[u8],
        encrypted_root: &[u8],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folder_keys (folder_id, encrypted_signing_key, encrypted_root)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(folder_id) DO UPDATE SET
                encrypted_signing_key = excluded.encrypted_signing_key,
                encrypted_root = excluded.encrypted_root
            "#,
        )
        .bind(folder_id)
        .bind(encrypted_signing_key)
        .bind(encrypted_root)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch sealed folder keys as `(encrypted_signing_key, encrypted_root)`.
    pub async fn get_folder_keys(&self, folder_id: &str) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let row = sqlx::query(
            "SELECT encrypted_signing_key, encrypted_root FROM folder_keys WHERE folder_id = ?1",
        )
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.get("encrypted_signing_key"), r.get("encrypted_root"))))
    }

    /// Aggregates over the folder's live (non-obsolete) file versions.
    pub async fn folder_stats(&self, folder_id: &str) -> Result<FolderStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS file_count, COALESCE(SUM(size), 0) AS total_size
            FROM files WHERE folder_id = ?1 AND state != 'obsolete'
            "#,
        )
        .bind(folder_id)
        .fetch_one(&self.pool)
        .await?;
        let file_count: i64 = row.get("file_count");
        let total_size: i64 = row.get("total_size");

        let seg = sqlx::query(
            r#"
            SELECT COUNT(*) AS segment_count,
                   COALESCE(SUM(s.posted), 0) AS posted_segments
            FROM segments s
            JOIN files f ON f.file_id = s.file_id
            WHERE f.folder_id = ?1 AND f.state != 'obsolete'
            "#,
        )
        .bind(folder_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(FolderStats {
            file_count,
            total_size,
            segment_count: seg.get("segment_count"),
            posted_segments: seg.get("posted_segments"),
        })
    }
}
