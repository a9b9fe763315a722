//! File version rows. Versions are append-only: an edit inserts a new row
//! with `version + 1` and flips the previous row to `obsolete`.

use anyhow::Result;
use sqlx::Row;

use super::types::{FileRow, FileState};
use super::{unix_timestamp, Store};

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> FileRow {
    FileRow {
        file_id: row.get("file_id"),
        folder_id: row.get("folder_id"),
        relative_path: row.get("relative_path"),
        size: row.get("size"),
        content_hash: row.get("content_hash"),
        version: row.get("version"),
        previous_version_id: row.get("previous_version_id"),
        state: FileState::from_str(row.get::<String, _>("state").as_str()),
        modified_at: row.get("modified_at"),
    }
}

const FILE_COLUMNS: &str = "file_id, folder_id, relative_path, size, content_hash, version, \
                            previous_version_id, state, modified_at";

impl Store {
    /// Append a new version row for `relative_path`.
    ///
    /// Version 1 if the path is new; otherwise the previous live version is
    /// marked `obsolete` and the new row carries `previous_version_id`.
    /// One transaction so a crash cannot leave two live versions.
    pub async fn insert_file_version(
        &self,
        folder_id: &str,
        relative_path: &str,
        size: i64,
        content_hash: &str,
        modified_at: i64,
    ) -> Result<FileRow> {
        let mut tx = self.pool.begin().await?;

        let prev = sqlx::query(
            r#"
            SELECT file_id, version FROM files
            WHERE folder_id = ?1 AND relative_path = ?2
            ORDER BY version DESC LIMIT 1
            "#,
        )
        .bind(folder_id)
        .bind(relative_path)
        .fetch_optional(&mut *tx)
        .await?;

        let (previous_version_id, version) = match prev {
            Some(row) => {
                let prev_id: i64 = row.get("file_id");
                let prev_version: i64 = row.get("version");
                sqlx::query("UPDATE files SET state = 'obsolete' WHERE file_id = ?1")
                    .bind(prev_id)
                    .execute(&mut *tx)
                    .await?;
                (Some(prev_id), prev_version + 1)
            }
            None => (None, 1),
        };

        let file_id = sqlx::query(
            r#"
            INSERT INTO files (
                folder_id, relative_path, size, content_hash, version,
                previous_version_id, state, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(folder_id)
        .bind(relative_path)
        .bind(size)
        .bind(content_hash)
        .bind(version)
        .bind(previous_version_id)
        .bind(FileState::Indexed.as_str())
        .bind(modified_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        self.emit(super::StoreEvent::FileChanged {
            file_id,
            state: FileState::Indexed,
        });

        Ok(FileRow {
            file_id,
            folder_id: folder_id.to_string(),
            relative_path: relative_path.to_string(),
            size,
            content_hash: content_hash.to_string(),
            version,
            previous_version_id,
            state: FileState::Indexed,
            modified_at,
        })
    }

    pub async fn get_file(&self, file_id: i64) -> Result<Option<FileRow>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE file_id = ?1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_file))
    }

    /// Live (non-obsolete) file versions of a folder, path order.
    pub async fn latest_files(&self, folder_id: &str) -> Result<Vec<FileRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files
            WHERE folder_id = ?1 AND state != 'obsolete'
            ORDER BY relative_path ASC
            "#
        ))
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }

    /// Latest version row (live or obsolete) for one path.
    pub async fn latest_file_by_path(
        &self,
        folder_id: &str,
        relative_path: &str,
    ) -> Result<Option<FileRow>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files
            WHERE folder_id = ?1 AND relative_path = ?2
            ORDER BY version DESC LIMIT 1
            "#
        ))
        .bind(folder_id)
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_file))
    }

    /// Advance a file's forward-only state machine.
    pub async fn set_file_state(&self, file_id: i64, state: FileState) -> Result<()> {
        sqlx::query("UPDATE files SET state = ?1, modified_at = ?2 WHERE file_id = ?3")
            .bind(state.as_str())
            .bind(unix_timestamp())
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        self.emit(super::StoreEvent::FileChanged { file_id, state });
        Ok(())
    }

    /// Mark a deleted path's live version obsolete. Returns true if a row changed.
    pub async fn mark_path_obsolete(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE files SET state = 'obsolete'
            WHERE folder_id = ?1 AND relative_path = ?2 AND state != 'obsolete'
            "#,
        )
        .bind(folder_id)
        .bind(relative_path)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Highest live version in a folder; the value frozen into a share.
    pub async fn version_snapshot(&self, folder_id: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(version), 0) AS v FROM files
            WHERE folder_id = ?1 AND state != 'obsolete'
            "#,
        )
        .bind(folder_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("v"))
    }
}
