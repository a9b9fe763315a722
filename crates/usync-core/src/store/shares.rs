//! Share rows and access commitments. Shares are immutable once published;
//! `index_message_id` is the only column that transitions (NULL → value).

use anyhow::Result;
use sqlx::Row;

use super::types::{AccessClass, CommitmentRow, ShareRow};
use super::Store;

fn row_to_share(row: &sqlx::sqlite::SqliteRow) -> ShareRow {
    ShareRow {
        share_id: row.get("share_id"),
        folder_id: row.get("folder_id"),
        version_snapshot: row.get("version_snapshot"),
        access_class: AccessClass::from_str(row.get::<String, _>("access_class").as_str()),
        index_message_id: row.get("index_message_id"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        password_salt: row.get("password_salt"),
        kdf_params: row.get("kdf_params"),
    }
}

const SHARE_COLUMNS: &str = "share_id, folder_id, version_snapshot, access_class, \
                             index_message_id, created_at, expires_at, password_salt, kdf_params";

impl Store {
    pub async fn insert_share(&self, share: &ShareRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shares (
                share_id, folder_id, version_snapshot, access_class,
                index_message_id, created_at, expires_at, password_salt, kdf_params
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&share.share_id)
        .bind(&share.folder_id)
        .bind(share.version_snapshot)
        .bind(share.access_class.as_str())
        .bind(&share.index_message_id)
        .bind(share.created_at)
        .bind(share.expires_at)
        .bind(&share.password_salt)
        .bind(&share.kdf_params)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set only after the index article is durably posted; this is the
    /// draft → published transition.
    pub async fn set_share_index_message_id(
        &self,
        share_id: &str,
        index_message_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE shares SET index_message_id = ?1 WHERE share_id = ?2 AND index_message_id IS NULL",
        )
        .bind(index_message_id)
        .bind(share_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the password salt and KDF parameters drawn for a protected
    /// share at publish time.
    pub async fn set_share_kdf(
        &self,
        share_id: &str,
        password_salt: &[u8],
        kdf_params_json: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE shares SET password_salt = ?1, kdf_params = ?2 WHERE share_id = ?3")
            .bind(password_salt)
            .bind(kdf_params_json)
            .bind(share_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_share(&self, share_id: &str) -> Result<Option<ShareRow>> {
        let row = sqlx::query(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE share_id = ?1"
        ))
        .bind(share_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_share))
    }

    /// Shares, newest first; optionally restricted to one folder.
    pub async fn list_shares(&self, folder_id: Option<&str>) -> Result<Vec<ShareRow>> {
        let rows = match folder_id {
            Some(folder_id) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {SHARE_COLUMNS} FROM shares
                    WHERE folder_id = ?1
                    ORDER BY created_at DESC, share_id DESC
                    "#
                ))
                .bind(folder_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SHARE_COLUMNS} FROM shares ORDER BY created_at DESC, share_id DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(row_to_share).collect())
    }

    pub async fn insert_commitments(&self, commitments: &[CommitmentRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for c in commitments {
            sqlx::query(
                r#"
                INSERT INTO access_commitments (
                    share_id, user_id_hash, verification_key, wrapped_session_key
                ) VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&c.share_id)
            .bind(&c.user_id_hash)
            .bind(&c.verification_key)
            .bind(&c.wrapped_session_key)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn commitments_for_share(&self, share_id: &str) -> Result<Vec<CommitmentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT share_id, user_id_hash, verification_key, wrapped_session_key
            FROM access_commitments WHERE share_id = ?1
            ORDER BY user_id_hash ASC
            "#,
        )
        .bind(share_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| CommitmentRow {
                share_id: row.get("share_id"),
                user_id_hash: row.get("user_id_hash"),
                verification_key: row.get("verification_key"),
                wrapped_session_key: row.get("wrapped_session_key"),
            })
            .collect())
    }
}
