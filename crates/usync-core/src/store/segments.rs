//! Segment rows and pack membership.

use anyhow::Result;
use sqlx::Row;

use super::types::{NewSegment, SegmentRow};
use super::Store;

fn row_to_segment(row: &sqlx::sqlite::SqliteRow) -> SegmentRow {
    SegmentRow {
        segment_id: row.get("segment_id"),
        file_id: row.get("file_id"),
        segment_index: row.get("segment_index"),
        offset: row.get("offset"),
        size: row.get("size"),
        plaintext_hash: row.get("plaintext_hash"),
        replica_index: row.get("replica_index"),
        compressed: row.get::<i64, _>("compressed") != 0,
        message_id: row.get("message_id"),
        wire_subject: row.get("wire_subject"),
        newsgroup: row.get("newsgroup"),
        posted: row.get::<i64, _>("posted") != 0,
    }
}

const SEGMENT_COLUMNS: &str = "segment_id, file_id, segment_index, offset, size, plaintext_hash, \
                               replica_index, compressed, message_id, wire_subject, newsgroup, posted";

impl Store {
    /// Insert a batch of segment rows in one transaction.
    pub async fn insert_segments(&self, segments: &[NewSegment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for seg in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (
                    segment_id, file_id, segment_index, offset, size,
                    plaintext_hash, replica_index, compressed, wire_subject, newsgroup
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(seg.segment_id)
            .bind(seg.file_id)
            .bind(seg.segment_index)
            .bind(seg.offset)
            .bind(seg.size)
            .bind(&seg.plaintext_hash)
            .bind(seg.replica_index)
            .bind(seg.compressed as i64)
            .bind(&seg.wire_subject)
            .bind(&seg.newsgroup)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All replicas of all segments of one file, `(segment_index, replica_index)` order.
    pub async fn segments_for_file(&self, file_id: i64) -> Result<Vec<SegmentRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SEGMENT_COLUMNS} FROM segments
            WHERE file_id = ?1
            ORDER BY segment_index ASC, replica_index ASC
            "#
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_segment).collect())
    }

    pub async fn get_segment(&self, segment_id: i64) -> Result<Option<SegmentRow>> {
        let row = sqlx::query(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments WHERE segment_id = ?1"
        ))
        .bind(segment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_segment))
    }

    /// Record the client-generated Message-ID before the first post attempt,
    /// so a retry reuses it and the relay's idempotence applies.
    pub async fn set_segment_message_id(&self, segment_id: i64, message_id: &str) -> Result<()> {
        sqlx::query("UPDATE segments SET message_id = ?1 WHERE segment_id = ?2")
            .bind(message_id)
            .bind(segment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Confirm a durable post. Part of the same transaction as the task
    /// checkpoint (see the upload queue).
    pub async fn mark_segment_posted(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        segment_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE segments SET posted = 1 WHERE segment_id = ?1")
            .bind(segment_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Segments of one file still awaiting a confirmed post.
    pub async fn unposted_segments_for_file(&self, file_id: i64) -> Result<Vec<SegmentRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SEGMENT_COLUMNS} FROM segments
            WHERE file_id = ?1 AND posted = 0
            ORDER BY segment_index ASC, replica_index ASC
            "#
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_segment).collect())
    }

    /// Count of originals (replica 0) missing a confirmed post for a file.
    pub async fn unposted_original_count(&self, file_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM segments
            WHERE file_id = ?1 AND replica_index = 0 AND posted = 0
            "#,
        )
        .bind(file_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Record a pack container and its member segments.
    pub async fn insert_pack(&self, checksum: &str, member_segment_ids: &[i64]) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let pack_id = sqlx::query("INSERT INTO packs (checksum) VALUES (?1)")
            .bind(checksum)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        for (position, segment_id) in member_segment_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO pack_members (pack_id, segment_id, position) VALUES (?1, ?2, ?3)",
            )
            .bind(pack_id)
            .bind(segment_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(pack_id)
    }

    /// Member segment ids of a pack, in position order.
    pub async fn pack_members(&self, pack_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT segment_id FROM pack_members WHERE pack_id = ?1 ORDER BY position ASC",
        )
        .bind(pack_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("segment_id")).collect())
    }
}
