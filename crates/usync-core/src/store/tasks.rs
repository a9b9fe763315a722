//! Persistent task queues (upload and download).
//!
//! Both queues share one shape: FIFO within priority, priority ascending,
//! atomic claim with a per-folder in-flight ceiling, retry deprioritization,
//! and crash recovery that returns stranded tasks to `pending` while their
//! checkpointed progress survives.

use anyhow::Result;
use sqlx::Row;

use super::types::{TaskCounts, TaskKind, TaskRow, TaskStatus};
use super::{unix_timestamp, Store};

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> TaskRow {
    TaskRow {
        task_id: row.get("task_id"),
        folder_id: row.get("folder_id"),
        priority: row.get("priority"),
        status: TaskStatus::from_str(row.get::<String, _>("status").as_str()),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        payload_json: row.get("payload_json"),
        progress_json: row.get("progress_json"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const TASK_COLUMNS: &str = "task_id, folder_id, priority, status, retry_count, max_retries, \
                            payload_json, progress_json, created_at, updated_at";

impl Store {
    /// Insert a new `pending` task.
    pub async fn enqueue_task(
        &self,
        kind: TaskKind,
        folder_id: &str,
        priority: i64,
        max_retries: i64,
        payload_json: &str,
    ) -> Result<String> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let now = unix_timestamp();
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                task_id, folder_id, priority, status, retry_count, max_retries,
                payload_json, progress_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, '{{}}', ?7, ?8)
            "#,
            kind.table()
        ))
        .bind(&task_id)
        .bind(folder_id)
        .bind(priority)
        .bind(TaskStatus::Pending.as_str())
        .bind(max_retries)
        .bind(payload_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.emit(super::StoreEvent::TaskChanged {
            kind,
            task_id: task_id.clone(),
            status: TaskStatus::Pending,
        });
        Ok(task_id)
    }

    /// Atomically claim the next runnable task: lowest priority value first,
    /// FIFO within a priority, skipping folders that already have
    /// `folder_ceiling` tasks in flight. At most one worker can hold a task.
    pub async fn claim_next_task(
        &self,
        kind: TaskKind,
        folder_ceiling: i64,
    ) -> Result<Option<TaskRow>> {
        let table = kind.table();
        let row = sqlx::query(&format!(
            r#"
            UPDATE {table} SET status = 'in_progress', updated_at = ?1
            WHERE task_id = (
                SELECT t.task_id FROM {table} t
                WHERE t.status = 'pending'
                  AND (SELECT COUNT(*) FROM {table} x
                       WHERE x.status = 'in_progress' AND x.folder_id = t.folder_id) < ?2
                ORDER BY t.priority ASC, t.created_at ASC, t.task_id ASC
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(unix_timestamp())
        .bind(folder_ceiling)
        .fetch_optional(&self.pool)
        .await?;
        let task = row.as_ref().map(row_to_task);
        if let Some(ref task) = task {
            self.emit(super::StoreEvent::TaskChanged {
                kind,
                task_id: task.task_id.clone(),
                status: TaskStatus::InProgress,
            });
        }
        Ok(task)
    }

    pub async fn get_task(&self, kind: TaskKind, task_id: &str) -> Result<Option<TaskRow>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM {} WHERE task_id = ?1",
            kind.table()
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_task))
    }

    pub async fn list_tasks(&self, kind: TaskKind) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM {} ORDER BY created_at ASC, task_id ASC",
            kind.table()
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    pub async fn complete_task(&self, kind: TaskKind, task_id: &str) -> Result<()> {
        self.set_task_status(kind, task_id, TaskStatus::Completed).await
    }

    pub async fn fail_task(&self, kind: TaskKind, task_id: &str) -> Result<()> {
        self.set_task_status(kind, task_id, TaskStatus::Failed).await
    }

    async fn set_task_status(
        &self,
        kind: TaskKind,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET status = ?1, updated_at = ?2 WHERE task_id = ?3",
            kind.table()
        ))
        .bind(status.as_str())
        .bind(unix_timestamp())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        self.emit(super::StoreEvent::TaskChanged {
            kind,
            task_id: task_id.to_string(),
            status,
        });
        Ok(())
    }

    /// Bookkeeping after a retryable failure: bump the retry count,
    /// deprioritize by `retry_count * 10`, and park the task in `retrying`.
    /// It moves back to `pending` only when the queue re-admits it (or via
    /// startup recovery). Returns the updated row, or None if the task
    /// vanished.
    pub async fn mark_task_retrying(
        &self,
        kind: TaskKind,
        task_id: &str,
    ) -> Result<Option<TaskRow>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                retry_count = retry_count + 1,
                priority = priority + (retry_count + 1) * 10,
                status = 'retrying',
                updated_at = ?1
            WHERE task_id = ?2
            RETURNING {TASK_COLUMNS}
            "#,
            kind.table()
        ))
        .bind(unix_timestamp())
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        let task = row.as_ref().map(row_to_task);
        if task.is_some() {
            self.emit(super::StoreEvent::TaskChanged {
                kind,
                task_id: task_id.to_string(),
                status: TaskStatus::Retrying,
            });
        }
        Ok(task)
    }

    /// Park an aborted task in `retrying` without touching its retry
    /// bookkeeping (cancellation is not a failure). Re-admission or startup
    /// recovery returns it to `pending`.
    pub async fn suspend_task(&self, kind: TaskKind, task_id: &str) -> Result<()> {
        self.set_task_status(kind, task_id, TaskStatus::Retrying).await
    }

    /// Re-admit parked `retrying` tasks as `pending`. The queues call this
    /// before claiming, which is the `retrying → pending` hop of the task
    /// state machine. Returns the number re-admitted.
    pub async fn readmit_retrying_tasks(&self, kind: TaskKind) -> Result<u64> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE {} SET status = 'pending', updated_at = ?1
            WHERE status = 'retrying'
            RETURNING task_id
            "#,
            kind.table()
        ))
        .bind(unix_timestamp())
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            self.emit(super::StoreEvent::TaskChanged {
                kind,
                task_id: row.get("task_id"),
                status: TaskStatus::Pending,
            });
        }
        Ok(rows.len() as u64)
    }

    /// Persist checkpointed progress JSON for a task.
    pub async fn set_task_progress(
        &self,
        kind: TaskKind,
        task_id: &str,
        progress_json: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET progress_json = ?1, updated_at = ?2 WHERE task_id = ?3",
            kind.table()
        ))
        .bind(progress_json)
        .bind(unix_timestamp())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Durable post checkpoint: flip the segment to `posted` and write the
    /// task's progress JSON in one transaction, so a crash between the two
    /// cannot desynchronize them.
    pub async fn checkpoint_segment_post(
        &self,
        kind: TaskKind,
        task_id: &str,
        segment_id: i64,
        progress_json: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Store::mark_segment_posted(&mut tx, segment_id).await?;
        sqlx::query(&format!(
            "UPDATE {} SET progress_json = ?1, updated_at = ?2 WHERE task_id = ?3",
            kind.table()
        ))
        .bind(progress_json)
        .bind(unix_timestamp())
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Reset tasks stranded `in_progress`/`retrying` by a crash to `pending`.
    /// Progress rows remain, so completed segments are skipped on re-run.
    /// Returns the number of tasks reset.
    pub async fn recover_stale_tasks(&self, kind: TaskKind) -> Result<u64> {
        let r = sqlx::query(&format!(
            r#"
            UPDATE {} SET status = 'pending', updated_at = ?1
            WHERE status IN ('in_progress', 'retrying')
            "#,
            kind.table()
        ))
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    pub async fn pending_task_count(&self, kind: TaskKind) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {} WHERE status = 'pending'",
            kind.table()
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    pub async fn task_counts(&self, kind: TaskKind) -> Result<TaskCounts> {
        let rows = sqlx::query(&format!(
            "SELECT status, COUNT(*) AS n FROM {} GROUP BY status",
            kind.table()
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut counts = TaskCounts::default();
        for row in rows {
            let n: i64 = row.get("n");
            match TaskStatus::from_str(row.get::<String, _>("status").as_str()) {
                TaskStatus::Pending => counts.pending = n,
                TaskStatus::InProgress => counts.in_progress = n,
                TaskStatus::Retrying => counts.retrying = n,
                TaskStatus::Completed => counts.completed = n,
                TaskStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}
