//! `usync tasks` – inspect the persistent queues.

use anyhow::Result;

use usync_core::store::{Store, TaskKind};

pub async fn run_tasks(store: &Store) -> Result<()> {
    for (label, kind) in [("upload", TaskKind::Upload), ("download", TaskKind::Download)] {
        let tasks = store.list_tasks(kind).await?;
        println!("{label} tasks: {}", tasks.len());
        for task in tasks.iter().rev().take(20) {
            println!(
                "  {}  [{}]  priority {}  retries {}/{}",
                task.task_id,
                task.status.as_str(),
                task.priority,
                task.retry_count,
                task.max_retries
            );
        }
    }
    Ok(())
}
