//! `usync status` – folders, per-folder stats, and queue counts.

use anyhow::Result;

use usync_core::store::{Store, TaskKind};

pub async fn run_status(store: &Store) -> Result<()> {
    let folders = store.list_folders().await?;
    if folders.is_empty() {
        println!("No folders registered; use `usync add <path>`.");
    }
    for folder in &folders {
        let stats = store.folder_stats(&folder.folder_id).await?;
        println!(
            "{}  {}  [{}]",
            folder.folder_id,
            folder.display_name,
            folder.state.as_str()
        );
        println!("    path:     {}", folder.local_path);
        println!(
            "    files:    {} ({} bytes)",
            stats.file_count, stats.total_size
        );
        println!(
            "    segments: {} posted / {}",
            stats.posted_segments, stats.segment_count
        );
    }

    let up = store.task_counts(TaskKind::Upload).await?;
    let down = store.task_counts(TaskKind::Download).await?;
    println!(
        "upload queue:   {} pending, {} in progress, {} completed, {} failed",
        up.pending, up.in_progress, up.completed, up.failed
    );
    println!(
        "download queue: {} pending, {} in progress, {} completed, {} failed",
        down.pending, down.in_progress, down.completed, down.failed
    );
    Ok(())
}
