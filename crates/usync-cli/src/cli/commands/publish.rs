//! `usync publish <folder_id>` – scan, upload, and publish a share.

use anyhow::Result;
use std::sync::Arc;

use usync_core::progress::ProgressStats;
use usync_core::relay::Relay;
use usync_core::store::Store;
use usync_core::{publish_folder, AccessSpec, Actor, CoreError, PublishOptions, UsyncConfig};

use crate::cli::interrupt;

pub async fn run_publish(
    store: &Store,
    relay: &Arc<dyn Relay>,
    actor: &Actor,
    cfg: &UsyncConfig,
    folder_id: &str,
    password: Option<String>,
    users: Vec<String>,
) -> Result<()> {
    let access = if let Some(password) = password {
        AccessSpec::Protected { password }
    } else if !users.is_empty() {
        AccessSpec::Private { user_ids: users }
    } else {
        AccessSpec::Public
    };

    // Live progress on stderr while the queue drains; Ctrl-C parks the
    // in-flight tasks instead of killing the transfer mid-article.
    let (control, _interrupt) = interrupt::armed_control();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ProgressStats>(16);
    let printer = tokio::spawn(async move {
        while let Some(stats) = rx.recv().await {
            eprint!(
                "\ruploaded {} segment(s), {:.1} KiB/s   ",
                stats.segments_done,
                stats.bytes_per_sec() / 1024.0
            );
        }
        eprintln!();
    });

    let outcome = publish_folder(
        store,
        relay,
        actor,
        folder_id,
        PublishOptions {
            access,
            newsgroups: None,
            expires_at: None,
        },
        cfg,
        Some(Arc::clone(&control)),
        Some(tx),
    )
    .await;
    let _ = printer.await;
    let outcome = match outcome {
        Err(CoreError::Cancelled) => {
            println!("Publish cancelled; progress is saved, re-run to resume.");
            return Ok(());
        }
        other => other?,
    };

    println!(
        "Published {} file(s), {} segment(s), {} byte(s) posted",
        outcome.file_count, outcome.report.segments_posted, outcome.report.bytes_posted
    );
    println!("Share handle: {}", outcome.handle.encode());
    Ok(())
}
