//! `usync consume <handle> <dest>` – download a share.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;

use usync_core::reconstruct::FileStatus;
use usync_core::relay::Relay;
use usync_core::store::Store;
use usync_core::{consume_share, CoreError, Credentials, ShareHandle, UsyncConfig};

use crate::cli::interrupt;

#[allow(clippy::too_many_arguments)]
pub async fn run_consume(
    store: &Store,
    relay: &Arc<dyn Relay>,
    cfg: &UsyncConfig,
    handle: &str,
    destination: &Path,
    password: Option<String>,
    user: Option<String>,
    root_hex: Option<String>,
) -> Result<()> {
    let handle = ShareHandle::decode(handle)?;
    let credentials = match (password, user, root_hex) {
        (Some(password), None, None) => Credentials::Password(password),
        (None, Some(user_id), Some(root_hex)) => {
            let raw = hex::decode(&root_hex)?;
            let folder_root: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("--root must be 32 hex-encoded bytes"))?;
            Credentials::User {
                user_id,
                folder_root,
            }
        }
        (None, None, None) => Credentials::Anonymous,
        _ => bail!("--password and --user/--root are mutually exclusive"),
    };

    // Ctrl-C parks in-flight tasks; staged segments survive for a re-run.
    let (control, _interrupt) = interrupt::armed_control();
    let report = match consume_share(
        store,
        relay,
        &handle,
        &credentials,
        destination,
        None,
        cfg,
        Some(Arc::clone(&control)),
        None,
    )
    .await
    {
        Err(CoreError::Cancelled) => {
            println!("Consume cancelled; verified segments are staged, re-run to resume.");
            return Ok(());
        }
        other => other?,
    };

    for file in &report.files {
        match file.status {
            FileStatus::Complete => {
                println!("  ok        {} ({} bytes)", file.path, file.written_bytes)
            }
            FileStatus::Incomplete => println!(
                "  INCOMPLETE {} (missing segments: {:?})",
                file.path, file.missing_segments
            ),
        }
    }
    if report.is_complete() {
        println!(
            "Consumed {} file(s) into {}",
            report.files.len(),
            destination.display()
        );
    } else {
        println!("Some files are incomplete; re-run to retry missing segments");
    }
    Ok(())
}
