//! `usync add <path>` – register a folder for syncing.

use anyhow::{bail, Context, Result};
use std::path::Path;

use usync_core::store::Store;
use usync_core::{add_folder, Actor};

pub async fn run_add(
    store: &Store,
    actor: &Actor,
    path: &Path,
    name: Option<String>,
) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("resolving {}", path.display()))?;
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let name = name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "folder".to_string())
    });

    let folder_id = add_folder(store, actor, &path, &name).await?;
    println!("Added folder {folder_id} ({name}) at {}", path.display());
    Ok(())
}
