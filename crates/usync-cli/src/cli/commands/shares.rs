//! `usync shares` – list published shares.

use anyhow::Result;

use usync_core::store::Store;
use usync_core::ShareHandle;

pub async fn run_shares(store: &Store, folder_id: Option<&str>) -> Result<()> {
    let shares = store.list_shares(folder_id).await?;
    if shares.is_empty() {
        println!("No shares published yet.");
        return Ok(());
    }
    for share in shares {
        let state = if share.index_message_id.is_some() {
            "published"
        } else {
            "draft"
        };
        println!(
            "{}  {}  v{}  [{}]",
            share.share_id,
            share.access_class.as_str(),
            share.version_snapshot,
            state
        );
        if let Some(index_message_id) = share.index_message_id {
            let handle = ShareHandle {
                share_id: share.share_id.clone(),
                index_message_id,
            };
            println!("    handle: {}", handle.encode());
        }
    }
    Ok(())
}
