//! Incremental folder scanning and versioning.
//!
//! A scan walks the folder, prefilters by `(size, mtime)` against the
//! previous snapshot, hashes only candidates (bounded parallel workers), and
//! emits added/modified/deleted sets keyed by relative path. A file counts
//! as modified only when both the metadata and the content hash differ from
//! the previous version; a touch that leaves bytes identical is unchanged.

mod hash;

pub use hash::{sha256_hex, sha256_path};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::store::{FileRow, Store};

/// Names the scanner skips. A literal `".*"` entry skips every dot-prefixed
/// name; other entries match exactly. Policy, not a hard rule.
#[derive(Debug, Clone)]
pub struct SkipPatterns {
    patterns: Vec<String>,
}

impl SkipPatterns {
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    fn skips(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| {
            if p == ".*" {
                name.starts_with('.')
            } else {
                p == name
            }
        })
    }
}

impl Default for SkipPatterns {
    fn default() -> Self {
        Self::new([".*", "__pycache__", ".git", ".svn"].map(String::from))
    }
}

/// One file observed by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Path relative to the folder root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub mtime: i64,
    pub content_hash: String,
}

/// Snapshot of one previously indexed file, for change detection.
#[derive(Debug, Clone)]
pub struct PreviousFile {
    pub size: u64,
    pub mtime: i64,
    pub content_hash: String,
}

impl From<&FileRow> for PreviousFile {
    fn from(row: &FileRow) -> Self {
        Self {
            size: row.size as u64,
            mtime: row.modified_at,
            content_hash: row.content_hash.clone(),
        }
    }
}

/// Result of a scan against a previous snapshot.
#[derive(Debug, Default)]
pub struct ScanDiff {
    pub added: Vec<ScanEntry>,
    pub modified: Vec<ScanEntry>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl ScanDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

fn file_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Walk the folder and list candidate files (no hashing yet).
fn walk(root: &Path, skip: &SkipPatterns) -> Result<Vec<(String, PathBuf, u64, i64)>> {
    let mut out = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        // Never filter the root itself, whatever the folder is named.
        if e.depth() == 0 {
            return true;
        }
        e.file_name()
            .to_str()
            .map(|name| !e.path_is_symlink() && !SkipPatterns::skips(skip, name))
            .unwrap_or(false)
    });
    for entry in walker {
        let entry = entry.context("walking folder")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().context("reading file metadata")?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walk yields paths under the root");
        let rel_str = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((rel_str, entry.path().to_path_buf(), meta.len(), file_mtime(&meta)));
    }
    Ok(out)
}

/// Scan `root`, comparing against `previous` (keyed by relative path).
///
/// Hashing runs on up to `workers` blocking tasks; memory per file is
/// bounded by the hash chunk size.
pub async fn scan_folder(
    root: &Path,
    previous: &HashMap<String, PreviousFile>,
    workers: usize,
    skip: &SkipPatterns,
) -> Result<ScanDiff> {
    let root_owned = root.to_path_buf();
    let skip_owned = skip.clone();
    let listed =
        tokio::task::spawn_blocking(move || walk(&root_owned, &skip_owned)).await??;

    let mut diff = ScanDiff::default();
    let mut seen: HashMap<String, ()> = HashMap::new();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut pending = Vec::new();

    for (rel, abs, size, mtime) in listed {
        seen.insert(rel.clone(), ());
        if let Some(prev) = previous.get(&rel) {
            if prev.size == size && prev.mtime == mtime {
                // Metadata unchanged: trust the stored hash, skip the read.
                diff.unchanged += 1;
                continue;
            }
        }
        let semaphore = Arc::clone(&semaphore);
        pending.push((
            rel.clone(),
            size,
            mtime,
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                tokio::task::spawn_blocking(move || sha256_path(&abs)).await?
            }),
        ));
    }

    for (rel, size, mtime, handle) in pending {
        let content_hash = handle
            .await
            .context("hash worker panicked")?
            .with_context(|| format!("hashing {rel}"))?;
        let entry = ScanEntry {
            relative_path: rel.clone(),
            size,
            mtime,
            content_hash,
        };
        match previous.get(&rel) {
            None => diff.added.push(entry),
            Some(prev) if prev.content_hash != entry.content_hash => diff.modified.push(entry),
            Some(_) => diff.unchanged += 1,
        }
    }

    for path in previous.keys() {
        if !seen.contains_key(path) {
            diff.deleted.push(path.clone());
        }
    }
    diff.added.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    diff.modified.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    diff.deleted.sort();

    tracing::debug!(
        added = diff.added.len(),
        modified = diff.modified.len(),
        deleted = diff.deleted.len(),
        unchanged = diff.unchanged,
        "scan finished"
    );
    Ok(diff)
}

/// Quick equivalence hash over a whole scan: SHA-256 of the sorted
/// concatenation of `(relative_path || size || content_hash)`.
pub fn folder_hash(entries: &[ScanEntry]) -> String {
    let mut sorted: Vec<&ScanEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let mut hasher = Sha256::new();
    for e in sorted {
        hasher.update(e.relative_path.as_bytes());
        hasher.update(e.size.to_le_bytes());
        hasher.update(e.content_hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Load the previous snapshot of a folder from the store.
pub async fn previous_snapshot(
    store: &Store,
    folder_id: &str,
) -> Result<HashMap<String, PreviousFile>> {
    let files = store.latest_files(folder_id).await?;
    Ok(files
        .iter()
        .map(|f| (f.relative_path.clone(), PreviousFile::from(f)))
        .collect())
}

/// Persist a diff: new version rows for added/modified paths, obsolete
/// marks for deletions. Returns the file rows that now need segmenting.
pub async fn persist_diff(
    store: &Store,
    folder_id: &str,
    diff: &ScanDiff,
) -> Result<Vec<FileRow>> {
    let mut changed = Vec::with_capacity(diff.added.len() + diff.modified.len());
    for entry in diff.added.iter().chain(diff.modified.iter()) {
        let row = store
            .insert_file_version(
                folder_id,
                &entry.relative_path,
                entry.size as i64,
                &entry.content_hash,
                entry.mtime,
            )
            .await?;
        changed.push(row);
    }
    for path in &diff.deleted {
        store.mark_path_obsolete(folder_id, path).await?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn initial_scan_reports_everything_added() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "sub/b.bin", b"world!");
        write(dir.path(), ".git/config", b"ignored");
        write(dir.path(), ".hidden", b"ignored");

        let diff = scan_folder(dir.path(), &HashMap::new(), 4, &SkipPatterns::default())
            .await
            .unwrap();
        assert_eq!(diff.added.len(), 2);
        assert_eq!(diff.added[0].relative_path, "a.txt");
        assert_eq!(diff.added[1].relative_path, "sub/b.bin");
        assert_eq!(diff.added[0].content_hash, sha256_hex(b"hello"));
        assert!(diff.modified.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[tokio::test]
    async fn rescan_detects_modify_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "b.txt", b"stays");
        write(dir.path(), "c.txt", b"goes");

        let first = scan_folder(dir.path(), &HashMap::new(), 4, &SkipPatterns::default())
            .await
            .unwrap();
        let previous: HashMap<String, PreviousFile> = first
            .added
            .iter()
            .map(|e| {
                (
                    e.relative_path.clone(),
                    PreviousFile {
                        size: e.size,
                        mtime: e.mtime,
                        content_hash: e.content_hash.clone(),
                    },
                )
            })
            .collect();

        write(dir.path(), "a.txt", b"hello2");
        fs::remove_file(dir.path().join("c.txt")).unwrap();
        // Force an mtime difference even on coarse filesystem clocks.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(10);
        let f = fs::File::options()
            .write(true)
            .open(dir.path().join("a.txt"))
            .unwrap();
        f.set_modified(past).unwrap();

        let diff = scan_folder(dir.path(), &previous, 4, &SkipPatterns::default())
            .await
            .unwrap();
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].relative_path, "a.txt");
        assert_eq!(diff.deleted, vec!["c.txt".to_string()]);
        assert!(diff.added.is_empty());
        assert_eq!(diff.unchanged, 1);
    }

    #[tokio::test]
    async fn touched_but_identical_content_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"same");
        let first = scan_folder(dir.path(), &HashMap::new(), 4, &SkipPatterns::default())
            .await
            .unwrap();
        let mut previous = HashMap::new();
        let e = &first.added[0];
        previous.insert(
            e.relative_path.clone(),
            PreviousFile {
                size: e.size,
                // Stale mtime forces a re-hash, which then matches.
                mtime: e.mtime - 100,
                content_hash: e.content_hash.clone(),
            },
        );

        let diff = scan_folder(dir.path(), &previous, 4, &SkipPatterns::default())
            .await
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, 1);
    }

    #[tokio::test]
    async fn folder_hash_is_order_independent_and_content_sensitive() {
        let a = ScanEntry {
            relative_path: "a".into(),
            size: 1,
            mtime: 0,
            content_hash: "h1".into(),
        };
        let b = ScanEntry {
            relative_path: "b".into(),
            size: 2,
            mtime: 0,
            content_hash: "h2".into(),
        };
        let h1 = folder_hash(&[a.clone(), b.clone()]);
        let h2 = folder_hash(&[b.clone(), a.clone()]);
        assert_eq!(h1, h2);

        let mut b2 = b.clone();
        b2.content_hash = "h3".into();
        assert_ne!(folder_hash(&[a, b2]), h1);
    }

    #[tokio::test]
    async fn persist_diff_writes_versions() {
        let store = Store::open_memory().await.unwrap();
        store.add_folder("f", "f", "/f").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"one");

        let diff = scan_folder(dir.path(), &HashMap::new(), 2, &SkipPatterns::default())
            .await
            .unwrap();
        let rows = persist_diff(&store, "f", &diff).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 1);

        let previous = previous_snapshot(&store, "f").await.unwrap();
        assert!(previous.contains_key("a.txt"));
    }
}
