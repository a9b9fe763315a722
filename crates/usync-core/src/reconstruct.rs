//! Reassemble verified segment blobs into files.
//!
//! Blobs come from the download staging directory, keyed by plaintext
//! hash. Files are assembled in ascending segment order, checked against
//! the index's whole-file hash, and written atomically (temp + rename)
//! under the destination root. A file with missing segments is reported
//! `Incomplete` and skipped; sibling files are unaffected.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::download::{staged_path, FileFetchResult};
use crate::error::CoreError;
use crate::index::FileEntry;

/// Final status of one reconstructed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Complete,
    Incomplete,
}

/// Per-file outcome of a consume operation. This is data, not an error:
/// no exception escapes the public API for missing segments.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: String,
    pub written_bytes: u64,
    pub total_bytes: u64,
    pub status: FileStatus,
    pub missing_segments: Vec<u32>,
}

/// Reject absolute paths and parent traversal before writing anywhere.
fn sanitized_destination(root: &Path, relative_path: &str) -> Result<PathBuf, CoreError> {
    let rel = Path::new(relative_path);
    if rel.components().any(|c| {
        !matches!(c, Component::Normal(_))
    }) {
        return Err(CoreError::InvalidFormat(format!(
            "unsafe relative path: {relative_path}"
        )));
    }
    Ok(root.join(rel))
}

fn assemble(
    file: &FileEntry,
    staging_dir: &Path,
    destination: &Path,
) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = destination.with_extension("usync-part");
    let mut out = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;

    let mut ordered = file.segments.clone();
    ordered.sort_by_key(|s| s.index);
    for entry in &ordered {
        let blob_path = staged_path(staging_dir, &entry.plaintext_hash);
        let mut blob = File::open(&blob_path)
            .with_context(|| format!("opening staged segment {}", blob_path.display()))?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = blob.read(&mut buf).context("reading staged segment")?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n]).context("writing assembled file")?;
            written += n as u64;
        }
    }
    out.sync_all().context("syncing assembled file")?;
    drop(out);

    let digest = hex::encode(hasher.finalize());
    if digest != file.content_hash {
        let _ = fs::remove_file(&tmp);
        anyhow::bail!(
            "content hash mismatch for {}: expected {}, got {digest}",
            file.path,
            file.content_hash
        );
    }
    fs::rename(&tmp, destination)
        .with_context(|| format!("renaming into {}", destination.display()))?;
    Ok(written)
}

/// Write one file from its staged segments.
///
/// `fetch` carries which segments are missing; incomplete files are
/// reported, never partially written.
pub fn reconstruct_file(
    file: &FileEntry,
    fetch: &FileFetchResult,
    staging_dir: &Path,
    destination_root: &Path,
) -> Result<FileOutcome, CoreError> {
    let destination = sanitized_destination(destination_root, &file.path)?;
    if !fetch.missing_segments.is_empty() {
        return Ok(FileOutcome {
            path: file.path.clone(),
            written_bytes: 0,
            total_bytes: file.size,
            status: FileStatus::Incomplete,
            missing_segments: fetch.missing_segments.clone(),
        });
    }

    match assemble(file, staging_dir, &destination) {
        Ok(written) => Ok(FileOutcome {
            path: file.path.clone(),
            written_bytes: written,
            total_bytes: file.size,
            status: FileStatus::Complete,
            missing_segments: Vec::new(),
        }),
        Err(e) => {
            // Assembly failures (a staged blob vanished, final hash check
            // failed) degrade to Incomplete rather than aborting the share.
            tracing::warn!(path = %file.path, "reconstruction failed: {e:#}");
            Ok(FileOutcome {
                path: file.path.clone(),
                written_bytes: 0,
                total_bytes: file.size,
                status: FileStatus::Incomplete,
                missing_segments: fetch.missing_segments.clone(),
            })
        }
    }
}
