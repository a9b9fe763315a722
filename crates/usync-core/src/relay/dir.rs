//! Directory-backed relay: articles as files.
//!
//! Lets the whole pipeline run against a local directory (the CLI's default
//! backend when no NNTP peer is wired in). Each article becomes two files
//! named by the SHA-256 of its Message-ID: `<hash>.hdr` (header JSON) and
//! `<hash>.art` (raw body). Append-only: an existing article is never
//! rewritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::crypto::sha256;

use super::{ArticleHeaders, Relay, RelayCapabilities, RelayError};

pub struct DirRelay {
    root: PathBuf,
    capabilities: RelayCapabilities,
}

impl DirRelay {
    /// Open (creating the directory if needed).
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            capabilities: RelayCapabilities {
                max_article_bytes: 64 * 1024 * 1024,
                supports_tls: false,
                supports_streaming: true,
                max_connections: 8,
            },
        })
    }

    fn article_paths(&self, message_id: &str) -> (PathBuf, PathBuf) {
        let name = hex::encode(sha256(message_id.as_bytes()));
        (
            self.root.join(format!("{name}.hdr")),
            self.root.join(format!("{name}.art")),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_retryable(e: std::io::Error) -> RelayError {
    RelayError::Retryable(format!("article store i/o: {e}"))
}

#[async_trait]
impl Relay for DirRelay {
    async fn post(&self, headers: &ArticleHeaders, body: &[u8]) -> Result<String, RelayError> {
        if body.len() as u64 > self.capabilities.max_article_bytes {
            return Err(RelayError::Permanent(format!(
                "article too large: {} bytes",
                body.len()
            )));
        }
        let (hdr_path, art_path) = self.article_paths(&headers.message_id);

        // Idempotent duplicate: already stored under this Message-ID.
        if tokio::fs::try_exists(&art_path).await.map_err(io_retryable)? {
            return Ok(headers.message_id.clone());
        }

        let hdr_json = serde_json::to_vec(headers)
            .map_err(|e| RelayError::Permanent(format!("malformed header: {e}")))?;

        // Body first, then header: a header file marks the article complete.
        let tmp = art_path.with_extension("part");
        tokio::fs::write(&tmp, body).await.map_err(io_retryable)?;
        tokio::fs::rename(&tmp, &art_path)
            .await
            .map_err(io_retryable)?;
        tokio::fs::write(&hdr_path, hdr_json)
            .await
            .map_err(io_retryable)?;

        Ok(headers.message_id.clone())
    }

    async fn fetch(&self, message_id: &str) -> Result<(ArticleHeaders, Vec<u8>), RelayError> {
        let (hdr_path, art_path) = self.article_paths(message_id);
        let hdr_json = match tokio::fs::read(&hdr_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::NotFound)
            }
            Err(e) => return Err(io_retryable(e)),
        };
        let headers: ArticleHeaders = serde_json::from_slice(&hdr_json)
            .map_err(|e| RelayError::Permanent(format!("corrupt header file: {e}")))?;
        let body = match tokio::fs::read(&art_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::NotFound)
            }
            Err(e) => return Err(io_retryable(e)),
        };
        Ok((headers, body))
    }

    fn capabilities(&self) -> RelayCapabilities {
        self.capabilities
    }
}
