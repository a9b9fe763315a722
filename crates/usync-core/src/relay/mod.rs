//! The relay capability: post one article, fetch one article by Message-ID.
//!
//! The NNTP transport proper (connection pooling, TLS, authentication, yEnc
//! framing) lives outside the core; everything here programs against this
//! trait. Posts are append-only and idempotent by Message-ID: re-posting an
//! id the relay already holds is success.

mod dir;
mod memory;

pub use dir::DirRelay;
pub use memory::MemoryRelay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Headers posted with every article. No header may correlate with content
/// beyond the unavoidable article size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleHeaders {
    pub message_id: String,
    pub subject: String,
    pub newsgroups: String,
    pub from: String,
    pub date: String,
    pub path: String,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// What a relay implementation can do, as advertised to the queues.
#[derive(Debug, Clone, Copy)]
pub struct RelayCapabilities {
    /// Largest accepted article body in bytes.
    pub max_article_bytes: u64,
    pub supports_tls: bool,
    pub supports_streaming: bool,
    /// Bound on concurrent operations the relay tolerates; queues size their
    /// worker pools to at most this.
    pub max_connections: usize,
}

impl Default for RelayCapabilities {
    fn default() -> Self {
        Self {
            max_article_bytes: 64 * 1024 * 1024,
            supports_tls: false,
            supports_streaming: false,
            max_connections: 8,
        }
    }
}

/// Relay failure classification, mapped onto the core taxonomy by workers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Transport-level failure worth retrying (timeout, connection drop, 5xx).
    #[error("retryable relay failure: {0}")]
    Retryable(String),
    /// The relay rejected the article outright (too large, malformed header).
    #[error("permanent relay failure: {0}")]
    Permanent(String),
    /// No article with that Message-ID.
    #[error("article not found")]
    NotFound,
}

impl From<RelayError> for crate::error::CoreError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Retryable(msg) => crate::error::CoreError::Retryable(msg),
            RelayError::Permanent(msg) => crate::error::CoreError::Permanent(msg),
            RelayError::NotFound => crate::error::CoreError::NotFound("article".into()),
        }
    }
}

/// Append-only article service.
///
/// `post` must treat the client-supplied Message-ID as authoritative and
/// MUST NOT rewrite it; a duplicate post of an id already accepted is success.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Post one article; returns the Message-ID the article is stored under
    /// (always the one supplied in `headers`).
    async fn post(&self, headers: &ArticleHeaders, body: &[u8]) -> Result<String, RelayError>;

    /// Fetch one article by Message-ID.
    async fn fetch(&self, message_id: &str) -> Result<(ArticleHeaders, Vec<u8>), RelayError>;

    fn capabilities(&self) -> RelayCapabilities;
}
