//! In-memory relay used by tests and benchmarks.
//!
//! Behaves like a well-behaved append-only server and supports fault
//! injection: individual Message-IDs can be "lost" (fetch yields NotFound),
//! and the next N posts can be made to fail with a retryable error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArticleHeaders, Relay, RelayCapabilities, RelayError};

#[derive(Default)]
pub struct MemoryRelay {
    articles: Mutex<HashMap<String, (ArticleHeaders, Vec<u8>)>>,
    lost: Mutex<HashSet<String>>,
    fail_next_posts: AtomicUsize,
    post_count: AtomicUsize,
    capabilities: RelayCapabilities,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self {
            articles: Mutex::new(HashMap::new()),
            lost: Mutex::new(HashSet::new()),
            fail_next_posts: AtomicUsize::new(0),
            post_count: AtomicUsize::new(0),
            capabilities: RelayCapabilities::default(),
        }
    }

    pub fn with_capabilities(capabilities: RelayCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::new()
        }
    }

    /// Number of successful posts so far (idempotent duplicates included).
    pub fn post_count(&self) -> usize {
        self.post_count.load(Ordering::Relaxed)
    }

    /// Number of distinct articles held.
    pub fn article_count(&self) -> usize {
        self.articles.lock().unwrap().len()
    }

    /// All stored headers, for wire-metadata inspection in tests.
    pub fn all_headers(&self) -> Vec<ArticleHeaders> {
        self.articles
            .lock()
            .unwrap()
            .values()
            .map(|(h, _)| h.clone())
            .collect()
    }

    /// Simulate the relay losing an article: subsequent fetches yield NotFound.
    pub fn lose(&self, message_id: &str) {
        self.lost.lock().unwrap().insert(message_id.to_string());
    }

    /// Lose every article whose Message-ID satisfies `pred`.
    pub fn lose_matching(&self, pred: impl Fn(&str) -> bool) {
        let articles = self.articles.lock().unwrap();
        let mut lost = self.lost.lock().unwrap();
        for id in articles.keys() {
            if pred(id) {
                lost.insert(id.clone());
            }
        }
    }

    /// Make the next `n` posts fail with a retryable error.
    pub fn fail_next_posts(&self, n: usize) {
        self.fail_next_posts.store(n, Ordering::Relaxed);
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.articles.lock().unwrap().contains_key(message_id)
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn post(&self, headers: &ArticleHeaders, body: &[u8]) -> Result<String, RelayError> {
        loop {
            let remaining = self.fail_next_posts.load(Ordering::Relaxed);
            if remaining == 0 {
                break;
            }
            if self
                .fail_next_posts
                .compare_exchange(remaining, remaining - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Err(RelayError::Retryable("injected post failure".into()));
            }
        }

        if body.len() as u64 > self.capabilities.max_article_bytes {
            return Err(RelayError::Permanent(format!(
                "article too large: {} bytes",
                body.len()
            )));
        }

        let mut articles = self.articles.lock().unwrap();
        // Idempotent: a duplicate Message-ID is success without rewriting.
        articles
            .entry(headers.message_id.clone())
            .or_insert_with(|| (headers.clone(), body.to_vec()));
        self.post_count.fetch_add(1, Ordering::Relaxed);
        Ok(headers.message_id.clone())
    }

    async fn fetch(&self, message_id: &str) -> Result<(ArticleHeaders, Vec<u8>), RelayError> {
        if self.lost.lock().unwrap().contains(message_id) {
            return Err(RelayError::NotFound);
        }
        self.articles
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or(RelayError::NotFound)
    }

    fn capabilities(&self) -> RelayCapabilities {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(id: &str) -> ArticleHeaders {
        ArticleHeaders {
            message_id: id.to_string(),
            subject: "aZ9kQ2mPbX4cR7tYw1nE".to_string(),
            newsgroups: "alt.binaries.misc".to_string(),
            from: "poster@example.invalid".to_string(),
            date: "Thu, 01 Jan 1970 00:00:00 +0000".to_string(),
            path: "not-for-mail".to_string(),
            user_agent: "Pan/0.146".to_string(),
            organization: None,
        }
    }

    #[tokio::test]
    async fn post_fetch_roundtrip() {
        let relay = MemoryRelay::new();
        let id = relay.post(&headers("<a@x>"), b"body").await.unwrap();
        assert_eq!(id, "<a@x>");
        let (h, body) = relay.fetch("<a@x>").await.unwrap();
        assert_eq!(h.message_id, "<a@x>");
        assert_eq!(body, b"body");
    }

    #[tokio::test]
    async fn duplicate_post_is_success_and_keeps_first_body() {
        let relay = MemoryRelay::new();
        relay.post(&headers("<a@x>"), b"first").await.unwrap();
        relay.post(&headers("<a@x>"), b"second").await.unwrap();
        let (_, body) = relay.fetch("<a@x>").await.unwrap();
        assert_eq!(body, b"first");
        assert_eq!(relay.article_count(), 1);
        assert_eq!(relay.post_count(), 2);
    }

    #[tokio::test]
    async fn lost_article_is_not_found() {
        let relay = MemoryRelay::new();
        relay.post(&headers("<a@x>"), b"body").await.unwrap();
        relay.lose("<a@x>");
        assert!(matches!(relay.fetch("<a@x>").await, Err(RelayError::NotFound)));
    }

    #[tokio::test]
    async fn injected_failures_then_success() {
        let relay = MemoryRelay::new();
        relay.fail_next_posts(2);
        assert!(matches!(
            relay.post(&headers("<a@x>"), b"b").await,
            Err(RelayError::Retryable(_))
        ));
        assert!(matches!(
            relay.post(&headers("<a@x>"), b"b").await,
            Err(RelayError::Retryable(_))
        ));
        assert!(relay.post(&headers("<a@x>"), b"b").await.is_ok());
    }

    #[tokio::test]
    async fn oversized_article_is_permanent() {
        let relay = MemoryRelay::with_capabilities(RelayCapabilities {
            max_article_bytes: 4,
            ..RelayCapabilities::default()
        });
        assert!(matches!(
            relay.post(&headers("<a@x>"), b"too big").await,
            Err(RelayError::Permanent(_))
        ));
    }
}
