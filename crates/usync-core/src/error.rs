//! Core error taxonomy shared by the queues, the index manager, and the
//! public workflow API.
//!
//! Workers classify failures into these kinds before deciding retries; the
//! queues absorb `Retryable` and per-replica `Integrity` failures and only
//! surface them once retries are exhausted.

use std::time::Duration;

/// Error kinds visible on the public API surface.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Transient failure (transport drop, timeout, 5xx-equivalent). Bounded retry.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Non-recoverable failure (article too large, rejected content, bad state).
    #[error("permanent: {0}")]
    Permanent(String),

    /// AEAD tag or content hash mismatch. Per-replica discard, next replica tried.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// The caller's credentials do not unlock this share. Terminal; no data emitted.
    #[error("access denied")]
    AccessDenied,

    /// An article or row that should exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// Admission refused: the pending queue is over its high-water mark.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Malformed wire data, envelope, or request (e.g. private share with no recipients).
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Cooperative cancellation; in-flight attempts unwound, tasks recoverable.
    #[error("cancelled")]
    Cancelled,
}

impl CoreError {
    /// True for errors the queues may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Retryable(_))
    }

    /// Store failures are permanent from the queue's point of view: the
    /// local database refusing a write is not a transport hiccup.
    pub(crate) fn store(e: anyhow::Error) -> Self {
        CoreError::Permanent(format!("store: {e:#}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps, used for in-attempt retries
/// (the queue additionally deprioritizes tasks between attempts).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Compute the next backoff delay for a given attempt.
    ///
    /// `attempt` is 1-based (1 = first attempt). Returns `NoRetry` for
    /// non-retryable errors or once attempts are used up.
    pub fn decide(&self, attempt: u32, err: &CoreError) -> RetryDecision {
        if attempt >= self.max_attempts || !err.is_retryable() {
            return RetryDecision::NoRetry;
        }
        let exp = 1u32 << attempt.saturating_sub(1).min(8);
        let raw = self.base_delay.saturating_mul(exp);
        RetryDecision::RetryAfter(raw.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_is_never_retried() {
        let p = RetryPolicy::default();
        let err = CoreError::Permanent("article too large".into());
        assert_eq!(p.decide(1, &err), RetryDecision::NoRetry);
    }

    #[test]
    fn retryable_backoff_grows_and_caps() {
        let mut p = RetryPolicy::default();
        p.max_attempts = 20;
        let err = CoreError::Retryable("timeout".into());
        let d1 = match p.decide(1, &err) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let d2 = match p.decide(2, &err) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d2 >= d1);
        let d_last = match p.decide(12, &err) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d_last <= p.max_delay);
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy::default();
        let err = CoreError::Retryable("connection reset".into());
        assert!(matches!(p.decide(1, &err), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, &err), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, &err), RetryDecision::NoRetry);
    }
}
