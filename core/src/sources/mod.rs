//! Source adapter abstractions.
//!
//! Defines the `SourceAdapter` trait implemented by every upstream kind
//! (affiliate API, RSS feed, HTML scraper, user-submission intake), the
//! typed failure adapters return instead of raising, and the cancellation
//! context the scheduler propagates into every fetch.

use crate::models::{RawOffer, SourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub mod affiliate;
pub mod rate_limit;
pub mod registry;
pub mod rss;
pub mod scraper;
pub mod submissions;

pub use registry::SourceRegistry;

/// Default per-request timeout for adapter fetches.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Classification of an upstream failure. Decides whether the scheduler
/// should expect the next tick to succeed or an operator to step in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// Network, 5xx, timeout, rate-limit. Self-healing; retry next tick.
    Transient,
    /// 4xx other than 429, auth failure, schema mismatch. Needs an operator.
    Permanent,
    /// The response body could not be parsed. Treated like transient.
    Parse,
}

/// Typed adapter failure. Adapters never panic and never propagate raw
/// errors up the stack; everything is folded into one of these.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind:?} upstream error: {message}")]
pub struct SourceError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Transient,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Permanent,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Parse,
            message: message.into(),
            retryable: true,
        }
    }

    /// Classify an HTTP status: 429 and 5xx are transient, any other
    /// non-success status is permanent.
    pub fn from_status(status: u16, context: &str) -> Self {
        if status == 429 || status >= 500 {
            Self::transient(format!("{context}: HTTP {status}"))
        } else {
            Self::permanent(format!("{context}: HTTP {status}"))
        }
    }

    pub fn cancelled() -> Self {
        Self::transient("cancelled")
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), "request failed")
        } else if err.is_timeout() {
            Self::transient(format!("request timed out: {err}"))
        } else if err.is_decode() {
            Self::parse(format!("response decode failed: {err}"))
        } else {
            Self::transient(format!("network error: {err}"))
        }
    }
}

/// Cooperative cancellation token, cloned into every job handler and
/// adapter call. Flipped by the scheduler on `stop()`. A token whose
/// issuing `CancelSource` has been dropped reads as cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// A token that can never be cancelled (tests, ad-hoc runs).
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is signalled (or the scheduler that
    /// issued the token is gone).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

/// Handle that cancels every token cloned from it.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call context handed to adapters: cancellation plus the request
/// timeout to apply to each outbound fetch.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub cancel: CancelToken,
    pub timeout: Duration,
}

impl AdapterContext {
    pub fn new(cancel: CancelToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// Detached context with the default timeout (tests, ad-hoc runs).
    pub fn detached() -> Self {
        Self::new(CancelToken::detached(), DEFAULT_REQUEST_TIMEOUT)
    }

    /// Bail out early when the run has been cancelled.
    pub fn ensure_active(&self) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            Err(SourceError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Successful fetch result.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub offers: Vec<RawOffer>,
    /// Requests remaining in the upstream's window, when it reports one.
    pub rate_limit_remaining: Option<u32>,
}

impl FetchOutcome {
    pub fn with_offers(offers: Vec<RawOffer>) -> Self {
        Self {
            offers,
            rate_limit_remaining: None,
        }
    }
}

/// A unit that knows how to pull raw offers from one upstream.
///
/// Implementations serialize their own outbound requests (rate-limit
/// floor), never panic, and surface every failure as a `SourceError`.
/// Retry policy belongs to the scheduler, not the adapter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier, unique within the registry.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Minimum spacing between outbound requests (rate-limit floor).
    fn min_request_interval(&self) -> Duration;

    /// How often the scheduler should invoke this adapter.
    fn poll_interval(&self) -> Duration;

    /// Pull the adapter's current batch of offers.
    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchOutcome, SourceError>;

    /// Search the upstream for offers matching a query.
    async fn search(
        &self,
        ctx: &AdapterContext,
        query: &str,
        category: Option<&str>,
    ) -> Result<FetchOutcome, SourceError>;
}

/// Extract the first price-looking number from free text (`$1,299.99`).
/// Shared by the RSS and scraper adapters.
pub(crate) fn parse_price_text(text: &str) -> Option<f64> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"\$\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)").expect("price regex")
    });
    let caps = re.captures(text)?;
    caps[1].replace(',', "").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification_from_status() {
        assert_eq!(
            SourceError::from_status(429, "x").kind,
            UpstreamErrorKind::Transient
        );
        assert_eq!(
            SourceError::from_status(503, "x").kind,
            UpstreamErrorKind::Transient
        );
        assert_eq!(
            SourceError::from_status(401, "x").kind,
            UpstreamErrorKind::Permanent
        );
        assert!(!SourceError::from_status(404, "x").retryable);
        assert!(SourceError::from_status(500, "x").retryable);
    }

    #[test]
    fn test_parse_price_text() {
        assert_eq!(parse_price_text("now only $49.99!"), Some(49.99));
        assert_eq!(parse_price_text("$1,299 MacBook"), Some(1299.0));
        assert_eq!(parse_price_text("free shipping"), None);
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        source.cancel();
        assert!(token.is_cancelled());
        // Already-cancelled tokens resolve immediately.
        token.cancelled().await;
    }

    #[test]
    fn test_detached_token_never_cancels() {
        let token = CancelToken::detached();
        assert!(!token.is_cancelled());
    }
}
