//! Bridge client seam and error taxonomy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lookup timed out")]
    Timeout,

    #[error("API error [{status}]: {message}")]
    Status { status: u16, message: String },

    #[error("Bridge unavailable: {0}")]
    Unavailable(String),

    #[error("Response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BridgeError {
    /// Transient failures (timeouts, 5xx, connect errors) are retried
    /// with backoff; 4xx is a definitive non-match and is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Timeout => true,
            BridgeError::Status { status, .. } => *status >= 500,
            BridgeError::Http(e) => e.is_timeout() || e.is_connect(),
            BridgeError::Unavailable(_) => true,
            BridgeError::Parse(_) => false,
        }
    }

    /// 4xx responses mean the bridge answered and found nothing usable.
    pub fn is_definitive_miss(&self) -> bool {
        matches!(self, BridgeError::Status { status, .. } if (400..500).contains(status))
    }
}

/// One cross-reference returned by a bridge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeCandidate {
    pub target_id: String,
    pub target_name: String,
    /// Match-quality signal from the bridge, when it reports one.
    pub score: Option<f64>,
}

/// Any component that can resolve a name or identifier to candidate
/// cross-references over an external service.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Vec<BridgeCandidate>, BridgeError>;

    fn name(&self) -> &'static str;
}

// ── Mock implementation for testing ─────────────────────────────────────────

/// Builder-style mock with per-query canned responses and failure
/// injection. Counts lookups for budget/retry assertions.
pub struct MockBridgeClient {
    responses: HashMap<String, Vec<BridgeCandidate>>,
    timeouts: Vec<String>,
    unavailable: bool,
    calls: AtomicU64,
}

impl MockBridgeClient {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            timeouts: Vec::new(),
            unavailable: false,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with(mut self, query: &str, candidates: Vec<BridgeCandidate>) -> Self {
        self.responses.insert(query.to_string(), candidates);
        self
    }

    /// Every lookup for this query times out.
    pub fn with_timeout(mut self, query: &str) -> Self {
        self.timeouts.push(query.to_string());
        self
    }

    /// The whole service is unreachable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockBridgeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BridgeClient for MockBridgeClient {
    async fn lookup(&self, query: &str) -> Result<Vec<BridgeCandidate>, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(BridgeError::Unavailable("mock bridge down".to_string()));
        }
        if self.timeouts.iter().any(|q| q == query) {
            return Err(BridgeError::Timeout);
        }
        Ok(self.responses.get(query).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BridgeError::Timeout.is_retryable());
        assert!(BridgeError::Status { status: 503, message: String::new() }.is_retryable());
        assert!(!BridgeError::Status { status: 404, message: String::new() }.is_retryable());
        assert!(BridgeError::Status { status: 404, message: String::new() }.is_definitive_miss());
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let mock = MockBridgeClient::new().with(
            "glucose",
            vec![BridgeCandidate {
                target_id: "CHEBI:17234".to_string(),
                target_name: "glucose".to_string(),
                score: Some(0.9),
            }],
        );
        assert_eq!(mock.lookup("glucose").await.unwrap().len(), 1);
        assert!(mock.lookup("missing").await.unwrap().is_empty());
        assert_eq!(mock.call_count(), 2);
    }
}
