use crate::domain::result::SubmissionError;
use async_trait::async_trait;

/// Content-addressable object store.
///
/// Uploads a JSON document and returns the identifier the store assigned to it.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upload(&self, document: &serde_json::Value) -> Result<String, SubmissionError>;

    /// Short label for logs, e.g. `pinata` or `placeholder`
    fn mode(&self) -> &'static str;
}

/// Append-only ledger.
///
/// Anchors a short text message and returns the ledger's reference for it.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LedgerAnchor: Send + Sync {
    async fn anchor(&self, message: &str) -> Result<String, SubmissionError>;

    /// Short label for logs, e.g. `hedera-relay` or `placeholder`
    fn mode(&self) -> &'static str;
}
