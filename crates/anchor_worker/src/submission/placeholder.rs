use async_trait::async_trait;
use common::domain::{ContentStore, LedgerAnchor, SubmissionError};
use sha2::{Digest, Sha256};

pub const PLACEHOLDER_CID_PREFIX: &str = "mock_cid_";
pub const PLACEHOLDER_LEDGER_PREFIX: &str = "mock_hedera_hash_";

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content store used when no object store credentials are configured.
///
/// Derives the address from the document itself, so the same reading always
/// gets the same address.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderContentStore;

impl PlaceholderContentStore {
    pub fn new() -> Self {
        Self
    }

    pub fn address_for(document: &serde_json::Value) -> String {
        // serde_json objects are key-ordered, so the text form is canonical
        let canonical = document.to_string();
        format!("{}{}", PLACEHOLDER_CID_PREFIX, sha256_hex(canonical.as_bytes()))
    }
}

#[async_trait]
impl ContentStore for PlaceholderContentStore {
    async fn upload(&self, document: &serde_json::Value) -> Result<String, SubmissionError> {
        Ok(Self::address_for(document))
    }

    fn mode(&self) -> &'static str {
        "placeholder"
    }
}

/// Ledger used when no ledger operator credentials are configured
#[derive(Debug, Default, Clone)]
pub struct PlaceholderLedgerAnchor;

impl PlaceholderLedgerAnchor {
    pub fn new() -> Self {
        Self
    }

    pub fn reference_for(message: &str) -> String {
        format!("{}{}", PLACEHOLDER_LEDGER_PREFIX, sha256_hex(message.as_bytes()))
    }
}

#[async_trait]
impl LedgerAnchor for PlaceholderLedgerAnchor {
    async fn anchor(&self, message: &str) -> Result<String, SubmissionError> {
        Ok(Self::reference_for(message))
    }

    fn mode(&self) -> &'static str {
        "placeholder"
    }
}
