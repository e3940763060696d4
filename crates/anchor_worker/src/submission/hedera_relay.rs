use crate::submission::http::{build_client, non_empty, read_json, send_error};
use async_trait::async_trait;
use common::domain::{Collaborator, LedgerAnchor, SubmissionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const HEDERA_ACCOUNT_HEADER: &str = "X-Hedera-Account-Id";

#[derive(Debug, Clone)]
pub struct HederaRelaySettings {
    pub relay_url: String,
    pub topic_id: String,
    pub account_id: String,
    pub private_key: String,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct SubmitMessageRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct SubmitMessageResponse {
    transaction_id: String,
}

/// Submits consensus messages to a Hedera topic through an HTTP relay that
/// signs on behalf of the operator account
#[derive(Debug, Clone)]
pub struct HederaRelayLedgerAnchor {
    client: reqwest::Client,
    messages_url: String,
    account_id: String,
    private_key: String,
    request_timeout: Duration,
}

impl HederaRelayLedgerAnchor {
    pub fn new(settings: HederaRelaySettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(settings.request_timeout)?,
            messages_url: format!(
                "{}/topics/{}/messages",
                settings.relay_url.trim_end_matches('/'),
                settings.topic_id
            ),
            account_id: settings.account_id,
            private_key: settings.private_key,
            request_timeout: settings.request_timeout,
        })
    }
}

#[async_trait]
impl LedgerAnchor for HederaRelayLedgerAnchor {
    async fn anchor(&self, message: &str) -> Result<String, SubmissionError> {
        debug!(
            url = %self.messages_url,
            account_id = %self.account_id,
            "submitting topic message"
        );

        let response = self
            .client
            .post(&self.messages_url)
            .header(HEDERA_ACCOUNT_HEADER, &self.account_id)
            .bearer_auth(&self.private_key)
            .json(&SubmitMessageRequest { message })
            .send()
            .await
            .map_err(|e| send_error(Collaborator::Ledger, self.request_timeout, e))?;

        let submitted: SubmitMessageResponse = read_json(Collaborator::Ledger, response).await?;
        non_empty(Collaborator::Ledger, "transaction_id", submitted.transaction_id)
    }

    fn mode(&self) -> &'static str {
        "hedera-relay"
    }
}
