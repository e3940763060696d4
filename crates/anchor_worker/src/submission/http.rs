use common::domain::{Collaborator, SubmissionError};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Most of a rejection body worth keeping in an error message
const MAX_BODY_IN_ERROR: usize = 512;

pub(crate) fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

pub(crate) fn send_error(
    collaborator: Collaborator,
    timeout: Duration,
    error: reqwest::Error,
) -> SubmissionError {
    if error.is_timeout() {
        SubmissionError::Timeout {
            collaborator,
            timeout,
        }
    } else {
        SubmissionError::Transport {
            collaborator,
            message: error.to_string(),
        }
    }
}

/// Turn a non-2xx response into `Rejected`, otherwise decode the JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(
    collaborator: Collaborator,
    response: Response,
) -> Result<T, SubmissionError> {
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_IN_ERROR {
            let cut = (0..=MAX_BODY_IN_ERROR)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        return Err(SubmissionError::Rejected {
            collaborator,
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| SubmissionError::InvalidResponse {
            collaborator,
            message: e.to_string(),
        })
}

/// Reject empty identifiers returned by a collaborator
pub(crate) fn non_empty(
    collaborator: Collaborator,
    field: &str,
    value: String,
) -> Result<String, SubmissionError> {
    if value.trim().is_empty() {
        return Err(SubmissionError::InvalidResponse {
            collaborator,
            message: format!("empty {}", field),
        });
    }
    Ok(value)
}
