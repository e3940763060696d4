use crate::submission::http::{build_client, non_empty, read_json, send_error};
use async_trait::async_trait;
use common::domain::{Collaborator, ContentStore, SubmissionError};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud";

#[derive(Debug, Clone)]
pub struct PinataSettings {
    pub api_url: String,
    pub api_key: String,
    pub secret_api_key: String,
    pub request_timeout: Duration,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pins documents to IPFS through the Pinata JSON pinning API
#[derive(Debug, Clone)]
pub struct PinataContentStore {
    client: reqwest::Client,
    pin_url: String,
    api_key: String,
    secret_api_key: String,
    request_timeout: Duration,
}

impl PinataContentStore {
    pub fn new(settings: PinataSettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(settings.request_timeout)?,
            pin_url: format!(
                "{}/pinning/pinJSONToIPFS",
                settings.api_url.trim_end_matches('/')
            ),
            api_key: settings.api_key,
            secret_api_key: settings.secret_api_key,
            request_timeout: settings.request_timeout,
        })
    }
}

#[async_trait]
impl ContentStore for PinataContentStore {
    async fn upload(&self, document: &serde_json::Value) -> Result<String, SubmissionError> {
        debug!(url = %self.pin_url, "pinning document");

        let response = self
            .client
            .post(&self.pin_url)
            .header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.secret_api_key)
            .json(document)
            .send()
            .await
            .map_err(|e| send_error(Collaborator::ObjectStore, self.request_timeout, e))?;

        let pinned: PinResponse = read_json(Collaborator::ObjectStore, response).await?;
        non_empty(Collaborator::ObjectStore, "IpfsHash", pinned.ipfs_hash)
    }

    fn mode(&self) -> &'static str {
        "pinata"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::test_server;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    fn settings(api_url: String) -> PinataSettings {
        PinataSettings {
            api_url,
            api_key: "key".to_string(),
            secret_api_key: "secret".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn pin(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let authorized = headers.get("pinata_api_key").is_some_and(|v| v == "key")
            && headers
                .get("pinata_secret_api_key")
                .is_some_and(|v| v == "secret");
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid credentials"})),
            );
        }
        // Echo the device so the test can see the document arrived as the body
        let device = body["device_id"].as_str().unwrap_or("none").to_string();
        (
            StatusCode::OK,
            Json(json!({
                "IpfsHash": format!("Qm{}", device),
                "PinSize": 120,
                "Timestamp": "2025-03-01T12:30:00Z"
            })),
        )
    }

    fn router() -> Router {
        Router::new().route("/pinning/pinJSONToIPFS", post(pin))
    }

    #[tokio::test]
    async fn test_upload_returns_ipfs_hash() {
        let base = test_server::spawn(router()).await;
        let store = PinataContentStore::new(settings(format!("{}/", base))).unwrap();

        let cid = store.upload(&json!({"device_id": "dev1"})).await.unwrap();

        assert_eq!(cid, "Qmdev1");
        assert_eq!(store.mode(), "pinata");
    }

    #[tokio::test]
    async fn test_upload_with_bad_credentials_is_rejected() {
        let base = test_server::spawn(router()).await;
        let store = PinataContentStore::new(PinataSettings {
            secret_api_key: "wrong".to_string(),
            ..settings(base)
        })
        .unwrap();

        let err = store
            .upload(&json!({"device_id": "dev1"}))
            .await
            .unwrap_err();

        let SubmissionError::Rejected { status, body, .. } = err else {
            panic!("expected rejection, got {:?}", err);
        };
        assert_eq!(status, 401);
        assert!(body.contains("invalid credentials"));
    }

    #[tokio::test]
    async fn test_upload_with_unexpected_body_is_invalid_response() {
        let router = Router::new().route(
            "/pinning/pinJSONToIPFS",
            post(|| async { Json(json!({"hash": "QmMissingField"})) }),
        );
        let base = test_server::spawn(router).await;
        let store = PinataContentStore::new(settings(base)).unwrap();

        let err = store.upload(&json!({})).await.unwrap_err();
        assert!(matches!(err, SubmissionError::InvalidResponse { .. }));
        assert_eq!(err.collaborator(), Collaborator::ObjectStore);
    }

    #[tokio::test]
    async fn test_upload_to_unreachable_host_is_transport_error() {
        let store = PinataContentStore::new(settings("http://127.0.0.1:1".to_string())).unwrap();

        let err = store.upload(&json!({})).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Transport { .. }));
    }
}
