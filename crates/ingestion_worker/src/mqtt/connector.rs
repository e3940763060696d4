use async_trait::async_trait;
use bytes::Bytes;
use common::domain::DomainResult;

/// One publish received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Opens broker sessions. Every call yields a brand new connection.
///
/// Errors are `DomainError::TransportError`.
#[async_trait]
pub trait TelemetryConnector: Send + Sync {
    async fn connect(&self) -> DomainResult<Box<dyn TelemetrySession>>;
}

/// A live broker connection
#[async_trait]
pub trait TelemetrySession: Send {
    /// Subscribe and wait until the broker confirms the subscription
    async fn subscribe(&mut self, topic: &str) -> DomainResult<()>;

    /// Wait for the next publish. A transport error ends the session.
    async fn next_message(&mut self) -> DomainResult<TelemetryMessage>;

    async fn disconnect(&mut self);
}
