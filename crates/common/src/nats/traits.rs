use anyhow::Result;
use async_nats::HeaderMap;
use async_nats::jetstream::{Message, consumer::pull};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Binds worker loops to a durable pull consumer on a stream.
///
/// Binding is idempotent: every caller naming the same durable consumer shares
/// its delivery state, so several loops can drain one work queue.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DurableConsumerBinder: Send + Sync {
    async fn bind(
        &self,
        stream_name: &str,
        config: pull::Config,
    ) -> Result<Box<dyn MessageBatchSource>>;
}

/// Source of message batches for one bound consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageBatchSource: Send + Sync {
    /// At most `max_messages`, returned once the batch is full or `max_wait` elapses
    async fn next_batch(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Message>>;
}

/// Stream publisher that resolves only once the stream has persisted the message
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StreamPublisher: Send + Sync {
    async fn publish(&self, subject: &str, headers: HeaderMap, payload: Bytes) -> Result<()>;
}
