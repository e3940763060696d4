use crate::nats::{ConsumeRequest, ConsumeResponse, DurableConsumerBinder, MessageBatchSource};
use anyhow::{Context, Result};
use async_nats::jetstream::{AckKind, Message, consumer::AckPolicy, consumer::pull};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Pause after a failed pull before asking the server again
const PULL_BACKOFF: Duration = Duration::from_secs(1);

/// Durable pull consumer settings
#[derive(Debug, Clone)]
pub struct QueueConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Total deliveries per message, including the first. Non-positive means unlimited.
    pub max_deliver: i64,
    /// How long the server waits for a settlement before redelivering. A pulled
    /// batch is handled sequentially, so this has to cover the whole batch.
    pub ack_wait: Duration,
}

impl QueueConsumerConfig {
    fn pull_config(&self) -> pull::Config {
        pull::Config {
            name: Some(self.consumer_name.clone()),
            durable_name: Some(self.consumer_name.clone()),
            filter_subject: self.subject_filter.clone(),
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            ..Default::default()
        }
    }

    /// Delivery ceiling as seen by handlers
    pub fn max_deliveries(&self) -> u64 {
        match u64::try_from(self.max_deliver) {
            Ok(max) if max > 0 => max,
            _ => u64::MAX,
        }
    }
}

/// Drains a durable consumer, handing each message to a Tower service.
///
/// The service sees an owned `ConsumeRequest` and answers with a
/// `ConsumeResponse`; the consumer turns that answer into an ack or a nak.
/// Messages in a batch are handled one after another.
pub struct QueueConsumer<S> {
    source: Box<dyn MessageBatchSource>,
    config: QueueConsumerConfig,
    service: S,
}

impl<S> QueueConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn bind(
        binder: Arc<dyn DurableConsumerBinder>,
        config: QueueConsumerConfig,
        service: S,
    ) -> Result<Self> {
        let source = binder
            .bind(&config.stream_name, config.pull_config())
            .await
            .context("failed to bind queue consumer")?;

        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter = %config.subject_filter,
            max_deliver = config.max_deliver,
            "queue consumer bound"
        );

        Ok(Self {
            source,
            config,
            service,
        })
    }

    pub fn config(&self) -> &QueueConsumerConfig {
        &self.config
    }

    /// Pull and handle batches until `ctx` is cancelled.
    ///
    /// Cancellation is only observed between messages, so a job already handed
    /// to the service runs to completion.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(consumer = %self.config.consumer_name, "queue consumer started");

        let (batch_size, max_wait) = (self.config.batch_size, self.config.max_wait);

        while !ctx.is_cancelled() {
            let batch = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                batch = self.source.next_batch(batch_size, max_wait) => batch,
            };

            match batch {
                Ok(messages) => self.handle_batch(messages).await,
                Err(e) => {
                    warn!(
                        consumer = %self.config.consumer_name,
                        error = %e,
                        "pull failed, backing off"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(PULL_BACKOFF) => {}
                    }
                }
            }
        }

        info!(consumer = %self.config.consumer_name, "queue consumer stopped");
        Ok(())
    }

    async fn handle_batch(&mut self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        debug!(count = messages.len(), "handling batch");

        for message in messages {
            let request = self.request_for(&message);
            let response = self.dispatch(request).await;
            settle(&message, &response).await;
        }
    }

    fn request_for(&self, message: &Message) -> ConsumeRequest {
        // Messages without stream metadata are treated as first deliveries
        let attempt = message
            .info()
            .ok()
            .and_then(|info| u64::try_from(info.delivered).ok())
            .unwrap_or(1);

        ConsumeRequest::new(
            message.subject.to_string(),
            Bytes::copy_from_slice(&message.payload),
            message.headers.clone(),
        )
        .with_delivery(attempt, self.config.max_deliveries())
    }

    async fn dispatch(&mut self, request: ConsumeRequest) -> ConsumeResponse {
        let subject = request.subject.clone();
        let outcome = match self.service.ready().await {
            Ok(service) => service.call(request).await,
            Err(e) => Err(e),
        };

        outcome.unwrap_or_else(|e| {
            error!(subject = %subject, error = %e, "handler errored, requesting redelivery");
            ConsumeResponse::nak(e.to_string())
        })
    }
}

async fn settle(message: &Message, response: &ConsumeResponse) {
    let kind = match response {
        ConsumeResponse::Ack => AckKind::Ack,
        ConsumeResponse::Nak { delay, .. } => AckKind::Nak(*delay),
    };

    if let Err(e) = message.ack_with(kind).await {
        // The server will redeliver after ack_wait
        error!(
            subject = %message.subject,
            ack = response.is_ack(),
            error = %e,
            "could not settle message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::traits::{MockDurableConsumerBinder, MockMessageBatchSource};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    #[derive(Clone)]
    struct StaticService(Result<ConsumeResponse, &'static str>);

    impl Service<ConsumeRequest> for StaticService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            let outcome = self.0.clone().map_err(|e| anyhow::anyhow!(e));
            Box::pin(async move { outcome })
        }
    }

    fn config(max_deliver: i64) -> QueueConsumerConfig {
        QueueConsumerConfig {
            stream_name: "jobs".to_string(),
            consumer_name: "worker".to_string(),
            subject_filter: "jobs.run".to_string(),
            batch_size: 10,
            max_wait: Duration::from_secs(5),
            max_deliver,
            ack_wait: Duration::from_secs(60),
        }
    }

    fn binder_with(source: MockMessageBatchSource) -> Arc<dyn DurableConsumerBinder> {
        let mut binder = MockDurableConsumerBinder::new();
        binder
            .expect_bind()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(source)));
        Arc::new(binder)
    }

    #[tokio::test]
    async fn test_bind_requests_durable_explicit_ack_consumer() {
        let mut binder = MockDurableConsumerBinder::new();
        binder
            .expect_bind()
            .withf(|stream: &str, cfg: &pull::Config| {
                stream == "jobs"
                    && cfg.durable_name.as_deref() == Some("worker")
                    && cfg.ack_policy == AckPolicy::Explicit
                    && cfg.max_deliver == 5
                    && cfg.ack_wait == Duration::from_secs(60)
                    && cfg.filter_subject == "jobs.run"
            })
            .times(1)
            .returning(|_, _| Ok(Box::new(MockMessageBatchSource::new())));

        let consumer = QueueConsumer::bind(
            Arc::new(binder),
            config(5),
            StaticService(Ok(ConsumeResponse::Ack)),
        )
        .await
        .unwrap();

        assert_eq!(consumer.config().max_deliveries(), 5);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let mut binder = MockDurableConsumerBinder::new();
        binder
            .expect_bind()
            .returning(|_, _| Err(anyhow::anyhow!("stream jobs is not declared")));

        let result = QueueConsumer::bind(
            Arc::new(binder),
            config(5),
            StaticService(Ok(ConsumeResponse::Ack)),
        )
        .await;

        let message = format!("{:#}", result.err().unwrap());
        assert!(message.contains("failed to bind queue consumer"));
        assert!(message.contains("not declared"));
    }

    #[test]
    fn test_non_positive_max_deliver_is_unlimited() {
        assert_eq!(config(-1).max_deliveries(), u64::MAX);
        assert_eq!(config(0).max_deliveries(), u64::MAX);
        assert_eq!(config(3).max_deliveries(), 3);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_nak() {
        let mut consumer = QueueConsumer::bind(
            binder_with(MockMessageBatchSource::new()),
            config(5),
            StaticService(Err("boom")),
        )
        .await
        .unwrap();

        let response = consumer
            .dispatch(ConsumeRequest::new("jobs.run".to_string(), Bytes::new(), None))
            .await;

        assert_eq!(response, ConsumeResponse::nak("boom"));
    }

    #[tokio::test]
    async fn test_run_exits_when_cancelled_before_pulling() {
        let mut source = MockMessageBatchSource::new();
        source.expect_next_batch().never();

        let consumer = QueueConsumer::bind(
            binder_with(source),
            config(5),
            StaticService(Ok(ConsumeResponse::Ack)),
        )
        .await
        .unwrap();

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(consumer.run(ctx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_pulling_after_failed_pull() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        let mut source = MockMessageBatchSource::new();
        let counter = pulls.clone();
        let stopper = ctx.clone();
        source.expect_next_batch().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow::anyhow!("no responders"));
            }
            stopper.cancel();
            Ok(vec![])
        });

        let consumer = QueueConsumer::bind(
            binder_with(source),
            config(5),
            StaticService(Ok(ConsumeResponse::Ack)),
        )
        .await
        .unwrap();

        consumer.run(ctx).await.unwrap();
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }
}
