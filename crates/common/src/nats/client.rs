use crate::nats::traits::{DurableConsumerBinder, MessageBatchSource, StreamPublisher};
use anyhow::{Context, Result, anyhow};
use async_nats::HeaderMap;
use async_nats::jetstream::{
    self, Message,
    consumer::{PullConsumer, pull},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Connection to the job queue server plus its JetStream context
pub struct NatsClient {
    connection: async_nats::Client,
    context: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "opening job queue connection");

        let connection = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .with_context(|| format!("could not reach job queue at {}", url))?;
        let context = jetstream::new(connection.clone());

        info!("job queue connection established");
        Ok(Self {
            connection,
            context,
        })
    }

    /// Declare the job stream, capturing `<stream_name>.*`.
    ///
    /// Jobs stay in the stream until a consumer acknowledges them, so queued
    /// work survives restarts of every worker. An existing stream is reused
    /// as-is.
    pub async fn ensure_stream(&self, stream_name: &str, description: &str) -> Result<()> {
        let wanted_subject = format!("{}.*", stream_name);

        if let Ok(mut existing) = self.context.get_stream(stream_name).await {
            let subjects = existing
                .info()
                .await
                .map(|info| info.config.subjects.clone())
                .unwrap_or_default();
            if !subjects.contains(&wanted_subject) {
                warn!(
                    stream = %stream_name,
                    subjects = ?subjects,
                    expected = %wanted_subject,
                    "existing stream does not capture job subjects"
                );
            }
            debug!(stream = %stream_name, "job stream already declared");
            return Ok(());
        }

        self.context
            .get_or_create_stream(StreamConfig {
                name: stream_name.to_string(),
                description: Some(description.to_string()),
                subjects: vec![wanted_subject],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .with_context(|| format!("could not declare stream {}", stream_name))?;

        info!(stream = %stream_name, "declared job stream");
        Ok(())
    }

    pub fn consumer_binder(&self) -> Arc<dyn DurableConsumerBinder> {
        Arc::new(JetStreamConsumerBinder {
            context: self.context.clone(),
        })
    }

    pub fn publisher(&self) -> Arc<dyn StreamPublisher> {
        Arc::new(JetStreamPublisher {
            context: self.context.clone(),
        })
    }

    /// Push out anything still buffered on the connection
    pub async fn close(&self) -> Result<()> {
        self.connection
            .flush()
            .await
            .context("could not flush job queue connection")
    }
}

struct JetStreamConsumerBinder {
    context: jetstream::Context,
}

#[async_trait]
impl DurableConsumerBinder for JetStreamConsumerBinder {
    async fn bind(
        &self,
        stream_name: &str,
        config: pull::Config,
    ) -> Result<Box<dyn MessageBatchSource>> {
        let Some(durable) = config.durable_name.clone() else {
            return Err(anyhow!("consumer on {} has no durable name", stream_name));
        };

        let consumer = self
            .context
            .get_stream(stream_name)
            .await
            .with_context(|| format!("stream {} is not declared", stream_name))?
            .get_or_create_consumer::<pull::Config>(&durable, config)
            .await
            .with_context(|| format!("could not bind durable consumer {}", durable))?;

        Ok(Box::new(JetStreamBatchSource { consumer }))
    }
}

struct JetStreamBatchSource {
    consumer: PullConsumer,
}

#[async_trait]
impl MessageBatchSource for JetStreamBatchSource {
    async fn next_batch(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Message>> {
        let batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(max_wait)
            .messages()
            .await
            .context("pull request rejected")?;

        // A broken frame only loses that one message; JetStream redelivers it after ack_wait
        let messages: Vec<Message> = batch
            .filter_map(|item| async move {
                item.inspect_err(|e| warn!(error = %e, "skipping unreadable delivery"))
                    .ok()
            })
            .collect()
            .await;

        debug!(count = messages.len(), "pulled batch");
        Ok(messages)
    }
}

struct JetStreamPublisher {
    context: jetstream::Context,
}

#[async_trait]
impl StreamPublisher for JetStreamPublisher {
    #[instrument(skip_all, fields(subject = %subject, bytes = payload.len()))]
    async fn publish(&self, subject: &str, headers: HeaderMap, payload: Bytes) -> Result<()> {
        self.context
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .context("stream refused publish")?
            .await
            .context("stream did not confirm publish")?;
        Ok(())
    }
}
