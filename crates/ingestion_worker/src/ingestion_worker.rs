use crate::domain::{OutboxRelay, OutboxRelayConfig, ReadingIngestionService};
use crate::mqtt::{MqttSettings, RumqttcConnector, TelemetrySubscriber};
use crate::nats::JetStreamProcessingJobProducer;
use common::domain::{ProcessingJobOutbox, SensorReadingRepository};
use common::nats::NatsClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct IngestionWorkerConfig {
    pub mqtt: MqttSettings,
    pub telemetry_topic: String,
    pub reconnect_delay: Duration,
    pub jobs_subject: String,
    pub outbox_relay: OutboxRelayConfig,
}

/// Ingestion side of the pipeline: the telemetry subscriber and the outbox relay
pub struct IngestionWorker {
    subscriber: TelemetrySubscriber,
    relay: OutboxRelay,
}

impl IngestionWorker {
    pub fn new<R>(
        repository: Arc<R>,
        nats_client: &NatsClient,
        config: IngestionWorkerConfig,
    ) -> Self
    where
        R: SensorReadingRepository + ProcessingJobOutbox + 'static,
    {
        debug!(topic = %config.telemetry_topic, "initializing ingestion worker");

        let producer = Arc::new(JetStreamProcessingJobProducer::new(
            nats_client.publisher(),
            config.jobs_subject,
        ));

        let ingestion = Arc::new(ReadingIngestionService::new(
            repository.clone(),
            repository.clone(),
            producer.clone(),
        ));

        let subscriber = TelemetrySubscriber::new(
            Arc::new(RumqttcConnector::new(config.mqtt)),
            ingestion,
            config.telemetry_topic,
            config.reconnect_delay,
        );

        let relay = OutboxRelay::new(repository, producer, config.outbox_relay);

        Self { subscriber, relay }
    }

    pub fn subscriber(&self) -> TelemetrySubscriber {
        self.subscriber.clone()
    }

    pub fn outbox_relay(&self) -> OutboxRelay {
        self.relay.clone()
    }
}
