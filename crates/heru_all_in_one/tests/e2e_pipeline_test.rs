#![cfg(feature = "integration-tests")]

use anchor_worker::{
    AnchorWorker, AnchorWorkerConfig, PlaceholderContentStore, PlaceholderLedgerAnchor,
};
use anyhow::Result;
use common::domain::{
    ProcessingJob, ProcessingJobProducer, ReadingStatus, SensorReading, SensorReadingRepository,
};
use common::nats::NatsClient;
use common::postgres::{PostgresClient, PostgresConfig, PostgresSensorReadingRepository};
use ingestion_worker::{
    IngestionWorker, IngestionWorkerConfig, JetStreamProcessingJobProducer, MqttSettings,
    OutboxRelayConfig,
};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};
use testcontainers_modules::postgres::Postgres;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const JOBS_STREAM: &str = "processing_jobs";
const JOBS_SUBJECT: &str = "processing_jobs.process_sensor_data";
const TOPIC: &str = "heru/sensors/#";

/// Custom NATS image with JetStream enabled
#[derive(Debug, Clone)]
struct NatsWithJetStream {
    ports: Vec<ContainerPort>,
}

impl Default for NatsWithJetStream {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(4222)],
        }
    }
}

impl Image for NatsWithJetStream {
    fn name(&self) -> &str {
        "nats"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(3)]
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<std::borrow::Cow<'_, str>>> {
        vec!["--js"]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

/// Mosquitto 1.6 listens on all interfaces and accepts anonymous clients without a config file
#[derive(Debug, Clone)]
struct Mosquitto {
    ports: Vec<ContainerPort>,
}

impl Default for Mosquitto {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(1883)],
        }
    }
}

impl Image for Mosquitto {
    fn name(&self) -> &str {
        "eclipse-mosquitto"
    }

    fn tag(&self) -> &str {
        "1.6"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(2)]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

struct Pipeline {
    _postgres: ContainerAsync<Postgres>,
    _nats: ContainerAsync<NatsWithJetStream>,
    _mosquitto: ContainerAsync<Mosquitto>,
    repository: Arc<PostgresSensorReadingRepository>,
    nats_client: Arc<NatsClient>,
    mqtt_host: String,
    mqtt_port: u16,
    ctx: CancellationToken,
}

/// Start the containers and run the ingestion and processing sides with placeholder collaborators
async fn start_pipeline() -> Result<Pipeline> {
    let (postgres, nats, mosquitto) = tokio::join!(
        Postgres::default().start(),
        NatsWithJetStream::default().start(),
        Mosquitto::default().start()
    );
    let postgres = postgres?;
    let nats = nats?;
    let mosquitto = mosquitto?;

    let pg_host = postgres.get_host().await?;
    let pg_port = postgres.get_host_port_ipv4(5432).await?;
    let pg_client =
        PostgresClient::connect(&PostgresConfig::local(pg_host.to_string(), pg_port))?;
    pg_client.ensure_schema().await?;
    let repository = Arc::new(PostgresSensorReadingRepository::new(pg_client));

    let nats_url = format!(
        "nats://{}:{}",
        nats.get_host().await?,
        nats.get_host_port_ipv4(4222).await?
    );
    let nats_client = Arc::new(NatsClient::connect(&nats_url, Duration::from_secs(10)).await?);
    nats_client
        .ensure_stream(JOBS_STREAM, "Sensor reading processing jobs")
        .await?;

    let mqtt_host = mosquitto.get_host().await?.to_string();
    let mqtt_port = mosquitto.get_host_port_ipv4(1883).await?;

    let ingestion = IngestionWorker::new(
        repository.clone(),
        &nats_client,
        IngestionWorkerConfig {
            mqtt: MqttSettings {
                host: mqtt_host.clone(),
                port: mqtt_port,
                client_id: "heru-e2e-ingestion".to_string(),
                ..Default::default()
            },
            telemetry_topic: TOPIC.to_string(),
            reconnect_delay: Duration::from_secs(1),
            jobs_subject: JOBS_SUBJECT.to_string(),
            outbox_relay: OutboxRelayConfig::default(),
        },
    );

    let anchor = AnchorWorker::new(
        repository.clone(),
        Arc::new(PlaceholderContentStore::new()),
        Arc::new(PlaceholderLedgerAnchor::new()),
        &nats_client,
        AnchorWorkerConfig {
            stream_name: JOBS_STREAM.to_string(),
            consumer_name: "processing-worker".to_string(),
            jobs_subject: JOBS_SUBJECT.to_string(),
            workers: 1,
            batch_size: 2,
            batch_wait: Duration::from_secs(1),
            max_deliveries: 5,
            ack_wait: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            collaborator_timeout: Duration::from_secs(5),
        },
    )
    .await?;

    let ctx = CancellationToken::new();
    tokio::spawn(ingestion.subscriber().run(ctx.clone()));
    for (_, process) in anchor.into_runner_processes() {
        tokio::spawn(process(ctx.clone()));
    }

    // Let the subscriber reach the Consuming state
    sleep(Duration::from_secs(2)).await;

    Ok(Pipeline {
        _postgres: postgres,
        _nats: nats,
        _mosquitto: mosquitto,
        repository,
        nats_client,
        mqtt_host,
        mqtt_port,
        ctx,
    })
}

/// Publish payloads as a device would, in order, with QoS 1
async fn publish(pipeline: &Pipeline, messages: &[(&str, Vec<u8>)]) -> Result<()> {
    let mut options =
        MqttOptions::new("heru-e2e-device", &pipeline.mqtt_host, pipeline.mqtt_port);
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let driver = tokio::spawn(async move { while eventloop.poll().await.is_ok() {} });

    for (topic, payload) in messages {
        client
            .publish(*topic, QoS::AtLeastOnce, false, payload.clone())
            .await?;
    }

    sleep(Duration::from_secs(1)).await;
    client.disconnect().await?;
    driver.abort();
    Ok(())
}

/// Poll until the reading reaches a terminal status
async fn wait_for_terminal(
    repository: &PostgresSensorReadingRepository,
    reading_id: i64,
) -> Result<SensorReading> {
    for _ in 0..60 {
        if let Some(reading) = repository.get_reading(reading_id).await? {
            if reading.status.is_terminal() {
                return Ok(reading);
            }
        }
        sleep(Duration::from_millis(500)).await;
    }
    anyhow::bail!("reading {} never reached a terminal status", reading_id)
}

#[tokio::test]
async fn test_published_telemetry_is_stored_and_anchored() -> Result<()> {
    let pipeline = start_pipeline().await?;

    publish(
        &pipeline,
        &[
            (
                "heru/sensors/dev-1",
                json!({"device_id": "dev-1", "temperature": 21.5, "humidity": 40})
                    .to_string()
                    .into_bytes(),
            ),
            // Malformed messages are dropped without tearing down the subscription
            ("heru/sensors/dev-2", b"not json".to_vec()),
            ("heru/sensors/unknown", b"{}".to_vec()),
        ],
    )
    .await?;

    let first = wait_for_terminal(&pipeline.repository, 1).await?;
    assert_eq!(first.device_id, "dev-1");
    assert_eq!(first.temperature, Some(21.5));
    assert_eq!(first.humidity, Some(40.0));
    assert_eq!(first.status, ReadingStatus::Completed);
    let cid = first.content_address.clone().unwrap();
    assert!(cid.starts_with("mock_cid_"));
    assert!(
        first
            .ledger_reference
            .as_deref()
            .is_some_and(|r| r.starts_with("mock_hedera_hash_"))
    );

    let second = wait_for_terminal(&pipeline.repository, 2).await?;
    assert_eq!(second.device_id, "unknown");
    assert_eq!(second.temperature, None);
    assert_eq!(second.humidity, None);
    assert_eq!(second.status, ReadingStatus::Completed);
    assert!(second.content_address.is_some());
    assert!(second.ledger_reference.is_some());

    // Only the two decodable messages produced readings
    assert!(pipeline.repository.get_reading(3).await?.is_none());

    // A redelivered job leaves the completed reading untouched
    let producer = JetStreamProcessingJobProducer::new(
        pipeline.nats_client.publisher(),
        JOBS_SUBJECT.to_string(),
    );
    producer.publish_job(&ProcessingJob::new(1)).await?;
    // A job for a reading that never existed is dropped
    producer.publish_job(&ProcessingJob::new(9999)).await?;
    sleep(Duration::from_secs(3)).await;

    let after = pipeline.repository.get_reading(1).await?.unwrap();
    assert_eq!(after, first);
    assert!(pipeline.repository.get_reading(9999).await?.is_none());

    pipeline.ctx.cancel();
    Ok(())
}
