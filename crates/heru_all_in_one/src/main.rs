mod config;

use anchor_worker::{
    AnchorWorker, HederaRelayLedgerAnchor, PinataContentStore, PlaceholderContentStore,
    PlaceholderLedgerAnchor,
};
use common::domain::{ContentStore, LedgerAnchor};
use common::nats::NatsClient;
use common::postgres::{PostgresClient, PostgresSensorReadingRepository};
use common::telemetry::init_telemetry;
use config::ServiceConfig;
use heru_runner::Runner;
use ingestion_worker::IngestionWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const JOBS_STREAM_DESCRIPTION: &str = "Sensor reading processing jobs";

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.check() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let telemetry = match init_telemetry(&config.telemetry_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        mqtt_host = %config.mqtt_host,
        mqtt_topic = %config.mqtt_topic,
        "Starting heru-all-in-one service"
    );
    debug!("Configuration: {:?}", redacted(&config));

    let repository = match initialize_record_store(&config).await {
        Ok(repository) => repository,
        Err(e) => {
            error!("Failed to initialize record store: {:#}", e);
            std::process::exit(1);
        }
    };

    let nats_client = match initialize_job_queue(&config).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to initialize job queue: {:#}", e);
            std::process::exit(1);
        }
    };

    let (content_store, ledger) = match build_collaborators(&config) {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!("Failed to build submission collaborators: {:#}", e);
            std::process::exit(1);
        }
    };
    info!(
        content_store = content_store.mode(),
        ledger = ledger.mode(),
        "Submission collaborators ready"
    );

    let ingestion_worker = IngestionWorker::new(
        repository.clone(),
        &nats_client,
        config.ingestion_worker_config(),
    );

    let anchor_worker = match AnchorWorker::new(
        repository,
        content_store,
        ledger,
        &nats_client,
        config.anchor_worker_config(),
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize anchor worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let restart_delay = Duration::from_secs(config.supervisor_restart_delay_secs);
    let subscriber = ingestion_worker.subscriber();
    let relay = ingestion_worker.outbox_relay();

    let mut runner = Runner::new()
        .with_supervised_process("telemetry_subscriber", restart_delay, move |ctx| {
            subscriber.clone().run(ctx)
        })
        .with_supervised_process("outbox_relay", restart_delay, move |ctx| {
            relay.clone().run(ctx)
        });

    for (name, process) in anchor_worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    let closing_client = nats_client.clone();
    runner
        .with_closer(move || async move {
            info!("Flushing NATS connection");
            closing_client.close().await
        })
        .with_closer(move || async move {
            info!("Shutting down telemetry");
            if let Some(guard) = telemetry {
                guard.shutdown();
            }
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;
}

async fn initialize_record_store(
    config: &ServiceConfig,
) -> anyhow::Result<Arc<PostgresSensorReadingRepository>> {
    let client = PostgresClient::connect(&config.postgres_config())?;
    client.ping().await?;
    info!("Connected to PostgreSQL");

    client.ensure_schema().await?;
    info!("Record store schema is up to date");

    Ok(Arc::new(PostgresSensorReadingRepository::new(client)))
}

async fn initialize_job_queue(config: &ServiceConfig) -> anyhow::Result<NatsClient> {
    let client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.nats_connect_timeout_secs),
    )
    .await?;
    client
        .ensure_stream(&config.processing_jobs_stream, JOBS_STREAM_DESCRIPTION)
        .await?;
    Ok(client)
}

fn build_collaborators(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<dyn ContentStore>, Arc<dyn LedgerAnchor>)> {
    let content_store: Arc<dyn ContentStore> = match config.pinata_settings() {
        Some(settings) => Arc::new(PinataContentStore::new(settings)?),
        None => {
            info!("Pinata credentials not set, using placeholder content addresses");
            Arc::new(PlaceholderContentStore::new())
        }
    };

    let ledger: Arc<dyn LedgerAnchor> = match config.hedera_settings() {
        Some(settings) => Arc::new(HederaRelayLedgerAnchor::new(settings)?),
        None => {
            info!("Hedera operator not set, using placeholder ledger references");
            Arc::new(PlaceholderLedgerAnchor::new())
        }
    };

    Ok((content_store, ledger))
}

/// Copy of the configuration that is safe to log
fn redacted(config: &ServiceConfig) -> ServiceConfig {
    let mask = |value: &str| {
        if value.is_empty() {
            String::new()
        } else {
            "***".to_string()
        }
    };

    ServiceConfig {
        mqtt_password: mask(&config.mqtt_password),
        postgres_password: mask(&config.postgres_password),
        pinata_api_key: mask(&config.pinata_api_key),
        pinata_secret_api_key: mask(&config.pinata_secret_api_key),
        hedera_private_key: mask(&config.hedera_private_key),
        ..config.clone()
    }
}
