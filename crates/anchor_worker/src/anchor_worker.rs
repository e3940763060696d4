use crate::domain::ReadingProcessingService;
use crate::nats::ProcessingJobConsumerService;
use anyhow::Result;
use common::domain::{ContentStore, LedgerAnchor, SensorReadingRepository};
use common::nats::{
    ConsumeLogging, ConsumeLoggingLayer, ConsumeTracing, ConsumeTracingLayer, NatsClient,
    QueueConsumer, QueueConsumerConfig,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

type ProcessingJobLayeredService = ConsumeTracing<ConsumeLogging<ProcessingJobConsumerService>>;

/// A named process ready to be handed to the runner
pub type WorkerProcess = (
    String,
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>,
);

#[derive(Debug, Clone)]
pub struct AnchorWorkerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub jobs_subject: String,
    /// Independent consumer loops sharing the durable consumer
    pub workers: usize,
    pub batch_size: usize,
    pub batch_wait: Duration,
    pub max_deliveries: i64,
    pub ack_wait: Duration,
    pub retry_delay: Duration,
    pub collaborator_timeout: Duration,
}

/// Processing side of the pipeline: job consumers running the submission pipeline
pub struct AnchorWorker {
    consumers: Vec<QueueConsumer<ProcessingJobLayeredService>>,
}

impl AnchorWorker {
    pub async fn new(
        repository: Arc<dyn SensorReadingRepository>,
        content_store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerAnchor>,
        nats_client: &NatsClient,
        config: AnchorWorkerConfig,
    ) -> Result<Self> {
        info!(
            content_store = content_store.mode(),
            ledger = ledger.mode(),
            workers = config.workers,
            "initializing anchor worker"
        );

        let domain_service = Arc::new(ReadingProcessingService::new(
            repository,
            content_store,
            ledger,
            config.collaborator_timeout,
        ));

        let consumer_config = QueueConsumerConfig {
            stream_name: config.stream_name.clone(),
            consumer_name: config.consumer_name.clone(),
            subject_filter: config.jobs_subject.clone(),
            batch_size: config.batch_size,
            max_wait: config.batch_wait,
            max_deliver: config.max_deliveries,
            ack_wait: config.ack_wait,
        };

        let mut consumers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers.max(1) {
            let service = ServiceBuilder::new()
                .layer(ConsumeTracingLayer)
                .layer(ConsumeLoggingLayer)
                .service(ProcessingJobConsumerService::new(
                    Arc::clone(&domain_service),
                    config.retry_delay,
                ));

            let consumer = QueueConsumer::bind(
                nats_client.consumer_binder(),
                consumer_config.clone(),
                service,
            )
            .await?;
            consumers.push(consumer);
        }

        info!(consumers = consumers.len(), "anchor worker initialized");

        Ok(Self { consumers })
    }

    pub fn into_runner_processes(self) -> Vec<WorkerProcess> {
        self.consumers
            .into_iter()
            .enumerate()
            .map(|(index, consumer)| {
                let process: Box<
                    dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send,
                > = Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }));
                (format!("processing_worker_{}", index), process)
            })
            .collect()
    }
}
