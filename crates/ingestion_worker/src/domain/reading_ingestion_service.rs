use common::domain::{
    DomainResult, ProcessingJob, ProcessingJobOutbox, ProcessingJobProducer, SensorReading,
    SensorReadingRepository, TelemetryDocument,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Ingestion Writer: persists a decoded telemetry document as a `PENDING`
/// reading and hands its processing job to the queue.
///
/// The reading and its outbox entry are written in one transaction. If the
/// queue does not accept the job, the entry stays undispatched and the outbox
/// relay publishes it after the grace period.
pub struct ReadingIngestionService {
    repository: Arc<dyn SensorReadingRepository>,
    outbox: Arc<dyn ProcessingJobOutbox>,
    producer: Arc<dyn ProcessingJobProducer>,
}

impl ReadingIngestionService {
    pub fn new(
        repository: Arc<dyn SensorReadingRepository>,
        outbox: Arc<dyn ProcessingJobOutbox>,
        producer: Arc<dyn ProcessingJobProducer>,
    ) -> Self {
        Self {
            repository,
            outbox,
            producer,
        }
    }

    /// Returns an error only when the reading could not be persisted.
    #[instrument(skip(self, document), fields(device_id = %document.device_id))]
    pub async fn ingest(&self, document: TelemetryDocument) -> DomainResult<SensorReading> {
        let reading = self
            .repository
            .create_reading(document.into_create_input())
            .await?;

        let job = ProcessingJob::new(reading.id);
        if let Err(e) = self.producer.publish_job(&job).await {
            warn!(
                reading_id = reading.id,
                error = %e,
                "processing job not accepted, leaving it to the outbox relay"
            );
            return Ok(reading);
        }

        // An unmarked entry only means the relay publishes the job a second time
        if let Err(e) = self.outbox.mark_dispatched(reading.id).await {
            warn!(
                reading_id = reading.id,
                error = %e,
                "failed to mark outbox entry dispatched"
            );
        } else {
            debug!(reading_id = reading.id, "outbox entry marked dispatched");
        }

        info!(reading_id = reading.id, "reading ingested and job enqueued");
        Ok(reading)
    }
}
