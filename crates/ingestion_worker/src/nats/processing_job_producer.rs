use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, ProcessingJob, ProcessingJobProducer};
use common::nats::{StreamPublisher, trace_headers};
use std::sync::Arc;
use tracing::{debug, info};

/// Publishes processing jobs to the JetStream job stream
pub struct JetStreamProcessingJobProducer {
    publisher: Arc<dyn StreamPublisher>,
    subject: String,
}

impl JetStreamProcessingJobProducer {
    pub fn new(publisher: Arc<dyn StreamPublisher>, subject: String) -> Self {
        info!(subject = %subject, "Created processing job producer");
        Self { publisher, subject }
    }
}

#[async_trait]
impl ProcessingJobProducer for JetStreamProcessingJobProducer {
    async fn publish_job(&self, job: &ProcessingJob) -> DomainResult<()> {
        let payload = job.encode()?;

        debug!(
            subject = %self.subject,
            reading_id = job.reading_id,
            size_bytes = payload.len(),
            "Publishing processing job"
        );

        self.publisher
            .publish(&self.subject, trace_headers(), payload.into())
            .await
            .map_err(|source| DomainError::JobPublishError {
                reading_id: job.reading_id,
                source,
            })?;

        debug!(reading_id = job.reading_id, "Processing job accepted by stream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use async_nats::HeaderMap;
    use common::nats::MockStreamPublisher;

    #[tokio::test]
    async fn test_publish_job_encodes_wire_format() {
        let mut mock_publisher = MockStreamPublisher::new();
        mock_publisher
            .expect_publish()
            .withf(|subject: &str, _headers: &HeaderMap, payload: &Bytes| {
                let body: serde_json::Value = serde_json::from_slice(payload).unwrap();
                subject == "processing_jobs.process_sensor_data"
                    && body["function"] == "process_sensor_data"
                    && body["sensor_data_id"] == 17
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let producer = JetStreamProcessingJobProducer::new(
            Arc::new(mock_publisher),
            "processing_jobs.process_sensor_data".to_string(),
        );

        assert!(producer.publish_job(&ProcessingJob::new(17)).await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_job_failure_names_reading() {
        let mut mock_publisher = MockStreamPublisher::new();
        mock_publisher
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let producer = JetStreamProcessingJobProducer::new(
            Arc::new(mock_publisher),
            "processing_jobs.process_sensor_data".to_string(),
        );

        let result = producer.publish_job(&ProcessingJob::new(9)).await;
        match result {
            Err(DomainError::JobPublishError { reading_id, .. }) => assert_eq!(reading_id, 9),
            other => panic!("expected JobPublishError, got {:?}", other),
        }
    }
}
