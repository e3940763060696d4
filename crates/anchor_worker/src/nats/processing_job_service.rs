use crate::domain::{ProcessingAttempt, ProcessingOutcome, ReadingProcessingService};
use common::domain::ProcessingJob;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tracing::{debug, error, warn};

/// Tower service for processing individual `ProcessingJob` messages.
///
/// This service:
/// 1. Decodes the JSON job (undecodable jobs are acked and dropped)
/// 2. Runs the submission pipeline through `ReadingProcessingService`
/// 3. Acks finished jobs and naks retryable failures with a redelivery delay
#[derive(Clone)]
pub struct ProcessingJobConsumerService {
    domain_service: Arc<ReadingProcessingService>,
    retry_delay: Duration,
}

impl ProcessingJobConsumerService {
    pub fn new(domain_service: Arc<ReadingProcessingService>, retry_delay: Duration) -> Self {
        Self {
            domain_service,
            retry_delay,
        }
    }
}

impl Service<ConsumeRequest> for ProcessingJobConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let domain_service = Arc::clone(&self.domain_service);
        let retry_delay = self.retry_delay;

        Box::pin(async move {
            // Redelivery cannot fix a malformed job
            let job = match ProcessingJob::decode(&req.payload) {
                Ok(job) => job,
                Err(e) => {
                    error!(
                        error = %e,
                        subject = %req.subject,
                        "dropping undecodable processing job"
                    );
                    return Ok(ConsumeResponse::ack());
                }
            };

            let attempt = ProcessingAttempt::new(req.delivery_attempt, req.is_final_delivery());

            match domain_service.process_reading(job.reading_id, attempt).await {
                Ok(outcome) => {
                    debug!(
                        reading_id = job.reading_id,
                        outcome = ?outcome,
                        "processing job handled"
                    );
                    if let ProcessingOutcome::Failed { reason } = &outcome {
                        error!(
                            reading_id = job.reading_id,
                            attempts = req.delivery_attempt,
                            reason = %reason,
                            "reading marked failed after final delivery"
                        );
                    }
                    Ok(ConsumeResponse::ack())
                }
                // Past the last delivery the reading's outbox entry brings the job back
                Err(e) if e.is_retryable() => {
                    warn!(
                        error = %e,
                        reading_id = job.reading_id,
                        attempt = req.delivery_attempt,
                        max_deliveries = req.max_deliveries,
                        final_delivery = req.is_final_delivery(),
                        "processing failed, requesting redelivery"
                    );
                    Ok(ConsumeResponse::nak_with_delay(e.to_string(), retry_delay))
                }
                Err(e) => {
                    error!(
                        error = %e,
                        reading_id = job.reading_id,
                        "processing failed permanently, dropping job"
                    );
                    Ok(ConsumeResponse::ack())
                }
            }
        })
    }
}
