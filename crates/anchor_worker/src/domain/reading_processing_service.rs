use crate::domain::{anchor_message, submission_document};
use common::domain::{
    Collaborator, CompleteSensorReadingRepoInput, ContentStore, DomainResult,
    FailSensorReadingRepoInput, LedgerAnchor, SensorReadingRepository, SubmissionError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How a processing job for one reading ended
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    /// Both identifiers were recorded and the reading is `COMPLETED`
    Completed {
        content_address: String,
        ledger_reference: String,
    },
    /// Another delivery already finished the reading; nothing was submitted or changed
    AlreadyTerminal,
    /// The reading no longer exists
    NotFound,
    /// Collaborators kept failing and this was the last attempt; the reading is `FAILED`
    Failed { reason: String },
}

/// Delivery context of the job being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingAttempt {
    pub number: u64,
    pub is_final: bool,
}

impl ProcessingAttempt {
    pub fn new(number: u64, is_final: bool) -> Self {
        Self { number, is_final }
    }
}

/// Domain service that runs the submission pipeline for a single reading
///
/// Flow:
/// 1. Load the reading; a missing or already finished reading ends the job
/// 2. Upload the canonical document to the content store
/// 3. Anchor the returned content address on the ledger
/// 4. Finalize the reading as `COMPLETED` (check-and-set from `PENDING`)
///
/// A collaborator failure leaves the reading `PENDING` and is returned so the
/// job is redelivered, except on the final attempt where the reading is marked
/// `FAILED` instead.
pub struct ReadingProcessingService {
    repository: Arc<dyn SensorReadingRepository>,
    content_store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerAnchor>,
    collaborator_timeout: Duration,
}

impl ReadingProcessingService {
    pub fn new(
        repository: Arc<dyn SensorReadingRepository>,
        content_store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerAnchor>,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            content_store,
            ledger,
            collaborator_timeout,
        }
    }

    #[instrument(skip(self), fields(attempt = attempt.number, final_attempt = attempt.is_final))]
    pub async fn process_reading(
        &self,
        reading_id: i64,
        attempt: ProcessingAttempt,
    ) -> DomainResult<ProcessingOutcome> {
        let Some(reading) = self.repository.get_reading(reading_id).await? else {
            info!(reading_id, "reading not found, dropping job");
            return Ok(ProcessingOutcome::NotFound);
        };

        if reading.status.is_terminal() {
            info!(
                reading_id,
                status = %reading.status,
                "reading already processed, skipping submission"
            );
            return Ok(ProcessingOutcome::AlreadyTerminal);
        }

        let identifiers = match self.submit(&submission_document(&reading)).await {
            Ok(identifiers) => identifiers,
            Err(e) if attempt.is_final => {
                warn!(
                    reading_id,
                    collaborator = %e.collaborator(),
                    error = %e,
                    "submission failed on final attempt, marking reading failed"
                );
                return self.fail(reading_id, e.to_string()).await;
            }
            Err(e) => {
                warn!(
                    reading_id,
                    collaborator = %e.collaborator(),
                    error = %e,
                    "submission failed, reading stays pending"
                );
                return Err(e.into());
            }
        };

        let (content_address, ledger_reference) = identifiers;
        let completed = self
            .repository
            .complete_reading(CompleteSensorReadingRepoInput {
                reading_id,
                content_address: content_address.clone(),
                ledger_reference: ledger_reference.clone(),
            })
            .await?;

        match completed {
            Some(_) => {
                info!(
                    reading_id,
                    content_address = %content_address,
                    ledger_reference = %ledger_reference,
                    "reading completed"
                );
                Ok(ProcessingOutcome::Completed {
                    content_address,
                    ledger_reference,
                })
            }
            None => self.lost_race(reading_id).await,
        }
    }

    async fn submit(
        &self,
        document: &serde_json::Value,
    ) -> Result<(String, String), SubmissionError> {
        let content_address = bounded(
            Collaborator::ObjectStore,
            self.collaborator_timeout,
            self.content_store.upload(document),
        )
        .await?;
        debug!(
            content_address = %content_address,
            mode = self.content_store.mode(),
            "document uploaded"
        );

        let ledger_reference = bounded(
            Collaborator::Ledger,
            self.collaborator_timeout,
            self.ledger.anchor(&anchor_message(&content_address)),
        )
        .await?;
        debug!(
            ledger_reference = %ledger_reference,
            mode = self.ledger.mode(),
            "content address anchored"
        );

        Ok((content_address, ledger_reference))
    }

    async fn fail(&self, reading_id: i64, reason: String) -> DomainResult<ProcessingOutcome> {
        let failed = self
            .repository
            .fail_reading(FailSensorReadingRepoInput {
                reading_id,
                reason: reason.clone(),
            })
            .await?;

        match failed {
            Some(_) => Ok(ProcessingOutcome::Failed { reason }),
            None => self.lost_race(reading_id).await,
        }
    }

    /// The check-and-set found the reading missing or no longer `PENDING`
    async fn lost_race(&self, reading_id: i64) -> DomainResult<ProcessingOutcome> {
        match self.repository.get_reading(reading_id).await? {
            Some(reading) => {
                debug!(
                    reading_id,
                    status = %reading.status,
                    "reading finalized by another delivery, keeping existing values"
                );
                Ok(ProcessingOutcome::AlreadyTerminal)
            }
            None => Ok(ProcessingOutcome::NotFound),
        }
    }
}

/// Bound a collaborator call; expiry is reported as `SubmissionError::Timeout`
async fn bounded<T, F>(
    collaborator: Collaborator,
    timeout: Duration,
    call: F,
) -> Result<T, SubmissionError>
where
    F: Future<Output = Result<T, SubmissionError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| SubmissionError::Timeout {
            collaborator,
            timeout,
        })?
}
