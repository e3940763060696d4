use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::processing_job::ProcessingJob;

/// Processing state of a sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingStatus {
    Pending,
    Completed,
    Failed,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Pending => "PENDING",
            ReadingStatus::Completed => "COMPLETED",
            ReadingStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadingStatus::Pending)
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReadingStatus::Pending),
            "COMPLETED" => Ok(ReadingStatus::Completed),
            "FAILED" => Ok(ReadingStatus::Failed),
            other => Err(DomainError::RepositoryError(anyhow::anyhow!(
                "unknown reading status '{}'",
                other
            ))),
        }
    }
}

/// One persisted telemetry event from a device
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: i64,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub raw_payload: serde_json::Value,
    pub content_address: Option<String>,
    pub ledger_reference: Option<String>,
    pub status: ReadingStatus,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Repository input for creating a new reading; `id` and `recorded_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSensorReadingRepoInput {
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub raw_payload: serde_json::Value,
}

/// Repository input for the `PENDING -> COMPLETED` transition
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteSensorReadingRepoInput {
    pub reading_id: i64,
    pub content_address: String,
    pub ledger_reference: String,
}

/// Repository input for the `PENDING -> FAILED` transition
#[derive(Debug, Clone, PartialEq)]
pub struct FailSensorReadingRepoInput {
    pub reading_id: i64,
    pub reason: String,
}

/// Record Store for sensor readings.
///
/// Implementations must:
/// - create the reading and its processing job outbox entry atomically
/// - only transition readings that are still `PENDING`
/// - remove the outbox entry in the same statement that makes a reading terminal
/// - use a short-lived connection per call
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SensorReadingRepository: Send + Sync {
    /// Persist a new `PENDING` reading together with its outbox entry
    async fn create_reading(
        &self,
        input: CreateSensorReadingRepoInput,
    ) -> DomainResult<SensorReading>;

    async fn get_reading(&self, reading_id: i64) -> DomainResult<Option<SensorReading>>;

    /// Set both identifiers, mark `COMPLETED` and drop the outbox entry.
    /// Returns `None` when the reading does not exist or is no longer `PENDING`.
    async fn complete_reading(
        &self,
        input: CompleteSensorReadingRepoInput,
    ) -> DomainResult<Option<SensorReading>>;

    /// Mark `FAILED` with a reason and drop the outbox entry.
    /// Returns `None` when the reading does not exist or is no longer `PENDING`.
    async fn fail_reading(
        &self,
        input: FailSensorReadingRepoInput,
    ) -> DomainResult<Option<SensorReading>>;
}

/// Selects outbox entries whose job has to be published again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleOutboxQuery {
    /// Age after which a job the queue never accepted is republished
    pub grace: Duration,
    /// Time since the last accepted publish after which a reading still
    /// `PENDING` gets a fresh job; must outlast every delivery of the old one
    pub redispatch_after: Duration,
    pub limit: usize,
}

/// Outbox of processing jobs written in the same transaction as their reading.
///
/// An entry lives until its reading is terminal, so a job whose deliveries
/// ran out while the reading was still `PENDING` is eventually republished.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessingJobOutbox: Send + Sync {
    /// Record that the queue accepted the entry's job
    async fn mark_dispatched(&self, reading_id: i64) -> DomainResult<()>;

    /// Entries due for another publish, least recently published first
    async fn list_stale(&self, query: StaleOutboxQuery) -> DomainResult<Vec<ProcessingJob>>;
}
