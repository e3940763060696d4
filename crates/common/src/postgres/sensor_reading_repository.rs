use crate::domain::{
    CompleteSensorReadingRepoInput, CreateSensorReadingRepoInput, DomainError, DomainResult,
    FailSensorReadingRepoInput, ProcessingJob, ProcessingJobOutbox, ReadingStatus, SensorReading,
    SensorReadingRepository, StaleOutboxQuery, PROCESS_SENSOR_DATA,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::{debug, info};

macro_rules! reading_columns {
    () => {
        "id, device_id, recorded_at, temperature, humidity, raw_payload, \
         content_address, ledger_reference, status, failure_reason, updated_at"
    };
}

/// Sensor reading row as stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct SensorReadingRow {
    pub id: i64,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub raw_payload: serde_json::Value,
    pub content_address: Option<String>,
    pub ledger_reference: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SensorReadingRow {
    fn from_row(row: &Row) -> DomainResult<Self> {
        Ok(Self {
            id: row.try_get("id").map_err(repo_err)?,
            device_id: row.try_get("device_id").map_err(repo_err)?,
            recorded_at: row.try_get("recorded_at").map_err(repo_err)?,
            temperature: row.try_get("temperature").map_err(repo_err)?,
            humidity: row.try_get("humidity").map_err(repo_err)?,
            raw_payload: row.try_get("raw_payload").map_err(repo_err)?,
            content_address: row.try_get("content_address").map_err(repo_err)?,
            ledger_reference: row.try_get("ledger_reference").map_err(repo_err)?,
            status: row.try_get("status").map_err(repo_err)?,
            failure_reason: row.try_get("failure_reason").map_err(repo_err)?,
            updated_at: row.try_get("updated_at").map_err(repo_err)?,
        })
    }
}

impl TryFrom<SensorReadingRow> for SensorReading {
    type Error = DomainError;

    fn try_from(row: SensorReadingRow) -> Result<Self, Self::Error> {
        Ok(SensorReading {
            id: row.id,
            device_id: row.device_id,
            recorded_at: row.recorded_at,
            temperature: row.temperature,
            humidity: row.humidity,
            raw_payload: row.raw_payload,
            content_address: row.content_address,
            ledger_reference: row.ledger_reference,
            status: row.status.parse()?,
            failure_reason: row.failure_reason,
            updated_at: row.updated_at,
        })
    }
}

fn repo_err(e: tokio_postgres::Error) -> DomainError {
    DomainError::RepositoryError(e.into())
}

fn map_reading(row: Option<Row>) -> DomainResult<Option<SensorReading>> {
    row.map(|row| SensorReadingRow::from_row(&row).and_then(SensorReading::try_from))
        .transpose()
}

#[derive(Clone)]
pub struct PostgresSensorReadingRepository {
    client: PostgresClient,
}

impl PostgresSensorReadingRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SensorReadingRepository for PostgresSensorReadingRepository {
    async fn create_reading(
        &self,
        input: CreateSensorReadingRepoInput,
    ) -> DomainResult<SensorReading> {
        debug!(device_id = %input.device_id, "Creating sensor reading in database");

        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        // The reading and its outbox entry commit together or not at all
        let tx = conn.transaction().await.map_err(repo_err)?;

        let row = tx
            .query_one(
                concat!(
                    "INSERT INTO sensor_readings (device_id, temperature, humidity, raw_payload)
                     VALUES ($1, $2, $3, $4)
                     RETURNING ",
                    reading_columns!()
                ),
                &[
                    &input.device_id,
                    &input.temperature,
                    &input.humidity,
                    &input.raw_payload,
                ],
            )
            .await
            .map_err(repo_err)?;

        let reading = SensorReading::try_from(SensorReadingRow::from_row(&row)?)?;

        tx.execute(
            "INSERT INTO processing_job_outbox (reading_id, function) VALUES ($1, $2)",
            &[&reading.id, &PROCESS_SENSOR_DATA],
        )
        .await
        .map_err(repo_err)?;

        tx.commit().await.map_err(repo_err)?;

        info!(
            reading_id = reading.id,
            device_id = %reading.device_id,
            "Sensor reading created in database"
        );
        Ok(reading)
    }

    async fn get_reading(&self, reading_id: i64) -> DomainResult<Option<SensorReading>> {
        debug!(reading_id, "Getting sensor reading from database");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                concat!(
                    "SELECT ",
                    reading_columns!(),
                    " FROM sensor_readings WHERE id = $1"
                ),
                &[&reading_id],
            )
            .await
            .map_err(repo_err)?;

        map_reading(row)
    }

    async fn complete_reading(
        &self,
        input: CompleteSensorReadingRepoInput,
    ) -> DomainResult<Option<SensorReading>> {
        debug!(reading_id = input.reading_id, "Completing sensor reading");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                concat!(
                    "WITH finalized AS (
                         UPDATE sensor_readings
                         SET content_address = $2, ledger_reference = $3, status = $4,
                             updated_at = now()
                         WHERE id = $1 AND status = $5
                         RETURNING ",
                    reading_columns!(),
                    "
                     ), cleared AS (
                         DELETE FROM processing_job_outbox
                         WHERE reading_id IN (SELECT id FROM finalized)
                     )
                     SELECT * FROM finalized"
                ),
                &[
                    &input.reading_id,
                    &input.content_address,
                    &input.ledger_reference,
                    &ReadingStatus::Completed.as_str(),
                    &ReadingStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(repo_err)?;

        map_reading(row)
    }

    async fn fail_reading(
        &self,
        input: FailSensorReadingRepoInput,
    ) -> DomainResult<Option<SensorReading>> {
        debug!(reading_id = input.reading_id, "Failing sensor reading");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                concat!(
                    "WITH finalized AS (
                         UPDATE sensor_readings
                         SET failure_reason = $2, status = $3, updated_at = now()
                         WHERE id = $1 AND status = $4
                         RETURNING ",
                    reading_columns!(),
                    "
                     ), cleared AS (
                         DELETE FROM processing_job_outbox
                         WHERE reading_id IN (SELECT id FROM finalized)
                     )
                     SELECT * FROM finalized"
                ),
                &[
                    &input.reading_id,
                    &input.reason,
                    &ReadingStatus::Failed.as_str(),
                    &ReadingStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(repo_err)?;

        map_reading(row)
    }
}

#[async_trait]
impl ProcessingJobOutbox for PostgresSensorReadingRepository {
    async fn mark_dispatched(&self, reading_id: i64) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.execute(
            "UPDATE processing_job_outbox SET dispatched_at = now() WHERE reading_id = $1",
            &[&reading_id],
        )
        .await
        .map_err(repo_err)?;

        debug!(reading_id, "Outbox entry marked dispatched");
        Ok(())
    }

    async fn list_stale(&self, query: StaleOutboxQuery) -> DomainResult<Vec<ProcessingJob>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                "SELECT reading_id FROM processing_job_outbox
                 WHERE function = $1
                   AND ((dispatched_at IS NULL AND created_at <= now() - make_interval(secs => $2))
                     OR dispatched_at <= now() - make_interval(secs => $3))
                 ORDER BY COALESCE(dispatched_at, created_at)
                 LIMIT $4",
                &[
                    &PROCESS_SENSOR_DATA,
                    &query.grace.as_secs_f64(),
                    &query.redispatch_after.as_secs_f64(),
                    &limit,
                ],
            )
            .await
            .map_err(repo_err)?;

        rows.iter()
            .map(|row| {
                row.try_get::<_, i64>("reading_id")
                    .map(ProcessingJob::new)
                    .map_err(repo_err)
            })
            .collect()
    }
}
