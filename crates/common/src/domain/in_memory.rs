use crate::domain::processing_job::ProcessingJob;
use crate::domain::result::DomainResult;
use crate::domain::sensor_reading::{
    CompleteSensorReadingRepoInput, CreateSensorReadingRepoInput, FailSensorReadingRepoInput,
    ProcessingJobOutbox, ReadingStatus, SensorReading, SensorReadingRepository, StaleOutboxQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct OutboxEntry {
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    fn is_due(&self, now: DateTime<Utc>, query: &StaleOutboxQuery) -> bool {
        match self.dispatched_at {
            None => self.created_at <= now - age(query.grace),
            Some(dispatched_at) => dispatched_at <= now - age(query.redispatch_after),
        }
    }

    fn last_published(&self) -> DateTime<Utc> {
        self.dispatched_at.unwrap_or(self.created_at)
    }
}

fn age(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[derive(Default)]
struct State {
    next_id: i64,
    readings: BTreeMap<i64, SensorReading>,
    outbox: BTreeMap<i64, OutboxEntry>,
}

/// Record Store kept in process memory, with the same check-and-set
/// semantics as the Postgres store.
#[derive(Default)]
pub struct InMemorySensorReadingRepository {
    state: Mutex<State>,
}

impl InMemorySensorReadingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn readings(&self) -> Vec<SensorReading> {
        self.state.lock().await.readings.values().cloned().collect()
    }

    pub async fn outbox_len(&self) -> usize {
        self.state.lock().await.outbox.len()
    }

    pub async fn has_outbox_entry(&self, reading_id: i64) -> bool {
        self.state.lock().await.outbox.contains_key(&reading_id)
    }

    /// Age an outbox entry so it is picked up by `list_stale`
    pub async fn backdate_outbox(&self, reading_id: i64, by: Duration) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.outbox.get_mut(&reading_id) {
            entry.created_at -= age(by);
            if let Some(dispatched_at) = entry.dispatched_at.as_mut() {
                *dispatched_at -= age(by);
            }
        }
    }
}

#[async_trait]
impl SensorReadingRepository for InMemorySensorReadingRepository {
    async fn create_reading(
        &self,
        input: CreateSensorReadingRepoInput,
    ) -> DomainResult<SensorReading> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();

        let reading = SensorReading {
            id,
            device_id: input.device_id,
            recorded_at: now,
            temperature: input.temperature,
            humidity: input.humidity,
            raw_payload: input.raw_payload,
            content_address: None,
            ledger_reference: None,
            status: ReadingStatus::Pending,
            failure_reason: None,
            updated_at: now,
        };

        state.readings.insert(id, reading.clone());
        state.outbox.insert(
            id,
            OutboxEntry {
                created_at: now,
                dispatched_at: None,
            },
        );
        Ok(reading)
    }

    async fn get_reading(&self, reading_id: i64) -> DomainResult<Option<SensorReading>> {
        Ok(self.state.lock().await.readings.get(&reading_id).cloned())
    }

    async fn complete_reading(
        &self,
        input: CompleteSensorReadingRepoInput,
    ) -> DomainResult<Option<SensorReading>> {
        let mut state = self.state.lock().await;
        let completed = match state.readings.get_mut(&input.reading_id) {
            Some(reading) if reading.status == ReadingStatus::Pending => {
                reading.content_address = Some(input.content_address);
                reading.ledger_reference = Some(input.ledger_reference);
                reading.status = ReadingStatus::Completed;
                reading.updated_at = Utc::now();
                reading.clone()
            }
            _ => return Ok(None),
        };
        state.outbox.remove(&completed.id);
        Ok(Some(completed))
    }

    async fn fail_reading(
        &self,
        input: FailSensorReadingRepoInput,
    ) -> DomainResult<Option<SensorReading>> {
        let mut state = self.state.lock().await;
        let failed = match state.readings.get_mut(&input.reading_id) {
            Some(reading) if reading.status == ReadingStatus::Pending => {
                reading.status = ReadingStatus::Failed;
                reading.failure_reason = Some(input.reason);
                reading.updated_at = Utc::now();
                reading.clone()
            }
            _ => return Ok(None),
        };
        state.outbox.remove(&failed.id);
        Ok(Some(failed))
    }
}

#[async_trait]
impl ProcessingJobOutbox for InMemorySensorReadingRepository {
    async fn mark_dispatched(&self, reading_id: i64) -> DomainResult<()> {
        if let Some(entry) = self.state.lock().await.outbox.get_mut(&reading_id) {
            entry.dispatched_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_stale(&self, query: StaleOutboxQuery) -> DomainResult<Vec<ProcessingJob>> {
        let state = self.state.lock().await;
        let now = Utc::now();

        let mut stale: Vec<(DateTime<Utc>, i64)> = state
            .outbox
            .iter()
            .filter(|(_, entry)| entry.is_due(now, &query))
            .map(|(id, entry)| (entry.last_published(), *id))
            .collect();
        stale.sort();

        Ok(stale
            .into_iter()
            .take(query.limit)
            .map(|(_, id)| ProcessingJob::new(id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(device_id: &str) -> CreateSensorReadingRepoInput {
        CreateSensorReadingRepoInput {
            device_id: device_id.to_string(),
            temperature: Some(20.0),
            humidity: None,
            raw_payload: json!({"device_id": device_id}),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids_and_outbox_entry() {
        let repo = InMemorySensorReadingRepository::new();
        let first = repo.create_reading(input("a")).await.unwrap();
        let second = repo.create_reading(input("b")).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.status, ReadingStatus::Pending);
        assert_eq!(repo.outbox_len().await, 2);
    }

    #[tokio::test]
    async fn test_complete_only_from_pending() {
        let repo = InMemorySensorReadingRepository::new();
        let reading = repo.create_reading(input("a")).await.unwrap();

        let completed = repo
            .complete_reading(CompleteSensorReadingRepoInput {
                reading_id: reading.id,
                content_address: "cid-1".to_string(),
                ledger_reference: "tx-1".to_string(),
            })
            .await
            .unwrap();
        assert!(completed.is_some());

        let again = repo
            .complete_reading(CompleteSensorReadingRepoInput {
                reading_id: reading.id,
                content_address: "cid-2".to_string(),
                ledger_reference: "tx-2".to_string(),
            })
            .await
            .unwrap();
        assert!(again.is_none());

        let stored = repo.get_reading(reading.id).await.unwrap().unwrap();
        assert_eq!(stored.content_address.as_deref(), Some("cid-1"));
    }

    fn query(limit: usize) -> StaleOutboxQuery {
        StaleOutboxQuery {
            grace: Duration::from_secs(30),
            redispatch_after: Duration::from_secs(600),
            limit,
        }
    }

    #[tokio::test]
    async fn test_list_stale_respects_age_and_limit() {
        let repo = InMemorySensorReadingRepository::new();
        let a = repo.create_reading(input("a")).await.unwrap();
        let b = repo.create_reading(input("b")).await.unwrap();
        repo.create_reading(input("c")).await.unwrap();

        repo.backdate_outbox(a.id, Duration::from_secs(120)).await;
        repo.backdate_outbox(b.id, Duration::from_secs(60)).await;

        let stale = repo.list_stale(query(10)).await.unwrap();
        assert_eq!(stale, vec![ProcessingJob::new(a.id), ProcessingJob::new(b.id)]);

        let limited = repo.list_stale(query(1)).await.unwrap();
        assert_eq!(limited, vec![ProcessingJob::new(a.id)]);
    }

    #[tokio::test]
    async fn test_dispatched_entry_waits_for_redispatch_window() {
        let repo = InMemorySensorReadingRepository::new();
        let reading = repo.create_reading(input("a")).await.unwrap();
        repo.backdate_outbox(reading.id, Duration::from_secs(120)).await;

        repo.mark_dispatched(reading.id).await.unwrap();
        assert!(repo.has_outbox_entry(reading.id).await);
        assert!(repo.list_stale(query(10)).await.unwrap().is_empty());

        repo.backdate_outbox(reading.id, Duration::from_secs(601)).await;
        assert_eq!(
            repo.list_stale(query(10)).await.unwrap(),
            vec![ProcessingJob::new(reading.id)]
        );
    }

    #[tokio::test]
    async fn test_terminal_transition_removes_outbox_entry() {
        let repo = InMemorySensorReadingRepository::new();
        let done = repo.create_reading(input("a")).await.unwrap();
        let failed = repo.create_reading(input("b")).await.unwrap();

        repo.complete_reading(CompleteSensorReadingRepoInput {
            reading_id: done.id,
            content_address: "cid-1".to_string(),
            ledger_reference: "tx-1".to_string(),
        })
        .await
        .unwrap();
        repo.fail_reading(FailSensorReadingRepoInput {
            reading_id: failed.id,
            reason: "ledger rejected".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(repo.outbox_len().await, 0);
    }
}
