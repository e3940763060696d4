use common::domain::{DomainResult, ProcessingJobOutbox, ProcessingJobProducer, StaleOutboxQuery};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    pub interval: Duration,
    /// Entries younger than this are still owned by the writer's own publish
    pub grace: Duration,
    /// Quiet period after an accepted publish before a still `PENDING`
    /// reading gets a fresh job
    pub redispatch_after: Duration,
    pub batch_size: usize,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            grace: Duration::from_secs(30),
            redispatch_after: Duration::from_secs(900),
            batch_size: 100,
        }
    }
}

impl OutboxRelayConfig {
    fn stale_query(&self) -> StaleOutboxQuery {
        StaleOutboxQuery {
            grace: self.grace,
            redispatch_after: self.redispatch_after,
            limit: self.batch_size,
        }
    }
}

/// Republishes processing jobs for readings that are still `PENDING`: jobs
/// the queue never accepted, and jobs whose deliveries ran out before the
/// reading reached a terminal status.
#[derive(Clone)]
pub struct OutboxRelay {
    outbox: Arc<dyn ProcessingJobOutbox>,
    producer: Arc<dyn ProcessingJobProducer>,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn ProcessingJobOutbox>,
        producer: Arc<dyn ProcessingJobProducer>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            outbox,
            producer,
            config,
        }
    }

    /// Publish one batch of stale entries. Returns how many were dispatched.
    pub async fn relay_once(&self) -> DomainResult<usize> {
        let jobs = self.outbox.list_stale(self.config.stale_query()).await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        debug!(count = jobs.len(), "relaying stale processing jobs");

        let mut dispatched = 0;
        for job in jobs {
            // Stop at the first failure; the queue is most likely unavailable
            self.producer.publish_job(&job).await?;
            self.outbox.mark_dispatched(job.reading_id).await?;
            dispatched += 1;
        }

        info!(dispatched, "relayed stale processing jobs");
        Ok(dispatched)
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_secs = self.config.grace.as_secs(),
            redispatch_after_secs = self.config.redispatch_after.as_secs(),
            "starting outbox relay"
        );

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.relay_once().await {
                Ok(count) if count == self.config.batch_size => {
                    warn!(count, "outbox backlog exceeds one batch");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "outbox relay pass failed"),
            }
        }

        info!("outbox relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        CreateSensorReadingRepoInput, DomainError, FailSensorReadingRepoInput,
        InMemorySensorReadingRepository, MockProcessingJobProducer, ProcessingJob,
        SensorReadingRepository,
    };
    use mockall::Sequence;

    async fn stale_reading(repo: &InMemorySensorReadingRepository) -> i64 {
        let reading = repo
            .create_reading(CreateSensorReadingRepoInput {
                device_id: "dev-1".to_string(),
                temperature: None,
                humidity: None,
                raw_payload: serde_json::json!({}),
            })
            .await
            .unwrap();
        repo.backdate_outbox(reading.id, Duration::from_secs(120))
            .await;
        reading.id
    }

    fn config() -> OutboxRelayConfig {
        OutboxRelayConfig {
            interval: Duration::from_secs(10),
            grace: Duration::from_secs(30),
            redispatch_after: Duration::from_secs(600),
            batch_size: 10,
        }
    }

    #[tokio::test]
    async fn test_relay_publishes_stale_entries_and_marks_them_dispatched() {
        let repo = Arc::new(InMemorySensorReadingRepository::new());
        let first = stale_reading(&repo).await;
        let second = stale_reading(&repo).await;

        let mut producer = MockProcessingJobProducer::new();
        let mut seq = Sequence::new();
        producer
            .expect_publish_job()
            .withf(move |job: &ProcessingJob| job.reading_id == first)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        producer
            .expect_publish_job()
            .withf(move |job: &ProcessingJob| job.reading_id == second)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let relay = OutboxRelay::new(repo.clone(), Arc::new(producer), config());

        assert_eq!(relay.relay_once().await.unwrap(), 2);
        assert_eq!(relay.relay_once().await.unwrap(), 0);
        assert!(repo.has_outbox_entry(first).await);
        assert!(repo.has_outbox_entry(second).await);
    }

    #[tokio::test]
    async fn test_relay_redispatches_reading_left_pending() {
        let repo = Arc::new(InMemorySensorReadingRepository::new());
        let id = stale_reading(&repo).await;
        // Accepted once, then every delivery ran out without finalizing
        repo.mark_dispatched(id).await.unwrap();

        let mut producer = MockProcessingJobProducer::new();
        producer
            .expect_publish_job()
            .withf(move |job: &ProcessingJob| job.reading_id == id)
            .times(1)
            .returning(|_| Ok(()));

        let relay = OutboxRelay::new(repo.clone(), Arc::new(producer), config());

        assert_eq!(relay.relay_once().await.unwrap(), 0);
        repo.backdate_outbox(id, Duration::from_secs(601)).await;
        assert_eq!(relay.relay_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_relay_skips_terminal_readings() {
        let repo = Arc::new(InMemorySensorReadingRepository::new());
        let id = stale_reading(&repo).await;
        repo.fail_reading(FailSensorReadingRepoInput {
            reading_id: id,
            reason: "ledger rejected".to_string(),
        })
        .await
        .unwrap();

        let mut producer = MockProcessingJobProducer::new();
        producer.expect_publish_job().times(0);

        let relay = OutboxRelay::new(repo.clone(), Arc::new(producer), config());

        assert_eq!(relay.relay_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relay_ignores_fresh_entries() {
        let repo = Arc::new(InMemorySensorReadingRepository::new());
        repo.create_reading(CreateSensorReadingRepoInput {
            device_id: "dev-1".to_string(),
            temperature: None,
            humidity: None,
            raw_payload: serde_json::json!({}),
        })
        .await
        .unwrap();

        let mut producer = MockProcessingJobProducer::new();
        producer.expect_publish_job().times(0);

        let relay = OutboxRelay::new(repo.clone(), Arc::new(producer), config());

        assert_eq!(relay.relay_once().await.unwrap(), 0);
        assert_eq!(repo.outbox_len().await, 1);
    }

    #[tokio::test]
    async fn test_relay_stops_at_first_publish_failure() {
        let repo = Arc::new(InMemorySensorReadingRepository::new());
        stale_reading(&repo).await;
        stale_reading(&repo).await;

        let mut producer = MockProcessingJobProducer::new();
        producer.expect_publish_job().times(1).returning(|job| {
            Err(DomainError::JobPublishError {
                reading_id: job.reading_id,
                source: anyhow::anyhow!("stream unavailable"),
            })
        });

        let relay = OutboxRelay::new(repo.clone(), Arc::new(producer), config());

        assert!(relay.relay_once().await.is_err());
        assert_eq!(repo.list_stale(config().stale_query()).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_relays_on_interval_until_cancelled() {
        let repo = Arc::new(InMemorySensorReadingRepository::new());
        stale_reading(&repo).await;

        let mut producer = MockProcessingJobProducer::new();
        producer.expect_publish_job().times(1).returning(|_| Ok(()));

        let relay = OutboxRelay::new(repo.clone(), Arc::new(producer), config());
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(relay.run(ctx.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(repo.list_stale(config().stale_query()).await.unwrap().is_empty());

        ctx.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
