use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Name of the only processing function a job can target
pub const PROCESS_SENSOR_DATA: &str = "process_sensor_data";

/// Queue message instructing a worker to run the submission pipeline for one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessingJob {
    pub reading_id: i64,
}

impl ProcessingJob {
    pub fn new(reading_id: i64) -> Self {
        Self { reading_id }
    }

    pub fn function(&self) -> &'static str {
        PROCESS_SENSOR_DATA
    }

    /// Serialize to the JSON wire format
    pub fn encode(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(&JobMessage {
            function: PROCESS_SENSOR_DATA.to_string(),
            sensor_data_id: self.reading_id,
        })
        .map_err(|e| {
            DomainError::EncodeError(format!("job for reading {}: {}", self.reading_id, e))
        })
    }

    /// Parse a job from the JSON wire format.
    /// Unknown function names are decode errors: no worker can ever handle them.
    pub fn decode(payload: &[u8]) -> DomainResult<Self> {
        let message: JobMessage = serde_json::from_slice(payload)
            .map_err(|e| DomainError::DecodeError(format!("invalid job message: {}", e)))?;

        if message.function != PROCESS_SENSOR_DATA {
            return Err(DomainError::DecodeError(format!(
                "unknown job function '{}'",
                message.function
            )));
        }

        Ok(Self::new(message.sensor_data_id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JobMessage {
    function: String,
    sensor_data_id: i64,
}

/// Trait for submitting processing jobs to the job queue
///
/// Implementations should:
/// - Serialize the job to the wire format
/// - Publish to the durable queue and wait for the queue's acknowledgment
/// - Return error if the queue did not accept the job
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessingJobProducer: Send + Sync {
    async fn publish_job(&self, job: &ProcessingJob) -> DomainResult<()>;
}
