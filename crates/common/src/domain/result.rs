use std::time::Duration;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed message: {0}")]
    DecodeError(String),

    #[error("Broker transport error: {0}")]
    TransportError(String),

    #[error("Could not encode message: {0}")]
    EncodeError(String),

    #[error("Failed to publish processing job for reading {reading_id}: {source}")]
    JobPublishError {
        reading_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// True for failures that a later attempt of the same unit of work may not hit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::TransportError(_)
                | DomainError::JobPublishError { .. }
                | DomainError::Submission(_)
                | DomainError::RepositoryError(_)
        )
    }
}

/// External system a submission was sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    ObjectStore,
    Ledger,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collaborator::ObjectStore => write!(f, "object store"),
            Collaborator::Ledger => write!(f, "ledger"),
        }
    }
}

/// A collaborator call that was attempted and did not produce an identifier.
///
/// An unconfigured collaborator never yields one of these; it is served by a
/// placeholder implementation instead.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("{collaborator} call timed out after {timeout:?}")]
    Timeout {
        collaborator: Collaborator,
        timeout: Duration,
    },

    #[error("{collaborator} transport error: {message}")]
    Transport {
        collaborator: Collaborator,
        message: String,
    },

    #[error("{collaborator} rejected submission with status {status}: {body}")]
    Rejected {
        collaborator: Collaborator,
        status: u16,
        body: String,
    },

    #[error("{collaborator} returned an unusable response: {message}")]
    InvalidResponse {
        collaborator: Collaborator,
        message: String,
    },
}

impl SubmissionError {
    pub fn collaborator(&self) -> Collaborator {
        match self {
            SubmissionError::Timeout { collaborator, .. }
            | SubmissionError::Transport { collaborator, .. }
            | SubmissionError::Rejected { collaborator, .. }
            | SubmissionError::InvalidResponse { collaborator, .. } => *collaborator,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SubmissionError::Timeout { .. })
    }
}
