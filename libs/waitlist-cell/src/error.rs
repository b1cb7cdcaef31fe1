use thiserror::Error;

use shared_models::SchedulingError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

impl QueueError {
    /// Whether a re-delivery of the same job could still succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Redis(_) | QueueError::Pool(_) => true,
            QueueError::Scheduling(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Outcomes that settle a job instead of failing it: the rows it
    /// references are gone or already moved on, so redelivery could not
    /// change anything.
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            QueueError::JobNotFound(_)
                | QueueError::Scheduling(
                    SchedulingError::Conflict(_)
                        | SchedulingError::Validation(_)
                        | SchedulingError::NotFound(_)
                )
        )
    }
}
