use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Booking conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulingError {
    /// Errors a re-delivered job may recover from. Conflicts, validation
    /// failures and missing records are final for a given job.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulingError::Storage(_) | SchedulingError::Notification(_)
        )
    }
}
