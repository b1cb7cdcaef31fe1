pub mod error;
pub mod models;
pub mod services;

pub use error::QueueError;
pub use models::{MatchOutcome, QueuedJob, ReplyOutcome, SchedulingJob, TimeoutOutcome};
pub use services::confirmation::ConfirmationService;
pub use services::matcher::WaitlistMatcherService;
pub use services::queue::{
    FailureDisposition, JobQueue, MemoryJobQueue, QueueReleaseSink, RedisJobQueue,
};
pub use services::worker::WaitlistWorkerService;
