use std::sync::Arc;

use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use booking_cell::{FreedSlot, SlotReleaseSink};
use shared_models::NotificationDispatcher;
use shared_storage::SchedulingStore;

use crate::error::QueueError;
use crate::models::{QueuedJob, SchedulingJob};
use crate::services::confirmation::ConfirmationService;
use crate::services::matcher::WaitlistMatcherService;
use crate::services::queue::JobQueue;

const IDLE_SLEEP: Duration = Duration::from_millis(100);
const ERROR_SLEEP: Duration = Duration::from_secs(5);

/// Stateless job consumer: any number of these may run against the same
/// queue across processes. Mutual exclusion for overlapping bookings lives
/// entirely in the storage layer, never here.
pub struct WaitlistWorkerService<S, N, R, Q> {
    worker_id: String,
    concurrency: usize,
    queue: Arc<Q>,
    matcher: Arc<WaitlistMatcherService<S, N, R, Q>>,
    confirmation: Arc<ConfirmationService<S, N, Q>>,
    is_shutdown: tokio::sync::RwLock<bool>,
}

impl<S, N, R, Q> WaitlistWorkerService<S, N, R, Q>
where
    S: SchedulingStore + 'static,
    N: NotificationDispatcher + 'static,
    R: SlotReleaseSink + 'static,
    Q: JobQueue + 'static,
{
    pub fn new(
        worker_id: impl Into<String>,
        concurrency: usize,
        queue: Arc<Q>,
        matcher: Arc<WaitlistMatcherService<S, N, R, Q>>,
        confirmation: Arc<ConfirmationService<S, N, Q>>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            concurrency: concurrency.max(1),
            queue,
            matcher,
            confirmation,
            is_shutdown: tokio::sync::RwLock::new(false),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn start(self: Arc<Self>) -> Result<(), QueueError> {
        info!("starting waitlist worker {}", self.worker_id);

        let mut handles = Vec::with_capacity(self.concurrency);
        for i in 0..self.concurrency {
            let worker = Arc::clone(&self);
            let worker_name = format!("{}-{}", self.worker_id, i);
            handles.push(tokio::spawn(async move {
                worker.worker_loop(worker_name).await
            }));
        }
        futures::future::join_all(handles).await;
        info!("waitlist worker {} stopped", self.worker_id);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("shutting down waitlist worker {}", self.worker_id);
        *self.is_shutdown.write().await = true;
    }

    async fn worker_loop(&self, worker_name: String) {
        debug!("worker loop started: {}", worker_name);
        loop {
            if *self.is_shutdown.read().await {
                debug!("worker {} received shutdown signal", worker_name);
                break;
            }
            match self.queue.dequeue(&worker_name).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.handle(job).await {
                        error!("worker {} could not settle a job: {}", worker_name, e);
                    }
                }
                Ok(None) => tokio::time::sleep(IDLE_SLEEP).await,
                Err(e) => {
                    error!("worker {} failed to dequeue: {}", worker_name, e);
                    tokio::time::sleep(ERROR_SLEEP).await;
                }
            }
        }
        debug!("worker loop ended: {}", worker_name);
    }

    /// Drains everything currently deliverable, then returns the number of
    /// jobs handled. Backfill chains enqueue as they run, so follow-up jobs
    /// are picked up within the same drain.
    pub async fn run_pending(&self) -> Result<u32, QueueError> {
        let mut handled = 0;
        while let Some(job) = self.queue.dequeue(&self.worker_id).await? {
            self.handle(job).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Processes one job and settles it with the queue: completed on
    /// success or when the job can no longer apply, retried with backoff
    /// on transient errors, dead-lettered otherwise.
    async fn handle(&self, job: QueuedJob) -> Result<(), QueueError> {
        let job_id = job.job_id;
        match self.process(&job.job).await {
            Ok(()) => self.queue.complete(job_id).await,
            // A delayed job may refer to rows that moved on or were deleted
            // while it waited; that is a settled outcome, never a retry.
            Err(e) if e.is_no_op() => {
                warn!("job {} no longer applies ({}), completing as no-op", job_id, e);
                self.queue.complete(job_id).await
            }
            Err(e) => {
                let retryable = e.is_transient();
                let disposition = self.queue.fail(job, &e.to_string(), retryable).await?;
                debug!("job {} failed ({}), disposition {:?}", job_id, e, disposition);
                Ok(())
            }
        }
    }

    async fn process(&self, job: &SchedulingJob) -> Result<(), QueueError> {
        match job {
            SchedulingJob::ProcessCancelledSlot {
                cancelled_slot_start_utc,
                cancelled_slot_end_utc,
                provider_id,
                type_id,
            } => {
                let outcome = self
                    .matcher
                    .handle_cancelled_slot(&FreedSlot {
                        start_utc: *cancelled_slot_start_utc,
                        end_utc: *cancelled_slot_end_utc,
                        provider_id: *provider_id,
                        type_id: *type_id,
                    })
                    .await?;
                debug!("cancelled slot processed: {:?}", outcome);
                Ok(())
            }
            SchedulingJob::ConfirmWaitlistBooking {
                appointment_id,
                waitlist_entry_id,
            } => {
                self.confirmation
                    .handle_confirm_job(*appointment_id, *waitlist_entry_id)
                    .await
            }
            SchedulingJob::WaitlistConfirmationTimeout {
                appointment_id,
                waitlist_entry_id,
            } => {
                let outcome = self
                    .confirmation
                    .handle_timeout(*appointment_id, *waitlist_entry_id)
                    .await?;
                debug!("confirmation timeout processed: {:?}", outcome);
                Ok(())
            }
        }
    }
}
