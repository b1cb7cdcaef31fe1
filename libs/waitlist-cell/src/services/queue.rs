use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use booking_cell::{FreedSlot, SlotReleaseSink};
use shared_config::AppConfig;
use shared_models::SchedulingError;

use crate::error::QueueError;
use crate::models::{QueuedJob, SchedulingJob};

const JOB_KEY_PREFIX: &str = "scheduling_job:";
const PENDING_KEY: &str = "waitlist_queue:pending";
const IN_FLIGHT_KEY: &str = "waitlist_queue:in_flight";
const DELAYED_KEY: &str = "waitlist_queue:delayed";
const DEAD_KEY: &str = "waitlist_queue:dead";

const PROMOTE_BATCH: isize = 64;

/// What happened to a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-scheduled with backoff; will be delivered again at `run_at`.
    Retried { run_at: DateTime<Utc> },
    /// Attempts exhausted or error not transient; parked on the dead list.
    DeadLettered,
}

/// Durable, at-least-once job queue with support for delayed delivery.
/// Consumers must tolerate re-delivery of the same job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: SchedulingJob) -> Result<Uuid, QueueError>;

    /// Enqueue with earliest-delivery delay; used for confirmation timeouts.
    async fn enqueue_delayed(
        &self,
        job: SchedulingJob,
        delay: Duration,
    ) -> Result<Uuid, QueueError>;

    /// Next deliverable job, with due delayed jobs promoted first. The
    /// returned envelope already counts this delivery attempt.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedJob>, QueueError>;

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Record a failed attempt: re-schedule with exponential backoff while
    /// `retryable` and attempts remain, otherwise move the job to the dead
    /// list.
    async fn fail(
        &self,
        job: QueuedJob,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError>;
}

pub struct RedisJobQueue {
    pool: Pool,
    max_attempts: u32,
    backoff_base_secs: u64,
}

impl RedisJobQueue {
    pub async fn new(config: &AppConfig) -> Result<Self, QueueError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Pool(e.to_string()))?;

        let mut conn = pool.get().await.map_err(|e| QueueError::Pool(e.to_string()))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("job queue connected");

        Ok(Self {
            pool,
            max_attempts: config.max_job_retries,
            backoff_base_secs: config.retry_backoff_base_secs,
        })
    }

    async fn get_connection(&self) -> Result<Connection, QueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Pool(e.to_string()))
    }

    fn envelope(&self, job: SchedulingJob, run_at: Option<DateTime<Utc>>) -> QueuedJob {
        let now = Utc::now();
        QueuedJob {
            job_id: Uuid::new_v4(),
            job,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: now,
            updated_at: now,
            run_at,
            last_error: None,
        }
    }

    async fn store_job(&self, conn: &mut Connection, job: &QueuedJob) -> Result<(), QueueError> {
        let job_key = format!("{JOB_KEY_PREFIX}{}", job.job_id);
        let job_data = serde_json::to_string(job)?;
        let _: () = conn
            .hset_multiple(
                &job_key,
                &[
                    ("data", job_data.as_str()),
                    ("kind", job.job.kind()),
                    ("updated_at", &job.updated_at.to_rfc3339()),
                ],
            )
            .await?;
        // Job hashes expire after 7 days.
        let _: () = conn.expire(&job_key, 604800).await?;
        Ok(())
    }

    async fn load_job(
        &self,
        conn: &mut Connection,
        job_id: &str,
    ) -> Result<Option<QueuedJob>, QueueError> {
        let job_key = format!("{JOB_KEY_PREFIX}{job_id}");
        let data: Option<String> = conn.hget(&job_key, "data").await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Moves every delayed job whose due time has passed onto the pending
    /// list. Called on each dequeue, so delivery needs no separate timer
    /// process.
    async fn promote_due(&self, conn: &mut Connection) -> Result<(), QueueError> {
        let now = Utc::now().timestamp();
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, "-inf", now, 0, PROMOTE_BATCH)
            .await?;
        for job_id in due {
            let removed: i64 = conn.zrem(DELAYED_KEY, &job_id).await?;
            // Another worker may promote concurrently; only the one that won
            // the ZREM gets to push.
            if removed > 0 {
                let _: () = conn.lpush(PENDING_KEY, &job_id).await?;
                debug!("delayed job {} is due, promoted", job_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: SchedulingJob) -> Result<Uuid, QueueError> {
        let mut conn = self.get_connection().await?;
        let envelope = self.envelope(job, None);
        self.store_job(&mut conn, &envelope).await?;
        let _: () = conn.lpush(PENDING_KEY, envelope.job_id.to_string()).await?;
        debug!("job {} ({}) enqueued", envelope.job_id, envelope.job.kind());
        Ok(envelope.job_id)
    }

    async fn enqueue_delayed(
        &self,
        job: SchedulingJob,
        delay: Duration,
    ) -> Result<Uuid, QueueError> {
        let mut conn = self.get_connection().await?;
        let run_at = Utc::now() + delay;
        let envelope = self.envelope(job, Some(run_at));
        self.store_job(&mut conn, &envelope).await?;
        let _: () = conn
            .zadd(DELAYED_KEY, envelope.job_id.to_string(), run_at.timestamp())
            .await?;
        debug!(
            "job {} ({}) scheduled for {}",
            envelope.job_id,
            envelope.job.kind(),
            run_at
        );
        Ok(envelope.job_id)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.get_connection().await?;
        self.promote_due(&mut conn).await?;

        let job_id: Option<String> = conn.brpoplpush(PENDING_KEY, IN_FLIGHT_KEY, 1.0).await?;
        let Some(job_id) = job_id else {
            return Ok(None);
        };

        match self.load_job(&mut conn, &job_id).await? {
            Some(mut job) => {
                job.attempts += 1;
                job.updated_at = Utc::now();
                self.store_job(&mut conn, &job).await?;
                debug!(
                    "job {} dequeued by {} (attempt {}/{})",
                    job.job_id, worker_id, job.attempts, job.max_attempts
                );
                Ok(Some(job))
            }
            None => {
                // Hash expired while the id sat in the queue; drop the id.
                let _: () = conn.lrem(IN_FLIGHT_KEY, 1, &job_id).await?;
                warn!("job {} has no stored payload, discarded", job_id);
                Ok(None)
            }
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.lrem(IN_FLIGHT_KEY, 1, job_id.to_string()).await?;
        debug!("job {} completed", job_id);
        Ok(())
    }

    async fn fail(
        &self,
        mut job: QueuedJob,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.lrem(IN_FLIGHT_KEY, 1, job.job_id.to_string()).await?;

        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();

        if retryable && job.can_retry() {
            let backoff_secs =
                self.backoff_base_secs.saturating_mul(1 << (job.attempts.saturating_sub(1)).min(16));
            let run_at = Utc::now() + Duration::seconds(backoff_secs as i64);
            job.run_at = Some(run_at);
            self.store_job(&mut conn, &job).await?;
            let _: () = conn
                .zadd(DELAYED_KEY, job.job_id.to_string(), run_at.timestamp())
                .await?;
            info!(
                "job {} failed ({}), retry {}/{} at {}",
                job.job_id, error, job.attempts, job.max_attempts, run_at
            );
            Ok(FailureDisposition::Retried { run_at })
        } else {
            self.store_job(&mut conn, &job).await?;
            let _: () = conn.lpush(DEAD_KEY, job.job_id.to_string()).await?;
            warn!(
                "job {} dead-lettered after {} attempts: {}",
                job.job_id, job.attempts, error
            );
            Ok(FailureDisposition::DeadLettered)
        }
    }
}

#[derive(Default)]
struct MemoryQueueState {
    jobs: HashMap<Uuid, QueuedJob>,
    pending: VecDeque<Uuid>,
    in_flight: HashSet<Uuid>,
    delayed: Vec<Uuid>,
    dead: Vec<Uuid>,
}

/// In-process queue with the same delivery semantics as the Redis one,
/// for tests and single-process runs.
pub struct MemoryJobQueue {
    max_attempts: u32,
    backoff_base_secs: u64,
    state: Mutex<MemoryQueueState>,
}

impl MemoryJobQueue {
    pub fn new(max_attempts: u32, backoff_base_secs: u64) -> Self {
        Self {
            max_attempts,
            backoff_base_secs,
            state: Mutex::new(MemoryQueueState::default()),
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn delayed_jobs(&self) -> Vec<QueuedJob> {
        let state = self.state.lock().await;
        state
            .delayed
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    pub async fn dead_jobs(&self) -> Vec<QueuedJob> {
        let state = self.state.lock().await;
        state
            .dead
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    /// Clears a delayed job's due time so the next dequeue delivers it.
    pub async fn make_due(&self, job_id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.run_at = Some(Utc::now() - Duration::seconds(1));
        }
    }

    fn envelope(&self, job: SchedulingJob, run_at: Option<DateTime<Utc>>) -> QueuedJob {
        let now = Utc::now();
        QueuedJob {
            job_id: Uuid::new_v4(),
            job,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: now,
            updated_at: now,
            run_at,
            last_error: None,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: SchedulingJob) -> Result<Uuid, QueueError> {
        let envelope = self.envelope(job, None);
        let job_id = envelope.job_id;
        let mut state = self.state.lock().await;
        state.jobs.insert(job_id, envelope);
        state.pending.push_back(job_id);
        Ok(job_id)
    }

    async fn enqueue_delayed(
        &self,
        job: SchedulingJob,
        delay: Duration,
    ) -> Result<Uuid, QueueError> {
        let envelope = self.envelope(job, Some(Utc::now() + delay));
        let job_id = envelope.job_id;
        let mut state = self.state.lock().await;
        state.jobs.insert(job_id, envelope);
        state.delayed.push(job_id);
        Ok(job_id)
    }

    async fn dequeue(&self, _worker_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let (due, later): (Vec<Uuid>, Vec<Uuid>) = state.delayed.iter().copied().partition(|id| {
            state
                .jobs
                .get(id)
                .and_then(|j| j.run_at)
                .is_some_and(|run_at| run_at <= now)
        });
        state.delayed = later;
        state.pending.extend(due);

        let Some(job_id) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(job_id);
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&job_id);
        Ok(())
    }

    async fn fail(
        &self,
        mut job: QueuedJob,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&job.job_id);

        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();

        let disposition = if retryable && job.can_retry() {
            let backoff_secs = self
                .backoff_base_secs
                .saturating_mul(1 << (job.attempts.saturating_sub(1)).min(16));
            let run_at = Utc::now() + Duration::seconds(backoff_secs as i64);
            job.run_at = Some(run_at);
            state.delayed.push(job.job_id);
            FailureDisposition::Retried { run_at }
        } else {
            state.dead.push(job.job_id);
            FailureDisposition::DeadLettered
        };
        state.jobs.insert(job.job_id, job);
        Ok(disposition)
    }
}

/// Bridges cancellations into the queue: every freed interval becomes a
/// backfill job.
pub struct QueueReleaseSink<Q> {
    queue: Arc<Q>,
}

impl<Q: JobQueue> QueueReleaseSink<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl<Q: JobQueue> SlotReleaseSink for QueueReleaseSink<Q> {
    async fn slot_released(&self, freed: FreedSlot) -> Result<(), SchedulingError> {
        self.queue
            .enqueue(SchedulingJob::ProcessCancelledSlot {
                cancelled_slot_start_utc: freed.start_utc,
                cancelled_slot_end_utc: freed.end_utc,
                provider_id: freed.provider_id,
                type_id: freed.type_id,
            })
            .await
            .map(|_| ())
            .map_err(|e| SchedulingError::Storage(e.to_string()))
    }
}
