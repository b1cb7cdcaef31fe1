use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::ReplyAction;

/// Queue contract of the scheduling pipeline. Field names are part of the
/// wire format shared with other consumers; change them only with a
/// migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum SchedulingJob {
    /// A blocking appointment was cancelled; try to backfill the interval
    /// from the waitlist.
    ProcessCancelledSlot {
        cancelled_slot_start_utc: DateTime<Utc>,
        cancelled_slot_end_utc: DateTime<Utc>,
        provider_id: Uuid,
        type_id: Uuid,
    },
    /// A waitlist candidate holds a tentative appointment; ask them to
    /// confirm and arm the timeout.
    ConfirmWaitlistBooking {
        appointment_id: Uuid,
        waitlist_entry_id: Uuid,
    },
    /// Delayed check: cancel the offer if it is still tentative.
    WaitlistConfirmationTimeout {
        appointment_id: Uuid,
        waitlist_entry_id: Uuid,
    },
}

impl SchedulingJob {
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulingJob::ProcessCancelledSlot { .. } => "process_cancelled_slot",
            SchedulingJob::ConfirmWaitlistBooking { .. } => "confirm_waitlist_booking",
            SchedulingJob::WaitlistConfirmationTimeout { .. } => "waitlist_confirmation_timeout",
        }
    }
}

/// Envelope persisted alongside each job; retry metadata survives worker
/// crashes because it lives in the queue, not in worker memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub job: SchedulingJob,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest instant the job may run; `None` means immediately.
    pub run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Result of one waitlist match attempt for a freed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Top candidate now holds a tentative appointment.
    Offered {
        appointment_id: Uuid,
        waitlist_entry_id: Uuid,
    },
    /// Nobody on the waitlist wants this interval.
    NoCandidate,
    /// A concurrent booking took the interval first; the entry stays
    /// unprocessed for the next cancellation.
    LostRace,
}

/// Result of a confirmation-timeout check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Still tentative at fire time: cancelled, interval re-released.
    Expired,
    /// The appointment left `tentative` before the timeout; nothing to do.
    AlreadyResolved,
}

/// Interpretation of an inbound patient reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub action: ReplyAction,
    pub appointment_id: Option<Uuid>,
}
