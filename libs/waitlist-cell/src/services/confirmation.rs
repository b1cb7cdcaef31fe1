use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_models::{
    Appointment, AppointmentStatus, NotificationDispatcher, NotificationMode, ReplyAction,
};
use shared_storage::SchedulingStore;

use crate::error::QueueError;
use crate::models::{ReplyOutcome, SchedulingJob, TimeoutOutcome};
use crate::services::queue::JobQueue;

/// Drives the confirm-or-timeout protocol for waitlist offers. Every write
/// is a compare-and-set keyed on `tentative`, so re-delivered jobs and
/// racing replies collapse into no-ops instead of double transitions.
pub struct ConfirmationService<S, N, Q> {
    store: Arc<S>,
    notifier: Arc<N>,
    queue: Arc<Q>,
    timeout: Duration,
}

impl<S, N, Q> ConfirmationService<S, N, Q>
where
    S: SchedulingStore,
    N: NotificationDispatcher,
    Q: JobQueue,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, queue: Arc<Q>, timeout_secs: i64) -> Self {
        Self {
            store,
            notifier,
            queue,
            timeout: Duration::seconds(timeout_secs),
        }
    }

    /// Asks the offered patient to confirm and arms the timeout. The
    /// notification is awaited here: without it the patient cannot react,
    /// so a failure should surface and let the queue retry the whole job.
    #[instrument(skip(self))]
    pub async fn handle_confirm_job(
        &self,
        appointment_id: Uuid,
        waitlist_entry_id: Uuid,
    ) -> Result<(), QueueError> {
        self.notifier
            .send_appointment_notification(appointment_id, NotificationMode::ConfirmWaitlist)
            .await?;
        self.queue
            .enqueue_delayed(
                SchedulingJob::WaitlistConfirmationTimeout {
                    appointment_id,
                    waitlist_entry_id,
                },
                self.timeout,
            )
            .await?;
        info!(
            "confirmation requested for appointment {}, timeout in {}s",
            appointment_id,
            self.timeout.num_seconds()
        );
        Ok(())
    }

    /// Fires when the confirmation window elapses. Only an appointment that
    /// is still tentative gets cancelled; anything else means the patient
    /// (or another worker) already resolved it.
    #[instrument(skip(self))]
    pub async fn handle_timeout(
        &self,
        appointment_id: Uuid,
        waitlist_entry_id: Uuid,
    ) -> Result<TimeoutOutcome, QueueError> {
        let cancelled = self
            .store
            .transition_status(
                appointment_id,
                &[AppointmentStatus::Tentative],
                AppointmentStatus::Cancelled,
            )
            .await?;

        match cancelled {
            None => {
                debug!(
                    "appointment {} already resolved before timeout",
                    appointment_id
                );
                Ok(TimeoutOutcome::AlreadyResolved)
            }
            Some(appointment) => {
                info!(
                    "waitlist offer {} expired, appointment {} cancelled",
                    waitlist_entry_id, appointment_id
                );
                self.release_interval(&appointment).await?;
                Ok(TimeoutOutcome::Expired)
            }
        }
    }

    /// Interprets an inbound patient reply against their most recent
    /// tentative appointment: leading `y` confirms, leading `n` declines and
    /// re-releases the interval, anything else is left alone.
    #[instrument(skip(self, body))]
    pub async fn handle_reply(&self, phone: &str, body: &str) -> Result<ReplyOutcome, QueueError> {
        let Some(appointment) = self.store.latest_tentative_for_phone(phone).await? else {
            debug!("reply from {} matches no tentative appointment", phone);
            return Ok(ReplyOutcome {
                action: ReplyAction::Unrecognized,
                appointment_id: None,
            });
        };

        let lead = body.trim().chars().next().map(|c| c.to_ascii_lowercase());
        match lead {
            Some('y') => {
                let confirmed = self
                    .store
                    .transition_status(
                        appointment.id,
                        &[AppointmentStatus::Tentative],
                        AppointmentStatus::Confirmed,
                    )
                    .await?;
                // A reply that loses the race against the timeout (or a
                // concurrent reply) changed nothing and must not claim it did.
                match confirmed {
                    Some(_) => Ok(ReplyOutcome {
                        action: ReplyAction::Confirmed,
                        appointment_id: Some(appointment.id),
                    }),
                    None => {
                        debug!("appointment {} moved before the reply landed", appointment.id);
                        Ok(ReplyOutcome {
                            action: ReplyAction::Unrecognized,
                            appointment_id: Some(appointment.id),
                        })
                    }
                }
            }
            Some('n') => {
                let cancelled = self
                    .store
                    .transition_status(
                        appointment.id,
                        &[AppointmentStatus::Tentative],
                        AppointmentStatus::Cancelled,
                    )
                    .await?;
                match cancelled {
                    Some(appointment) => {
                        self.release_interval(&appointment).await?;
                        Ok(ReplyOutcome {
                            action: ReplyAction::Cancelled,
                            appointment_id: Some(appointment.id),
                        })
                    }
                    None => {
                        debug!("appointment {} moved before the reply landed", appointment.id);
                        Ok(ReplyOutcome {
                            action: ReplyAction::Unrecognized,
                            appointment_id: Some(appointment.id),
                        })
                    }
                }
            }
            _ => Ok(ReplyOutcome {
                action: ReplyAction::Unrecognized,
                appointment_id: Some(appointment.id),
            }),
        }
    }

    /// Recursive backfill: the freed interval goes back through the queue,
    /// so the next waitlist candidate gets its chance. Bounded only by
    /// waitlist exhaustion.
    async fn release_interval(&self, appointment: &Appointment) -> Result<(), QueueError> {
        for provider_id in &appointment.provider_ids {
            self.queue
                .enqueue(SchedulingJob::ProcessCancelledSlot {
                    cancelled_slot_start_utc: appointment.start_utc,
                    cancelled_slot_end_utc: appointment.end_utc,
                    provider_id: *provider_id,
                    type_id: appointment.type_id,
                })
                .await?;
        }
        Ok(())
    }
}
