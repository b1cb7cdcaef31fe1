use std::sync::Arc;

use tracing::{debug, info, instrument};

use booking_cell::{BookingRequest, BookingService, FreedSlot, SlotReleaseSink};
use shared_models::{NotificationDispatcher, SchedulingError};
use shared_storage::SchedulingStore;

use crate::error::QueueError;
use crate::models::{MatchOutcome, SchedulingJob};
use crate::services::queue::JobQueue;

/// Backfills freed intervals from the waitlist. Only the single best
/// candidate is attempted per invocation; losing a race against a concurrent
/// direct booking leaves the entry untouched for the next cancellation.
pub struct WaitlistMatcherService<S, N, R, Q> {
    store: Arc<S>,
    booking: Arc<BookingService<S, N, R>>,
    queue: Arc<Q>,
}

impl<S, N, R, Q> WaitlistMatcherService<S, N, R, Q>
where
    S: SchedulingStore + 'static,
    N: NotificationDispatcher + 'static,
    R: SlotReleaseSink + 'static,
    Q: JobQueue,
{
    pub fn new(store: Arc<S>, booking: Arc<BookingService<S, N, R>>, queue: Arc<Q>) -> Self {
        Self {
            store,
            booking,
            queue,
        }
    }

    #[instrument(skip(self), fields(provider_id = %freed.provider_id))]
    pub async fn handle_cancelled_slot(
        &self,
        freed: &FreedSlot,
    ) -> Result<MatchOutcome, QueueError> {
        let candidate = self
            .store
            .best_waitlist_candidate(freed.start_utc, freed.end_utc, freed.type_id)
            .await?;
        let Some(entry) = candidate else {
            debug!(
                "no waitlist candidate for {} - {}",
                freed.start_utc, freed.end_utc
            );
            return Ok(MatchOutcome::NoCandidate);
        };

        let attempt = self
            .booking
            .book(BookingRequest {
                patient_id: entry.patient_id,
                provider_ids: vec![freed.provider_id],
                type_id: freed.type_id,
                start_utc: freed.start_utc,
                end_utc: freed.end_utc,
                tentative: true,
                required_resource_ids: vec![],
                parent_series_id: None,
                contact: entry.contact.clone(),
            })
            .await;

        match attempt {
            Ok(appointment) => {
                self.store.set_waitlist_processed(entry.id, true).await?;
                self.queue
                    .enqueue(SchedulingJob::ConfirmWaitlistBooking {
                        appointment_id: appointment.id,
                        waitlist_entry_id: entry.id,
                    })
                    .await?;
                info!(
                    "waitlist entry {} offered appointment {} for {} - {}",
                    entry.id, appointment.id, freed.start_utc, freed.end_utc
                );
                Ok(MatchOutcome::Offered {
                    appointment_id: appointment.id,
                    waitlist_entry_id: entry.id,
                })
            }
            // The interval was taken while we matched. The entry stays
            // unprocessed; a future cancellation re-triggers matching.
            Err(SchedulingError::Conflict(reason)) => {
                debug!("waitlist match lost a race: {}", reason);
                Ok(MatchOutcome::LostRace)
            }
            Err(e) => Err(e.into()),
        }
    }
}
