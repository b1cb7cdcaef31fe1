use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::RecurrenceExpander;
use shared_models::{
    Appointment, AppointmentStatus, NewAppointment, NotificationDispatcher, NotificationMode,
    RecurrenceSeries, SchedulingError,
};
use shared_storage::SchedulingStore;

use crate::models::{
    BookingRequest, FreedSlot, OccurrenceOutcome, OccurrenceResult, SeriesBookingRequest,
};

/// Receives intervals freed by cancellations. The production implementation
/// enqueues a backfill job; tests substitute a recording stub.
#[async_trait]
pub trait SlotReleaseSink: Send + Sync {
    async fn slot_released(&self, freed: FreedSlot) -> Result<(), SchedulingError>;
}

/// The conflict-checked write path. All mutual exclusion lives in
/// [`SchedulingStore::try_insert_appointment`]; this service validates,
/// writes once, and never retries a conflict itself — callers recompute
/// availability and come back with a fresh candidate.
pub struct BookingService<S, N, R> {
    store: Arc<S>,
    notifier: Arc<N>,
    release: Arc<R>,
}

impl<S, N, R> BookingService<S, N, R>
where
    S: SchedulingStore + 'static,
    N: NotificationDispatcher + 'static,
    R: SlotReleaseSink + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, release: Arc<R>) -> Self {
        Self {
            store,
            notifier,
            release,
        }
    }

    /// Books `[start_utc, end_utc)` for the requested providers, or fails
    /// with [`SchedulingError::Conflict`] when any provider or resource is
    /// already taken. At most one blocking appointment can win any given
    /// interval, however many callers race for it.
    #[instrument(skip(self, request), fields(patient_id = %request.patient_id))]
    pub async fn book(&self, request: BookingRequest) -> Result<Appointment, SchedulingError> {
        self.validate(&request).await?;

        let status = if request.tentative {
            AppointmentStatus::Tentative
        } else {
            AppointmentStatus::Booked
        };
        let appointment = self
            .store
            .try_insert_appointment(NewAppointment {
                patient_id: request.patient_id,
                provider_ids: request.provider_ids,
                type_id: request.type_id,
                start_utc: request.start_utc,
                end_utc: request.end_utc,
                status,
                required_resource_ids: request.required_resource_ids,
                parent_series_id: request.parent_series_id,
                contact: request.contact,
            })
            .await?;

        info!(
            "appointment {} booked as {} from {} to {}",
            appointment.id, appointment.status, appointment.start_utc, appointment.end_utc
        );

        // Fire-and-forget: notification failures are logged, never retried
        // here, and never affect the booking result.
        let notifier = Arc::clone(&self.notifier);
        let appointment_id = appointment.id;
        tokio::spawn(async move {
            if let Err(e) = notifier
                .send_appointment_notification(appointment_id, NotificationMode::Created)
                .await
            {
                warn!(
                    "created notification for appointment {} failed: {}",
                    appointment_id, e
                );
            }
        });

        Ok(appointment)
    }

    /// Cancels an appointment and releases its interval, one freed-slot
    /// record per provider. The status write is immediately visible; only
    /// the enqueue of the backfill job is awaited beyond it.
    #[instrument(skip(self))]
    pub async fn cancel(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        let current = self.store.get_appointment(appointment_id).await?;
        if !current.status.can_transition_to(AppointmentStatus::Cancelled) {
            return Err(SchedulingError::Validation(format!(
                "appointment {} cannot be cancelled from status {}",
                appointment_id, current.status
            )));
        }

        let cancelled = self
            .store
            .transition_status(
                appointment_id,
                &[current.status],
                AppointmentStatus::Cancelled,
            )
            .await?
            .ok_or_else(|| {
                SchedulingError::Conflict(format!(
                    "appointment {appointment_id} changed status concurrently"
                ))
            })?;
        info!("appointment {} cancelled", appointment_id);

        for provider_id in &cancelled.provider_ids {
            self.release
                .slot_released(FreedSlot {
                    start_utc: cancelled.start_utc,
                    end_utc: cancelled.end_utc,
                    provider_id: *provider_id,
                    type_id: cancelled.type_id,
                })
                .await?;
        }
        Ok(cancelled)
    }

    /// Expands a series inside `[from, to]` and books each occurrence
    /// independently; conflicts are collected, not propagated.
    #[instrument(skip_all, fields(series_id = %series.id))]
    pub async fn book_series<E: RecurrenceExpander>(
        &self,
        expander: &E,
        series: &RecurrenceSeries,
        request: SeriesBookingRequest,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OccurrenceOutcome>, SchedulingError> {
        let kind = self.store.get_appointment_type(request.type_id).await?;
        let duration = Duration::minutes(kind.duration_min);
        let starts = expander.occurrences(series, anchor, from, to)?;

        let mut outcomes = Vec::with_capacity(starts.len());
        for start in starts {
            let attempt = BookingRequest {
                patient_id: request.patient_id,
                provider_ids: request.provider_ids.clone(),
                type_id: request.type_id,
                start_utc: start,
                end_utc: start + duration,
                tentative: request.tentative,
                required_resource_ids: request.required_resource_ids.clone(),
                parent_series_id: Some(series.id),
                contact: request.contact.clone(),
            };
            let result = match self.book(attempt).await {
                Ok(appointment) => OccurrenceResult::Booked {
                    appointment_id: appointment.id,
                },
                Err(e) => {
                    debug!("occurrence {} not booked: {}", start, e);
                    OccurrenceResult::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(OccurrenceOutcome {
                occurrence: start,
                result,
            });
        }
        Ok(outcomes)
    }

    async fn validate(&self, request: &BookingRequest) -> Result<(), SchedulingError> {
        if request.start_utc >= request.end_utc {
            return Err(SchedulingError::Validation(format!(
                "interval {} - {} is empty or inverted",
                request.start_utc, request.end_utc
            )));
        }
        if request.provider_ids.is_empty() {
            return Err(SchedulingError::Validation(
                "a booking needs at least one provider".to_string(),
            ));
        }
        // A booking that names a nonexistent type or provider is a bad
        // request, not a missing record.
        self.store
            .get_appointment_type(request.type_id)
            .await
            .map_err(|e| match e {
                SchedulingError::NotFound(_) => SchedulingError::Validation(format!(
                    "unknown appointment type {}",
                    request.type_id
                )),
                other => other,
            })?;
        for provider_id in &request.provider_ids {
            let provider = self
                .store
                .get_provider(*provider_id)
                .await
                .map_err(|e| match e {
                    SchedulingError::NotFound(_) => {
                        SchedulingError::Validation(format!("unknown provider {provider_id}"))
                    }
                    other => other,
                })?;
            if !provider.is_active {
                return Err(SchedulingError::Validation(format!(
                    "provider {provider_id} is not active"
                )));
            }
        }
        Ok(())
    }
}
