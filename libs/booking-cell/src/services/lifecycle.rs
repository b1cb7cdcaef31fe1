use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use shared_models::{Appointment, AppointmentStatus, SchedulingError};
use shared_storage::SchedulingStore;

/// Validated status transitions outside the cancellation path: confirm,
/// complete, no-show. Every write is a compare-and-set against the status
/// the caller observed, so two racing transitions cannot both win.
pub struct LifecycleService<S> {
    store: Arc<S>,
}

impl<S: SchedulingStore> LifecycleService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        next: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.store.get_appointment(appointment_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(SchedulingError::Validation(format!(
                "appointment {} cannot move from {} to {}",
                appointment_id, current.status, next
            )));
        }
        let updated = self
            .store
            .transition_status(appointment_id, &[current.status], next)
            .await?
            .ok_or_else(|| {
                SchedulingError::Conflict(format!(
                    "appointment {appointment_id} changed status concurrently"
                ))
            })?;
        info!("appointment {} is now {}", appointment_id, updated.status);
        Ok(updated)
    }

    pub async fn confirm(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentStatus::Confirmed)
            .await
    }

    pub async fn complete(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentStatus::Completed)
            .await
    }

    pub async fn mark_no_show(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentStatus::NoShow)
            .await
    }
}
