use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shared_models::{
    Appointment, AppointmentStatus, AppointmentType, NewAppointment, Provider, ProviderSchedule,
    SchedulingError, WaitlistEntry,
};

/// Repository seam for the scheduling engine. One immutable value type per
/// entity; every mutation goes through an explicit operation here.
///
/// `try_insert_appointment` is the single atomic conditional write that
/// upholds the no-overlap invariant: the storage layer re-validates absence
/// of overlap immediately before committing and either persists the whole
/// appointment or fails with [`SchedulingError::Conflict`]. Implementations
/// must make this safe under arbitrarily concurrent callers across
/// processes.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn get_provider(&self, id: Uuid) -> Result<Provider, SchedulingError>;

    async fn get_schedule(&self, provider_id: Uuid) -> Result<ProviderSchedule, SchedulingError>;

    async fn get_appointment_type(&self, id: Uuid) -> Result<AppointmentType, SchedulingError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, SchedulingError>;

    /// Appointments for `provider_id` whose status still blocks the timeline
    /// and whose `[start_utc, end_utc)` intersects `[from, to)`.
    async fn blocking_appointments_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    /// Atomic conditional insert. Fails with `Conflict` when any provider in
    /// `new.provider_ids` or any resource in `new.required_resource_ids`
    /// already has a blocking appointment overlapping the interval. Never
    /// partially commits.
    async fn try_insert_appointment(
        &self,
        new: NewAppointment,
    ) -> Result<Appointment, SchedulingError>;

    /// Compare-and-set status write. Applies `next` only while the current
    /// status is one of `expected`; returns `Ok(None)` when the appointment
    /// has already moved on (lost race, re-delivered job). `NotFound` when
    /// the appointment does not exist.
    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[AppointmentStatus],
        next: AppointmentStatus,
    ) -> Result<Option<Appointment>, SchedulingError>;

    /// Best unprocessed waitlist entry for a freed slot: predicate per
    /// [`WaitlistEntry::matches_slot`], ordered by priority descending then
    /// `created_at` ascending.
    async fn best_waitlist_candidate(
        &self,
        freed_start: DateTime<Utc>,
        freed_end: DateTime<Utc>,
        type_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, SchedulingError>;

    async fn get_waitlist_entry(&self, id: Uuid) -> Result<WaitlistEntry, SchedulingError>;

    /// Flip `processed`. Passing `false` is the explicit re-open operation.
    async fn set_waitlist_processed(
        &self,
        id: Uuid,
        processed: bool,
    ) -> Result<(), SchedulingError>;

    /// Most recent tentative appointment whose contact phone matches, used to
    /// resolve inbound replies.
    async fn latest_tentative_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Appointment>, SchedulingError>;
}
