use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{
    Appointment, AppointmentStatus, AppointmentType, NewAppointment, Provider, ProviderSchedule,
    SchedulingError, WaitlistEntry,
};

use crate::store::SchedulingStore;

#[derive(Default)]
struct Inner {
    providers: HashMap<Uuid, Provider>,
    schedules: HashMap<Uuid, ProviderSchedule>,
    appointment_types: HashMap<Uuid, AppointmentType>,
    appointments: HashMap<Uuid, Appointment>,
    waitlist: HashMap<Uuid, WaitlistEntry>,
}

/// In-process store. The single write lock serializes conditional inserts,
/// giving the same at-most-one guarantee the REST store gets from its
/// storage-level exclusion constraint.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_provider(&self, provider: Provider) {
        self.inner
            .write()
            .await
            .providers
            .insert(provider.id, provider);
    }

    pub async fn put_schedule(&self, schedule: ProviderSchedule) {
        self.inner
            .write()
            .await
            .schedules
            .insert(schedule.provider_id, schedule);
    }

    pub async fn put_appointment_type(&self, kind: AppointmentType) {
        self.inner
            .write()
            .await
            .appointment_types
            .insert(kind.id, kind);
    }

    pub async fn put_waitlist_entry(&self, entry: WaitlistEntry) {
        self.inner.write().await.waitlist.insert(entry.id, entry);
    }

    fn conflicts(inner: &Inner, new: &NewAppointment) -> bool {
        inner.appointments.values().any(|existing| {
            if !existing.status.is_blocking() {
                return false;
            }
            if !existing.overlaps(new.start_utc, new.end_utc) {
                return false;
            }
            let shares_provider = existing
                .provider_ids
                .iter()
                .any(|pid| new.provider_ids.contains(pid));
            let shares_resource = existing
                .required_resource_ids
                .iter()
                .any(|rid| new.required_resource_ids.contains(rid));
            shares_provider || shares_resource
        })
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn get_provider(&self, id: Uuid) -> Result<Provider, SchedulingError> {
        self.inner
            .read()
            .await
            .providers
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(format!("provider {id}")))
    }

    async fn get_schedule(&self, provider_id: Uuid) -> Result<ProviderSchedule, SchedulingError> {
        self.inner
            .read()
            .await
            .schedules
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(format!("schedule for provider {provider_id}")))
    }

    async fn get_appointment_type(&self, id: Uuid) -> Result<AppointmentType, SchedulingError> {
        self.inner
            .read()
            .await
            .appointment_types
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(format!("appointment type {id}")))
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.inner
            .read()
            .await
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(format!("appointment {id}")))
    }

    async fn blocking_appointments_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let inner = self.inner.read().await;
        let mut found: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|apt| {
                apt.status.is_blocking()
                    && apt.provider_ids.contains(&provider_id)
                    && apt.overlaps(from, to)
            })
            .cloned()
            .collect();
        found.sort_by_key(|apt| apt.start_utc);
        Ok(found)
    }

    async fn try_insert_appointment(
        &self,
        new: NewAppointment,
    ) -> Result<Appointment, SchedulingError> {
        // Overlap re-check and insert happen under one write lock.
        let mut inner = self.inner.write().await;

        if Self::conflicts(&inner, &new) {
            warn!(
                "conflict detected for providers {:?} between {} and {}",
                new.provider_ids, new.start_utc, new.end_utc
            );
            return Err(SchedulingError::Conflict(format!(
                "interval {} - {} is no longer free",
                new.start_utc, new.end_utc
            )));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            provider_ids: new.provider_ids,
            type_id: new.type_id,
            start_utc: new.start_utc,
            end_utc: new.end_utc,
            status: new.status,
            required_resource_ids: new.required_resource_ids,
            parent_series_id: new.parent_series_id,
            contact: new.contact,
            created_at: now,
            updated_at: now,
        };
        inner
            .appointments
            .insert(appointment.id, appointment.clone());
        debug!("appointment {} persisted as {}", appointment.id, appointment.status);
        Ok(appointment)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[AppointmentStatus],
        next: AppointmentStatus,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let mut inner = self.inner.write().await;
        let appointment = inner
            .appointments
            .get_mut(&id)
            .ok_or_else(|| SchedulingError::NotFound(format!("appointment {id}")))?;

        if !expected.contains(&appointment.status) {
            debug!(
                "status of {} is {}, not transitioning to {}",
                id, appointment.status, next
            );
            return Ok(None);
        }

        appointment.status = next;
        appointment.updated_at = Utc::now();
        Ok(Some(appointment.clone()))
    }

    async fn best_waitlist_candidate(
        &self,
        freed_start: DateTime<Utc>,
        freed_end: DateTime<Utc>,
        type_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, SchedulingError> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<&WaitlistEntry> = inner
            .waitlist
            .values()
            .filter(|entry| entry.matches_slot(freed_start, freed_end, type_id))
            .collect();
        // Priority descending, then strict FIFO within equal priority.
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(candidates.first().map(|entry| (*entry).clone()))
    }

    async fn get_waitlist_entry(&self, id: Uuid) -> Result<WaitlistEntry, SchedulingError> {
        self.inner
            .read()
            .await
            .waitlist
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(format!("waitlist entry {id}")))
    }

    async fn set_waitlist_processed(
        &self,
        id: Uuid,
        processed: bool,
    ) -> Result<(), SchedulingError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .waitlist
            .get_mut(&id)
            .ok_or_else(|| SchedulingError::NotFound(format!("waitlist entry {id}")))?;
        entry.processed = processed;
        Ok(())
    }

    async fn latest_tentative_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let inner = self.inner.read().await;
        let latest = inner
            .appointments
            .values()
            .filter(|apt| {
                apt.status == AppointmentStatus::Tentative
                    && apt
                        .contact
                        .as_ref()
                        .and_then(|c| c.phone.as_deref())
                        .is_some_and(|p| p == phone)
            })
            .max_by_key(|apt| apt.created_at)
            .cloned();
        Ok(latest)
    }
}
