use std::sync::Arc;

use chrono::NaiveDate;
use tracing::instrument;
use uuid::Uuid;

use shared_models::SchedulingError;
use shared_storage::SchedulingStore;

use crate::models::UtcWindow;
use crate::services::calendar::ScheduleCalendar;
use crate::services::slots::{expand_busy, SlotIter};

/// Front door for availability queries: resolves the provider's calendar,
/// folds in current blocking appointments, and hands back a lazy slot
/// iterator. Results are never cached; every call recomputes from current
/// rows, so a stale hold can never linger.
pub struct AvailabilityService<S> {
    store: Arc<S>,
    calendar: ScheduleCalendar,
    granularity_min: i64,
}

impl<S: SchedulingStore> AvailabilityService<S> {
    pub fn new(store: Arc<S>, granularity_min: i64) -> Self {
        Self {
            store,
            calendar: ScheduleCalendar::new(),
            granularity_min,
        }
    }

    /// Candidate start times for `type_id` with `provider_id` across the
    /// date range, ascending.
    #[instrument(skip(self))]
    pub async fn bookable_starts(
        &self,
        provider_id: Uuid,
        type_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SlotIter, SchedulingError> {
        let schedule = self.store.get_schedule(provider_id).await?;
        let kind = self.store.get_appointment_type(type_id).await?;

        let days = self.calendar.free_windows(&schedule, from, to)?;
        let windows: Vec<UtcWindow> = days.into_iter().flat_map(|d| d.windows).collect();

        let busy = match (
            windows.iter().map(|w| w.start).min(),
            windows.iter().map(|w| w.end).max(),
        ) {
            (Some(range_start), Some(range_end)) => {
                let blocking = self
                    .store
                    .blocking_appointments_in_range(provider_id, range_start, range_end)
                    .await?;
                expand_busy(&blocking, &kind)
            }
            _ => Vec::new(),
        };

        Ok(SlotIter::new(windows, busy, &kind, self.granularity_min))
    }
}
