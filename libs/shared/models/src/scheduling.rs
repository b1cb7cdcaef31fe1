use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Half-open interval test shared by every conflict check in the system:
/// `[a_start, a_end)` and `[b_start, b_end)` intersect.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Tentative,
    Booked,
    Confirmed,
    Cancelled,
    NoShow,
    Completed,
}

impl AppointmentStatus {
    /// Statuses that occupy the provider's timeline for overlap purposes.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Tentative
                | AppointmentStatus::Booked
                | AppointmentStatus::Confirmed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled
                | AppointmentStatus::NoShow
                | AppointmentStatus::Completed
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, next) {
            (Tentative, Confirmed) | (Tentative, Cancelled) => true,
            (Booked, Confirmed) | (Booked, Cancelled) | (Booked, NoShow) | (Booked, Completed) => {
                true
            }
            (Confirmed, Cancelled) | (Confirmed, NoShow) | (Confirmed, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Tentative => "tentative",
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
            AppointmentStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Immutable reference data describing one bookable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentType {
    pub id: Uuid,
    pub name: String,
    pub duration_min: i64,
    pub buffer_before_min: i64,
    pub buffer_after_min: i64,
    #[serde(default)]
    pub required_resource_types: Vec<String>,
    #[serde(default)]
    pub required_provider_roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub roles: Vec<String>,
    /// Display / schedule-authoring zone name. Stored instants are always UTC.
    pub timezone: String,
    pub is_active: bool,
}

/// One recurring working window, local wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyWindow {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExceptionKind {
    /// The whole day yields no availability, whatever the weekly pattern says.
    Closed,
    /// The listed windows replace the weekly pattern for that date.
    Modified { windows: Vec<LocalWindow> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleException {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: ExceptionKind,
}

/// Weekly pattern + exceptions + daily breaks for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSchedule {
    pub provider_id: Uuid,
    /// Fixed UTC offset the schedule's wall-clock times are written in.
    pub utc_offset_minutes: i32,
    pub weekly: Vec<WeeklyWindow>,
    #[serde(default)]
    pub breaks: Vec<LocalWindow>,
    #[serde(default)]
    pub exceptions: Vec<ScheduleException>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceSeries {
    pub id: Uuid,
    /// RFC 5545 RRULE string, e.g. `FREQ=WEEKLY;COUNT=4`.
    pub rrule: String,
    pub utc_offset_minutes: i32,
    /// Dates excluded from expansion.
    #[serde(default)]
    pub exceptions: Vec<NaiveDate>,
}

/// Explicit contact record, replacing the loose metadata bag the original
/// system kept on appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// Primary provider first; co-booked providers after.
    pub provider_ids: Vec<Uuid>,
    pub type_id: Uuid,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub required_resource_ids: Vec<Uuid>,
    /// Weak back-reference to the generating series; never an ownership edge.
    pub parent_series_id: Option<Uuid>,
    pub contact: Option<ContactInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.start_utc, self.end_utc, start, end)
    }
}

/// Insert payload for the atomic conditional write. The store assigns the id
/// and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub provider_ids: Vec<Uuid>,
    pub type_id: Uuid,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub required_resource_ids: Vec<Uuid>,
    pub parent_series_id: Option<Uuid>,
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// Acceptable appointment types; empty means any.
    #[serde(default)]
    pub requested_type_ids: Vec<Uuid>,
    #[serde(default)]
    pub preferred_providers: Vec<Uuid>,
    pub earliest_utc: Option<DateTime<Utc>>,
    pub latest_utc: Option<DateTime<Utc>>,
    /// Higher is more urgent.
    pub priority: i32,
    pub processed: bool,
    pub contact: Option<ContactInfo>,
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// Selection predicate for a freed `[start, end)` slot of `type_id`.
    pub fn matches_slot(&self, start: DateTime<Utc>, end: DateTime<Utc>, type_id: Uuid) -> bool {
        if self.processed {
            return false;
        }
        let type_ok =
            self.requested_type_ids.is_empty() || self.requested_type_ids.contains(&type_id);
        let earliest_ok = self.earliest_utc.map_or(true, |earliest| earliest <= end);
        let latest_ok = self.latest_utc.map_or(true, |latest| latest >= start);
        type_ok && earliest_ok && latest_ok
    }
}
