use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::ContactInfo;

/// One booking attempt against a concrete interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub patient_id: Uuid,
    pub provider_ids: Vec<Uuid>,
    pub type_id: Uuid,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    /// Provisional hold (waitlist offers) instead of a direct booking.
    pub tentative: bool,
    #[serde(default)]
    pub required_resource_ids: Vec<Uuid>,
    #[serde(default)]
    pub parent_series_id: Option<Uuid>,
    #[serde(default)]
    pub contact: Option<ContactInfo>,
}

/// Shared fields for every occurrence of a recurring booking; start and end
/// come from expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesBookingRequest {
    pub patient_id: Uuid,
    pub provider_ids: Vec<Uuid>,
    pub type_id: Uuid,
    pub tentative: bool,
    #[serde(default)]
    pub required_resource_ids: Vec<Uuid>,
    #[serde(default)]
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccurrenceOutcome {
    pub occurrence: DateTime<Utc>,
    pub result: OccurrenceResult,
}

/// A conflict on one occurrence never aborts the rest of the series; the
/// caller gets the full per-occurrence picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OccurrenceResult {
    Booked { appointment_id: Uuid },
    Failed { reason: String },
}

/// Interval released by a cancellation, one record per provider involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreedSlot {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub provider_id: Uuid,
    pub type_id: Uuid,
}
