use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use shared_models::intervals_overlap;

/// Half-open `[start, end)` interval on the UTC timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn intersects(&self, other: &UtcWindow) -> bool {
        intervals_overlap(self.start, self.end, other.start, other.end)
    }

    /// Whole `[start, end)` of `other` lies inside this window.
    pub fn contains(&self, other: &UtcWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Free windows resolved for one calendar date, already in UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayWindows {
    pub date: NaiveDate,
    pub windows: Vec<UtcWindow>,
}
