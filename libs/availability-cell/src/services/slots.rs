use chrono::{DateTime, Duration, Utc};

use shared_models::{Appointment, AppointmentType};

use crate::models::UtcWindow;

/// Lazy iterator over candidate start times, ascending. A candidate `start`
/// is admitted when `[start - buffer_before, start + duration + buffer_after)`
/// fits inside one free window and intersects no busy interval. Busy
/// intervals must already be buffer-expanded (see [`expand_busy`]).
///
/// Cloning the iterator restarts it from wherever it stands; building a fresh
/// one from the same inputs replays the full sequence.
#[derive(Debug, Clone)]
pub struct SlotIter {
    windows: Vec<UtcWindow>,
    busy: Vec<UtcWindow>,
    duration: Duration,
    buffer_before: Duration,
    buffer_after: Duration,
    step: Duration,
    window_idx: usize,
    cursor: Option<DateTime<Utc>>,
}

impl SlotIter {
    pub fn new(
        mut windows: Vec<UtcWindow>,
        mut busy: Vec<UtcWindow>,
        kind: &AppointmentType,
        granularity_min: i64,
    ) -> Self {
        windows.retain(|w| !w.is_empty());
        windows.sort_by_key(|w| w.start);
        busy.retain(|b| !b.is_empty());
        busy.sort_by_key(|b| b.start);
        Self {
            windows,
            busy,
            duration: Duration::minutes(kind.duration_min),
            buffer_before: Duration::minutes(kind.buffer_before_min),
            buffer_after: Duration::minutes(kind.buffer_after_min),
            step: Duration::minutes(granularity_min.max(1)),
            window_idx: 0,
            cursor: None,
        }
    }
}

impl Iterator for SlotIter {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            let window = *self.windows.get(self.window_idx)?;
            let start = self
                .cursor
                .unwrap_or(window.start + self.buffer_before);

            let occupied = UtcWindow::new(
                start - self.buffer_before,
                start + self.duration + self.buffer_after,
            );
            if occupied.end > window.end {
                self.window_idx += 1;
                self.cursor = None;
                continue;
            }
            self.cursor = Some(start + self.step);

            if self.busy.iter().any(|b| b.intersects(&occupied)) {
                continue;
            }
            return Some(start);
        }
    }
}

/// Busy intervals for the conflict side of slot generation: each blocking
/// appointment padded by the appointment type's buffers.
pub fn expand_busy(appointments: &[Appointment], kind: &AppointmentType) -> Vec<UtcWindow> {
    let before = Duration::minutes(kind.buffer_before_min);
    let after = Duration::minutes(kind.buffer_after_min);
    appointments
        .iter()
        .filter(|apt| apt.status.is_blocking())
        .map(|apt| UtcWindow::new(apt.start_utc - before, apt.end_utc + after))
        .collect()
}
