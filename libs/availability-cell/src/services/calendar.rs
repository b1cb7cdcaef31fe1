use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;

use shared_models::{ExceptionKind, LocalWindow, ProviderSchedule, SchedulingError};

use crate::models::{DayWindows, UtcWindow};

/// Resolves a provider's free windows for a date range from the weekly
/// pattern, date exceptions and daily breaks. Exceptions override the weekly
/// pattern entirely for their date; breaks are subtracted from whatever
/// windows remain, always last.
#[derive(Debug, Default, Clone)]
pub struct ScheduleCalendar;

impl ScheduleCalendar {
    pub fn new() -> Self {
        Self
    }

    pub fn free_windows(
        &self,
        schedule: &ProviderSchedule,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayWindows>, SchedulingError> {
        if from > to {
            return Err(SchedulingError::Validation(format!(
                "date range {from} - {to} is inverted"
            )));
        }
        let offset = FixedOffset::east_opt(schedule.utc_offset_minutes * 60).ok_or_else(|| {
            SchedulingError::Validation(format!(
                "utc offset {} minutes is out of range",
                schedule.utc_offset_minutes
            ))
        })?;

        let mut days = Vec::new();
        let mut date = from;
        loop {
            let local = Self::local_windows_for(schedule, date);
            let local = subtract_breaks(local, &schedule.breaks);
            let windows = local
                .iter()
                .map(|w| to_utc_window(date, w, offset))
                .collect::<Result<Vec<_>, _>>()?;
            days.push(DayWindows { date, windows });

            if date == to {
                break;
            }
            date = date.succ_opt().ok_or_else(|| {
                SchedulingError::Validation(format!("date overflow past {date}"))
            })?;
        }
        debug!(
            "resolved {} day(s) of availability for provider {}",
            days.len(),
            schedule.provider_id
        );
        Ok(days)
    }

    fn local_windows_for(schedule: &ProviderSchedule, date: NaiveDate) -> Vec<LocalWindow> {
        if let Some(exception) = schedule.exceptions.iter().find(|e| e.date == date) {
            return match &exception.kind {
                ExceptionKind::Closed => Vec::new(),
                ExceptionKind::Modified { windows } => windows.clone(),
            };
        }
        // chrono numbers Sunday as 0 via num_days_from_sunday, matching the
        // stored day_of_week convention.
        let weekday = date.weekday().num_days_from_sunday() as u8;
        schedule
            .weekly
            .iter()
            .filter(|w| w.day_of_week == weekday)
            .map(|w| LocalWindow {
                start: w.start,
                end: w.end,
            })
            .collect()
    }
}

/// Interval subtraction over wall-clock windows. A break strictly inside a
/// window splits it in two; degenerate remainders are dropped.
fn subtract_breaks(windows: Vec<LocalWindow>, breaks: &[LocalWindow]) -> Vec<LocalWindow> {
    let mut result: Vec<LocalWindow> = windows.into_iter().filter(|w| w.start < w.end).collect();
    for brk in breaks {
        if brk.start >= brk.end {
            continue;
        }
        let mut next = Vec::with_capacity(result.len() + 1);
        for window in result {
            if brk.end <= window.start || window.end <= brk.start {
                next.push(window);
                continue;
            }
            if window.start < brk.start {
                next.push(LocalWindow {
                    start: window.start,
                    end: brk.start,
                });
            }
            if brk.end < window.end {
                next.push(LocalWindow {
                    start: brk.end,
                    end: window.end,
                });
            }
        }
        result = next;
    }
    result.sort_by_key(|w| w.start);
    result
}

fn to_utc_window(
    date: NaiveDate,
    window: &LocalWindow,
    offset: FixedOffset,
) -> Result<UtcWindow, SchedulingError> {
    let start = local_to_utc(date, window.start, offset)?;
    let end = local_to_utc(date, window.end, offset)?;
    Ok(UtcWindow::new(start, end))
}

fn local_to_utc(
    date: NaiveDate,
    time: NaiveTime,
    offset: FixedOffset,
) -> Result<chrono::DateTime<Utc>, SchedulingError> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            SchedulingError::Validation(format!("{date} {time} is not a valid local instant"))
        })
}
