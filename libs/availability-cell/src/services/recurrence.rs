use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday,
};
use tracing::debug;

use shared_models::{RecurrenceSeries, SchedulingError};

/// Occurrence expansion seam. The shipped [`RruleExpander`] covers the rule
/// subset actually stored on series; anything richer can be swapped in
/// without touching booking code.
pub trait RecurrenceExpander: Send + Sync {
    /// UTC start instants of the series within `[from, to]`, anchored at the
    /// first occurrence `anchor`, with exception dates removed. The window is
    /// mandatory: a series may be logically unbounded.
    fn occurrences(
        &self,
        series: &RecurrenceSeries,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, SchedulingError>;
}

/// RFC 5545 RRULE subset: `FREQ=DAILY|WEEKLY|MONTHLY`, `INTERVAL`, `COUNT`,
/// `UNTIL`, and `BYDAY` for weekly rules. Expansion walks candidates in
/// local wall-clock time; a window that would generate more candidates than
/// the cap is rejected outright rather than silently truncated.
#[derive(Debug, Default, Clone)]
pub struct RruleExpander;

const MAX_CANDIDATES: usize = 10_000;

impl RruleExpander {
    pub fn new() -> Self {
        Self
    }
}

impl RecurrenceExpander for RruleExpander {
    fn occurrences(
        &self,
        series: &RecurrenceSeries,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, SchedulingError> {
        if from > to {
            return Err(SchedulingError::Validation(format!(
                "expansion window {from} - {to} is inverted"
            )));
        }
        let rule = Rule::parse(&series.rrule)?;
        let offset = FixedOffset::east_opt(series.utc_offset_minutes * 60).ok_or_else(|| {
            SchedulingError::Validation(format!(
                "utc offset {} minutes is out of range",
                series.utc_offset_minutes
            ))
        })?;
        let anchor_local = anchor.with_timezone(&offset).naive_local();

        let mut out = Vec::new();
        let mut remaining = rule.count;
        let mut generated = 0usize;
        for candidate in rule.candidates(anchor_local) {
            if let Some(until) = rule.until {
                if candidate > until {
                    break;
                }
            }
            // COUNT counts every generated occurrence, including ones later
            // dropped by an exception date or the query window.
            if let Some(rem) = remaining.as_mut() {
                if *rem == 0 {
                    break;
                }
                *rem -= 1;
            }
            let utc = offset
                .from_local_datetime(&candidate)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    SchedulingError::Validation(format!("{candidate} is not a valid local instant"))
                })?;
            if utc > to {
                break;
            }
            generated += 1;
            if generated > MAX_CANDIDATES {
                return Err(SchedulingError::Validation(format!(
                    "series {} exceeds {MAX_CANDIDATES} occurrences before {to}; narrow the window",
                    series.id
                )));
            }
            if utc < from || series.exceptions.contains(&candidate.date()) {
                continue;
            }
            out.push(utc);
        }
        debug!(
            "series {} expanded to {} occurrence(s) in window",
            series.id,
            out.len()
        );
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freq {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone)]
struct Rule {
    freq: Freq,
    interval: u32,
    count: Option<u32>,
    until: Option<NaiveDateTime>,
    by_day: Vec<Weekday>,
}

impl Rule {
    fn parse(rrule: &str) -> Result<Self, SchedulingError> {
        let bad = |msg: String| SchedulingError::Validation(msg);

        let mut freq = None;
        let mut interval = 1u32;
        let mut count = None;
        let mut until = None;
        let mut by_day = Vec::new();

        for part in rrule.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| bad(format!("malformed rrule part '{part}'")))?;
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Freq::Daily,
                        "WEEKLY" => Freq::Weekly,
                        "MONTHLY" => Freq::Monthly,
                        other => return Err(bad(format!("unsupported FREQ '{other}'"))),
                    });
                }
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|i| *i >= 1)
                        .ok_or_else(|| bad(format!("invalid INTERVAL '{value}'")))?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| bad(format!("invalid COUNT '{value}'")))?,
                    );
                }
                "UNTIL" => {
                    until = Some(parse_until(value)?);
                }
                "BYDAY" => {
                    for day in value.split(',') {
                        by_day.push(match day.trim().to_ascii_uppercase().as_str() {
                            "MO" => Weekday::Mon,
                            "TU" => Weekday::Tue,
                            "WE" => Weekday::Wed,
                            "TH" => Weekday::Thu,
                            "FR" => Weekday::Fri,
                            "SA" => Weekday::Sat,
                            "SU" => Weekday::Sun,
                            other => return Err(bad(format!("unsupported BYDAY '{other}'"))),
                        });
                    }
                }
                // WKST and the rest of the grammar are not stored on series.
                other => return Err(bad(format!("unsupported rrule key '{other}'"))),
            }
        }

        let freq = freq.ok_or_else(|| bad("rrule is missing FREQ".to_string()))?;
        if !by_day.is_empty() && freq != Freq::Weekly {
            return Err(bad("BYDAY is only supported with FREQ=WEEKLY".to_string()));
        }
        by_day.sort_by_key(|d| d.num_days_from_monday());
        by_day.dedup();
        Ok(Self {
            freq,
            interval,
            count,
            until,
            by_day,
        })
    }

    /// Infinite ascending candidate sequence in local wall-clock time,
    /// starting at the anchor. Callers cap and bound it.
    fn candidates(&self, anchor: NaiveDateTime) -> Box<dyn Iterator<Item = NaiveDateTime>> {
        let interval = self.interval as i64;
        match self.freq {
            Freq::Daily => Box::new(
                (0i64..).map(move |k| anchor + Duration::days(interval * k)),
            ),
            Freq::Weekly if self.by_day.is_empty() => Box::new(
                (0i64..).map(move |k| anchor + Duration::weeks(interval * k)),
            ),
            Freq::Weekly => {
                let time = anchor.time();
                let week_anchor = start_of_week(anchor.date());
                let day_offsets: Vec<i64> = self
                    .by_day
                    .iter()
                    .map(|d| d.num_days_from_monday() as i64)
                    .collect();
                Box::new(
                    (0i64..)
                        .flat_map(move |week| {
                            let week_start = week_anchor + Duration::weeks(interval * week);
                            day_offsets
                                .clone()
                                .into_iter()
                                .map(move |off| (week_start + Duration::days(off)).and_time(time))
                        })
                        .filter(move |dt| *dt >= anchor),
                )
            }
            Freq::Monthly => {
                let time = anchor.time();
                let day = anchor.day();
                let base_months = anchor.year() as i64 * 12 + anchor.month0() as i64;
                Box::new((0i64..).filter_map(move |k| {
                    let months = base_months + interval * k;
                    let year = months.div_euclid(12) as i32;
                    let month = months.rem_euclid(12) as u32 + 1;
                    // Months without the anchor's day-of-month are skipped.
                    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.and_time(time))
                }))
            }
        }
    }
}

fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn parse_until(value: &str) -> Result<NaiveDateTime, SchedulingError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        // A bare date bounds the whole day, inclusive.
        if let Some(dt) = date.and_hms_opt(23, 59, 59) {
            return Ok(dt);
        }
    }
    Err(SchedulingError::Validation(format!(
        "invalid UNTIL '{value}'"
    )))
}
