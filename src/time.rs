//! Clock abstraction and date/time helpers.

use crate::{Error, Result};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
};
use std::sync::{Mutex, PoisonError};

/// A source of the current instant, injected so that time-triggered behavior can be tested
/// deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Converts an instant to the naive UTC timestamp stored in the database, truncated to whole
/// seconds so stored values compare correctly as text.
pub fn timestamp(at: DateTime<Utc>) -> NaiveDateTime {
    let naive = at.naive_utc();
    naive.with_nanosecond(0).unwrap_or(naive)
}

/// The local wall-clock reading of `at` in the given offset.
pub fn local(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    at.with_timezone(&offset).naive_local()
}

/// Builds a fixed offset from a number of minutes east of UTC.
pub fn offset_from_minutes(minutes: i32) -> Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| Error::Validation(format!("UTC offset of {minutes} minutes is out of range")))
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("`{text}` is not a date, expected YYYY-MM-DD")))
}

/// Parses an `HH:MM` or `HH:MM:SS` time of day.
pub fn parse_time(text: &str) -> Result<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|_| Error::Validation(format!("`{text}` is not a time, expected HH:MM")))
}

/// ISO weekday number of a date, Monday = 1.
pub fn iso_weekday(date: NaiveDate) -> i32 {
    date.weekday().number_from_monday() as i32
}

pub fn weekday_name(day_of_week: i32) -> &'static str {
    match day_of_week {
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        7 => "Sunday",
        _ => "Unknown day",
    }
}

/// Formats a time range as `HH:MM-HH:MM`.
pub fn format_range(start: NaiveTime, end: NaiveTime) -> String {
    format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn timestamp_drops_subseconds() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap() + Duration::milliseconds(750);
        assert_eq!(timestamp(at).to_string(), "2026-03-02 08:00:00");
    }

    #[test]
    fn local_applies_offset() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();
        let offset = offset_from_minutes(7 * 60).unwrap();
        assert_eq!(local(at, offset).to_string(), "2026-03-03 06:30:00");
    }

    #[test]
    fn offset_out_of_range_is_rejected() {
        assert!(matches!(offset_from_minutes(24 * 60), Err(Error::Validation(_))));
    }

    #[test]
    fn parses_dates_and_times() {
        assert_eq!(
            parse_date("2026-03-02").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
        assert!(matches!(parse_date("02/03/2026"), Err(Error::Validation(_))));
        assert_eq!(parse_time("08:05").unwrap(), NaiveTime::from_hms_opt(8, 5, 0).unwrap());
        assert_eq!(
            parse_time("23:59:30").unwrap(),
            NaiveTime::from_hms_opt(23, 59, 30).unwrap()
        );
        assert!(parse_time("25:00").is_err());
    }

    #[test]
    fn weekday_is_monday_based() {
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(iso_weekday(monday), 1);
        assert_eq!(weekday_name(iso_weekday(monday)), "Monday");
        assert_eq!(iso_weekday(monday + Duration::days(6)), 7);
    }
}
