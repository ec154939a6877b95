//! ISO week arithmetic.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};

/// ISO-8601 calendar week, the period every quota counter covers.
///
/// Rendered as `YYYY-WW` using the ISO week-based year, so the last days of
/// December can belong to week `01` of the next year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeekId {
    year: i32,
    week: u32,
}

impl WeekId {
    /// Week containing `instant`.
    pub fn of(instant: DateTime<Utc>) -> Self {
        let iso = instant.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    /// ISO week-based year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Week number, 1 to 53.
    pub fn week(&self) -> u32 {
        self.week
    }
}

impl fmt::Display for WeekId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.week)
    }
}

impl Serialize for WeekId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Time left until the next ISO week starts (Monday 00:00 UTC).
pub fn until_next_week(now: DateTime<Utc>) -> Duration {
    let days_into_week = i64::from(now.weekday().num_days_from_monday());
    let next_monday = now.date_naive() + TimeDelta::days(7 - days_into_week);
    (next_monday.and_time(NaiveTime::MIN).and_utc() - now)
        .to_std()
        .unwrap_or_default()
}
