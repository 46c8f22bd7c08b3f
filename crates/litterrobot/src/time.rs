//! Time-of-day values qualified with a timezone.
//!
//! Sleep mode schedules are configured as a wall-clock time ("22:00") in the
//! user's timezone, while the vendor API works in UTC.

use std::fmt;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveTime;
use chrono::TimeZone;
use chrono::Utc;
use chrono_tz::Tz;

/// A wall-clock time in a specific timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedTime {
    pub time: NaiveTime,
    pub tz: Tz,
}

impl ZonedTime {
    pub fn new(time: NaiveTime, tz: Tz) -> Self {
        Self { time, tz }
    }

    /// Parse `HH:MM` or `HH:MM:SS` and attach `tz`.
    ///
    /// Returns `None` for anything that is not a valid time of day.
    pub fn parse(s: &str, tz: Tz) -> Option<Self> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .ok()
            .map(|time| Self { time, tz })
    }

    /// Resolve this time on `date` (in the zone's calendar) to a UTC instant.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant;
    /// non-existent ones (DST spring-forward) return `None`.
    pub fn on_date(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&date.and_time(self.time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The UTC time of day this wall-clock time corresponds to today.
    pub fn to_utc_time(&self) -> Option<NaiveTime> {
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        self.on_date(today).map(|dt| dt.time())
    }
}

impl fmt::Display for ZonedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time.format("%H:%M:%S"), self.tz)
    }
}
