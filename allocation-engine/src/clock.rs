//! Wall clock and business calendar
//!
//! Allocation windows are expressed in the local civil calendar of the
//! business, America/Sao_Paulo by default. Time-of-day values are compared as
//! [`NaiveTime`] truncated to whole seconds.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

/// Default business time zone
pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock frozen at `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Jump to `at`
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Converts instants into the local business date and time of day
#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    zone: Tz,
}

impl BusinessCalendar {
    /// Calendar in an IANA time zone such as `America/Sao_Paulo`
    pub fn new(timezone: &str) -> Result<Self> {
        let zone = timezone
            .parse::<Tz>()
            .map_err(|e| Error::Config(format!("Unknown time zone {}: {}", timezone, e)))?;
        Ok(Self { zone })
    }

    /// America/Sao_Paulo
    pub fn sao_paulo() -> Self {
        Self {
            zone: Tz::America__Sao_Paulo,
        }
    }

    /// Time zone name
    pub fn timezone(&self) -> &'static str {
        self.zone.name()
    }

    /// Local date and time of day (whole seconds)
    pub fn local(&self, instant: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
        let local = instant.with_timezone(&self.zone);
        (local.date_naive(), truncate_to_seconds(local.time()))
    }

    /// Local date
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local(instant).0
    }

    /// Local time of day (whole seconds)
    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveTime {
        self.local(instant).1
    }

    /// Instant of a local date and time.
    ///
    /// A time repeated when clocks go back resolves to its first occurrence;
    /// a time skipped when they go forward is an error.
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
        self.zone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Local time {} {} does not exist in {}",
                    date,
                    time,
                    self.zone.name()
                ))
            })
    }
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::sao_paulo()
    }
}

/// Drop sub-second precision
pub fn truncate_to_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sao_paulo_local_time() {
        let calendar = BusinessCalendar::sao_paulo();
        // 12:00:05.750 UTC == 09:00:05 local
        let instant = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 5).unwrap()
            + Duration::milliseconds(750);

        let (date, time) = calendar.local(instant);
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(time, NaiveTime::from_hms_opt(9, 0, 5).unwrap());
    }

    #[test]
    fn test_local_date_rolls_back_before_midnight_utc() {
        let calendar = BusinessCalendar::sao_paulo();
        let instant = Utc.with_ymd_and_hms(2026, 3, 11, 1, 30, 0).unwrap();
        assert_eq!(
            calendar.local_date(instant),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_to_utc_roundtrip() {
        let calendar = BusinessCalendar::new(DEFAULT_TIMEZONE).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let time = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        let instant = calendar.to_utc(date, time).unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2026, 7, 1, 20, 0, 0).unwrap());
        assert_eq!(calendar.local(instant), (date, time));
    }

    #[test]
    fn test_unknown_timezone() {
        assert!(matches!(
            BusinessCalendar::new("America/Atlantis"),
            Err(Error::Config(_))
        ));
        assert_eq!(BusinessCalendar::new("UTC").unwrap().timezone(), "UTC");
    }

    #[test]
    fn test_follows_historic_daylight_saving() {
        let calendar = BusinessCalendar::sao_paulo();
        // January 2019 was still on UTC-02:00
        let summer = Utc.with_ymd_and_hms(2019, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(calendar.local_time(summer), NaiveTime::from_hms_opt(10, 0, 0).unwrap());

        let winter = Utc.with_ymd_and_hms(2019, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(calendar.local_time(winter), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_skipped_local_time_is_an_error() {
        let calendar = BusinessCalendar::sao_paulo();
        // Clocks jumped from 00:00 to 01:00 on 2018-11-04
        let date = NaiveDate::from_ymd_opt(2018, 11, 4).unwrap();
        let time = NaiveTime::from_hms_opt(0, 30, 0).unwrap();
        assert!(calendar.to_utc(date, time).is_err());
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(61));
        assert_eq!(clock.now(), start + Duration::seconds(61));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
