//! Time domain: half-open intervals and their validation.
//!
//! Every interval in the system is `[start, end)` in UTC. Local-calendar questions ("is this
//! today?", "what happened yesterday?") are answered with the clinic's fixed UTC offset from
//! [`crate::ClinicConfig`]; all comparisons are on exact instants.

use crate::constants::{max_interval, MIN_TIMESLOT_SECONDS};
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A half-open interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// `a.start < b.end ∧ b.start < a.end`; touching intervals do not intersect.
    pub fn intersects(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Closed-point test used by scheduling: `start ≤ t ≤ end`.
    pub fn intersects_point(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Smallest interval covering both.
    pub fn hull(&self, other: &Interval) -> Interval {
        Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Validates an appointment window: `0 ≤ end − start ≤ 24h`.
pub fn validate_appointment_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<()> {
    if start > end {
        return Err(CoreError::InvalidInterval(
            "start must not be after end".into(),
        ));
    }
    if end - start > max_interval() {
        return Err(CoreError::InvalidInterval(
            "interval cannot be longer than 24 hours".into(),
        ));
    }
    Ok(())
}

/// Validates a time slot window: `1s ≤ end − start ≤ 24h`.
pub fn validate_timeslot_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<()> {
    validate_appointment_interval(start, end)?;
    if end - start < Duration::seconds(MIN_TIMESLOT_SECONDS) {
        return Err(CoreError::InvalidInterval(
            "time slot must last at least one second".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// LOCAL CALENDAR HELPERS
// ============================================================================

/// Calendar date of `t` in the clinic's local time.
pub fn local_date(t: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    t.with_timezone(&offset).date_naive()
}

/// UTC bounds `[00:00, next 00:00)` of a local calendar day.
pub fn local_day_bounds(date: NaiveDate, offset: FixedOffset) -> Interval {
    let start = local_instant(date, NaiveTime::MIN, offset);
    Interval {
        start,
        end: start + Duration::days(1),
    }
}

/// Converts a local wall-clock date and time into a UTC instant.
pub fn local_instant(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    // A fixed offset has no gaps or folds, so the mapping is always unique.
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(time)))
}

/// Renders `t` as `DD.MM.YYYY HH:MM` in local time.
pub fn format_local(t: DateTime<Utc>, offset: FixedOffset) -> String {
    t.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string()
}

/// Patient-facing description of when an appointment takes place.
pub fn describe_when(
    start: Option<DateTime<Utc>>,
    is_for_whole_day: bool,
    offset: FixedOffset,
) -> String {
    match (start, is_for_whole_day) {
        (Some(start), true) => format!(
            "{} during all day",
            start.with_timezone(&offset).format("%d.%m.%Y")
        ),
        (Some(start), false) => format_local(start, offset),
        (None, _) => "time to be agreed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_exactly_24h_is_accepted() {
        let start = at(8, 0);
        assert!(validate_appointment_interval(start, start + Duration::hours(24)).is_ok());
    }

    #[test]
    fn test_24h_plus_one_microsecond_is_rejected() {
        let start = at(8, 0);
        let end = start + Duration::hours(24) + Duration::microseconds(1);
        assert!(matches!(
            validate_appointment_interval(start, end),
            Err(CoreError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_reversed_interval_is_rejected() {
        assert!(validate_appointment_interval(at(9, 0), at(8, 0)).is_err());
    }

    #[test]
    fn test_zero_length_appointment_allowed_but_not_slot() {
        let t = at(9, 0);
        assert!(validate_appointment_interval(t, t).is_ok());
        assert!(validate_timeslot_interval(t, t).is_err());
        assert!(validate_timeslot_interval(t, t + Duration::seconds(1)).is_ok());
    }

    #[test]
    fn test_every_positive_interval_up_to_a_day_validates() {
        let start = at(0, 0);
        for minutes in [1, 15, 59, 60, 61, 719, 1439, 1440] {
            let end = start + Duration::minutes(minutes);
            assert!(validate_appointment_interval(start, end).is_ok(), "{minutes}");
        }
    }

    #[test]
    fn test_touching_intervals_do_not_intersect() {
        let a = Interval::new(at(9, 0), at(9, 30));
        let b = Interval::new(at(9, 30), at(10, 0));
        assert!(!a.intersects(&b));
        assert!(a.intersects_point(at(9, 30)));
        assert!(a.intersects(&Interval::new(at(9, 29), at(9, 31))));
    }

    #[test]
    fn test_local_day_bounds_follow_offset() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        // 22:30 UTC is 01:30 next day at UTC+3.
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();
        let date = local_date(t, offset);
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());

        let bounds = local_day_bounds(date, offset);
        assert_eq!(bounds.start, Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap());
        assert_eq!(bounds.duration(), Duration::days(1));
    }

    #[test]
    fn test_describe_when_whole_day() {
        let offset = FixedOffset::east_opt(0).unwrap();
        assert_eq!(describe_when(Some(at(0, 0)), true, offset), "01.03.2024 during all day");
        assert_eq!(describe_when(Some(at(9, 5)), false, offset), "01.03.2024 09:05");
    }
}
