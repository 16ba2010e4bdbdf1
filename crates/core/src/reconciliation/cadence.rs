//! When scheduled tasks fire.

use crate::interval::{local_date, local_instant};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Timelike, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    /// On every multiple of the period since the Unix epoch, like `*/N` in cron.
    Every(Duration),
    /// Once a day at a local wall-clock time.
    DailyAt(NaiveTime),
}

impl Cadence {
    pub fn every_minutes(minutes: i64) -> Self {
        Self::Every(Duration::minutes(minutes))
    }

    pub fn daily_at_hour(hour: u32) -> Self {
        Self::DailyAt(NaiveTime::MIN.with_hour(hour).unwrap_or(NaiveTime::MIN))
    }

    /// First fire instant strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        match *self {
            Self::Every(period) => {
                let period_secs = period.num_seconds().max(1);
                let into_period = Duration::seconds(t.timestamp().rem_euclid(period_secs))
                    + Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()));
                t - into_period + Duration::seconds(period_secs)
            }
            Self::DailyAt(time) => {
                let today = local_date(t, offset);
                let candidate = local_instant(today, time, offset);
                if candidate > t {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Every(period) => write!(f, "every {} min", period.num_minutes()),
            Self::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M")),
        }
    }
}
