//! Cleanup schedules and their next-occurrence math.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// When a cleanup job fires.
///
/// `Weekly::day_of_week` counts from Monday: 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheduleType", rename_all = "lowercase")]
pub enum CleanupSchedule {
    Daily {
        hour: u32,
        minute: u32,
    },
    Weekly {
        day_of_week: u32,
        hour: u32,
        minute: u32,
    },
    Interval {
        seconds: u64,
    },
}

impl CleanupSchedule {
    /// Reject impossible schedules before a job is accepted.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Daily { hour, minute } => validate_time(*hour, *minute),
            Self::Weekly {
                day_of_week,
                hour,
                minute,
            } => {
                if *day_of_week > 6 {
                    return Err(SchedulerError::InvalidConfiguration(format!(
                        "day_of_week must be 0 (Monday) through 6 (Sunday), got {day_of_week}"
                    )));
                }
                validate_time(*hour, *minute)
            }
            Self::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(SchedulerError::InvalidConfiguration(
                        "interval must be at least one second".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// The next instant strictly after `now` at which this schedule fires.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily { hour, minute } => {
                let today = at_time(now, *hour, *minute);
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
            Self::Weekly {
                day_of_week,
                hour,
                minute,
            } => {
                let days_ahead =
                    (*day_of_week + 7 - now.weekday().num_days_from_monday()) % 7;
                let candidate = at_time(now, *hour, *minute) + ChronoDuration::days(days_ahead as i64);
                if candidate > now {
                    candidate
                } else {
                    candidate + ChronoDuration::days(7)
                }
            }
            Self::Interval { seconds } => now + ChronoDuration::seconds(*seconds as i64),
        }
    }
}

fn validate_time(hour: u32, minute: u32) -> Result<(), SchedulerError> {
    if hour > 23 {
        return Err(SchedulerError::InvalidConfiguration(format!(
            "hour must be 0 through 23, got {hour}"
        )));
    }
    if minute > 59 {
        return Err(SchedulerError::InvalidConfiguration(format!(
            "minute must be 0 through 59, got {minute}"
        )));
    }
    Ok(())
}

fn at_time(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    now.with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        // hour/minute are validated before use, so this never actually fires
        .unwrap_or(now)
}
