use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use simflow_errors::{SimError, SimResult};

/// Integers up to this value parse as a calendar year; larger values are
/// unix seconds.
const MAX_YEAR: i64 = 5000;

/// A discrete simulation timestamp.
///
/// Moments order and compare by timestamp alone; conversions to real time
/// go through an explicit [`TimelineInfo`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Moment(pub i64);

impl Moment {
    pub fn timestamp(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

impl From<i64> for Moment {
    fn from(timestamp: i64) -> Self {
        Moment(timestamp)
    }
}

/// The timeline of one simulation run: a wall-clock anchor (unix seconds),
/// the scale from timestamps to real seconds, and the covered range.
///
/// Set once at simulation start and passed explicitly to every component
/// that converts between timestamps and real time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineInfo {
    pub reference: f64,
    pub time_scale: f64,
    pub start_time: i64,
    pub duration: i64,
}

impl Default for TimelineInfo {
    fn default() -> Self {
        Self {
            reference: 0.0,
            time_scale: 1.0,
            start_time: 0,
            duration: 0,
        }
    }
}

impl TimelineInfo {
    pub fn new(reference: f64, time_scale: f64, start_time: i64, duration: i64) -> Self {
        Self {
            reference,
            time_scale,
            start_time,
            duration,
        }
    }

    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration
    }

    pub fn is_at_beginning(&self, moment: Moment) -> bool {
        moment.0 == self.start_time
    }

    pub fn timestamp_to_seconds(&self, timestamp: i64) -> f64 {
        self.time_scale * timestamp as f64
    }

    pub fn seconds_to_timestamp(&self, seconds: f64) -> i64 {
        (seconds / self.time_scale) as i64
    }

    pub fn timestamp_to_unix_time(&self, timestamp: i64) -> f64 {
        self.reference + self.timestamp_to_seconds(timestamp)
    }

    pub fn unix_time_to_timestamp(&self, unix_time: f64) -> i64 {
        self.seconds_to_timestamp(unix_time - self.reference)
    }

    /// Seconds since simulation start for a moment.
    pub fn seconds(&self, moment: Moment) -> f64 {
        self.timestamp_to_seconds(moment.0)
    }

    /// Wall-clock unix time of a moment.
    pub fn world_time(&self, moment: Moment) -> f64 {
        self.timestamp_to_unix_time(moment.0)
    }

    pub fn datetime_to_timestamp(&self, datetime: NaiveDateTime) -> i64 {
        self.unix_time_to_timestamp(datetime.and_utc().timestamp() as f64)
    }

    pub fn timestamp_to_datetime(&self, timestamp: i64) -> SimResult<NaiveDateTime> {
        let unix = self.timestamp_to_unix_time(timestamp);
        DateTime::from_timestamp(unix as i64, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| SimError::InvalidDatetime {
                input: unix.to_string(),
            })
    }

    pub fn string_to_timestamp(&self, input: &str) -> SimResult<i64> {
        Ok(self.datetime_to_timestamp(string_to_datetime(input)?))
    }
}

/// Interpret a datetime string. Recognized forms, in order: a bare year
/// (1..=5000, read as January 1st of that year), a unix-seconds integer
/// above that threshold, an ISO-8601 datetime, and common day-first date
/// formats.
pub fn string_to_datetime(input: &str) -> SimResult<NaiveDateTime> {
    let input = input.trim();
    if let Ok(number) = input.parse::<i64>() {
        if (1..=MAX_YEAR).contains(&number) {
            let date = NaiveDate::from_ymd_opt(number as i32, 1, 1)
                .expect("january 1st exists for years 1..=5000");
            return Ok(date.and_hms_opt(0, 0, 0).expect("midnight exists"));
        }
        return DateTime::from_timestamp(number, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| SimError::InvalidDatetime {
                input: input.to_owned(),
            });
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(input) {
        return Ok(datetime.naive_utc());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%d-%m-%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(datetime);
        }
    }
    for format in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return Ok(date.and_hms_opt(0, 0, 0).expect("midnight exists"));
        }
    }
    Err(SimError::InvalidDatetime {
        input: input.to_owned(),
    })
}
