//! Time bucketing
//!
//! Raw samples are stored against hour-aligned epoch-second timestamps. A
//! request chooses a [`Resolution`] and this module maps each raw timestamp
//! to the key of the bucket it lands in, along with generating the explicit
//! time axis a dense matrix is materialized over. All calendar arithmetic is
//! performed in UTC, regardless of where samples originated.

use std::{fmt, str::FromStr};

use serde::Deserialize;
use time::{Date, OffsetDateTime};

/// Seconds in one hour bucket.
pub const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Errors produced by [`Resolution`] parsing
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Only `hour` and `day` are understood.
    #[error("Resolution not recognized: {0}")]
    UnsupportedResolution(String),
}

/// Bucketing granularity of a stats request.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(try_from = "String")]
pub enum Resolution {
    /// One bucket per hour, keyed by the raw timestamp.
    Hour,
    /// One bucket per UTC calendar day, keyed by 00:00:00 UTC.
    Day,
}

impl Resolution {
    /// The name this resolution is requested by.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Hour => "hour",
            Resolution::Day => "day",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            other => Err(Error::UnsupportedResolution(other.to_string())),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Map a raw sample timestamp to its bucket key.
#[must_use]
pub fn bucket_key(timestamp: i64, resolution: Resolution) -> i64 {
    match resolution {
        Resolution::Hour => timestamp,
        Resolution::Day => day_floor(timestamp),
    }
}

/// Epoch seconds of 00:00:00 UTC on `date`.
#[must_use]
pub fn date_start(date: Date) -> i64 {
    date.midnight().assume_utc().unix_timestamp()
}

/// Truncate `timestamp` to the top of its UTC hour.
#[must_use]
pub fn hour_floor(timestamp: i64) -> i64 {
    timestamp.div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// Truncate `timestamp` to 00:00:00 UTC of its calendar day.
#[must_use]
pub fn day_floor(timestamp: i64) -> i64 {
    match OffsetDateTime::from_unix_timestamp(timestamp) {
        Ok(dt) => date_start(dt.date()),
        // Beyond the calendar's range. UTC days have no leap seconds in epoch
        // time so plain flooring agrees with the calendar.
        Err(_) => timestamp.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY,
    }
}

/// Truncate `timestamp` to 00:00:00 UTC on the first of its month.
///
/// Timestamps beyond the calendar's range are floored to their day only.
#[must_use]
pub fn month_floor(timestamp: i64) -> i64 {
    match OffsetDateTime::from_unix_timestamp(timestamp) {
        Ok(dt) => date_start(first_of_month(dt.date())),
        Err(_) => timestamp.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY,
    }
}

/// The first day of the month `date` falls in.
#[must_use]
pub fn first_of_month(date: Date) -> Date {
    // Day one exists in every month, replace_day cannot fail here.
    date.replace_day(1).unwrap_or(date)
}

/// Generate the ascending time axis from `start` through `end` inclusive.
///
/// Hourly axes step by 3600 seconds from 00:00 UTC of `start` up to, but
/// excluding, 00:00 UTC of the day after `end`. Daily axes step by calendar
/// date. An inverted range produces an empty axis.
#[must_use]
pub fn axis(start: Date, end: Date, resolution: Resolution) -> Vec<i64> {
    let mut times = Vec::new();
    if start > end {
        return times;
    }

    match resolution {
        Resolution::Hour => {
            let exclusive_end = end
                .next_day()
                .map_or_else(|| date_start(end) + SECONDS_PER_DAY, date_start);
            let mut t = date_start(start);
            while t < exclusive_end {
                times.push(t);
                t += SECONDS_PER_HOUR;
            }
        }
        Resolution::Day => {
            let mut day = Some(start);
            while let Some(d) = day.filter(|d| *d <= end) {
                times.push(date_start(d));
                day = d.next_day();
            }
        }
    }

    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::{date, datetime};

    fn ts(dt: OffsetDateTime) -> i64 {
        dt.unix_timestamp()
    }

    #[test]
    fn hour_resolution_is_identity() {
        for t in [0, 3_600, 43_200, 1_400_000_000] {
            assert_eq!(bucket_key(t, Resolution::Hour), t);
        }
    }

    #[test]
    fn day_resolution_collapses_first_utc_day() {
        for t in [0, 3_600, 43_200] {
            assert_eq!(bucket_key(t, Resolution::Day), 0);
        }
        assert_eq!(bucket_key(86_400, Resolution::Day), 86_400);
    }

    #[test]
    fn day_floor_uses_utc() {
        let cases = [
            (datetime!(2014-01-01 0:00 UTC), datetime!(2014-01-01 0:00 UTC)),
            (datetime!(2014-05-04 4:04:04 UTC), datetime!(2014-05-04 0:00 UTC)),
            (datetime!(2014-05-05 0:00 UTC), datetime!(2014-05-05 0:00 UTC)),
            (datetime!(2014-05-05 23:00 UTC), datetime!(2014-05-05 0:00 UTC)),
        ];
        for (input, expected) in cases {
            assert_eq!(day_floor(ts(input)), ts(expected), "day floor of {input}");
        }
    }

    #[test]
    fn hour_floor_truncates_minutes() {
        let cases = [
            (datetime!(2014-01-01 0:00 UTC), datetime!(2014-01-01 0:00 UTC)),
            (datetime!(2014-05-04 4:04:04 UTC), datetime!(2014-05-04 4:00 UTC)),
            (datetime!(2014-05-05 3:00 UTC), datetime!(2014-05-05 3:00 UTC)),
        ];
        for (input, expected) in cases {
            assert_eq!(hour_floor(ts(input)), ts(expected), "hour floor of {input}");
        }
    }

    #[test]
    fn month_floor_truncates_to_first() {
        let cases = [
            (datetime!(2014-01-01 0:00 UTC), datetime!(2014-01-01 0:00 UTC)),
            (datetime!(2014-05-04 4:04:04 UTC), datetime!(2014-05-01 0:00 UTC)),
            (datetime!(2014-05-05 0:00 UTC), datetime!(2014-05-01 0:00 UTC)),
            (datetime!(2016-02-29 23:00 UTC), datetime!(2016-02-01 0:00 UTC)),
        ];
        for (input, expected) in cases {
            assert_eq!(month_floor(ts(input)), ts(expected), "month floor of {input}");
        }
    }

    #[test]
    fn resolution_parses_known_names_only() {
        assert_eq!("hour".parse::<Resolution>(), Ok(Resolution::Hour));
        assert_eq!("day".parse::<Resolution>(), Ok(Resolution::Day));
        assert_eq!(
            "week".parse::<Resolution>(),
            Err(Error::UnsupportedResolution("week".to_string()))
        );
        assert!("Hour".parse::<Resolution>().is_err());
    }

    #[test]
    fn hourly_axis_covers_every_hour_inclusive() {
        let times = axis(date!(2014-03-08), date!(2014-03-10), Resolution::Hour);
        // Three full UTC days, the US daylight saving change on the 9th has
        // no bearing.
        assert_eq!(times.len(), 72);
        assert_eq!(times[0], ts(datetime!(2014-03-08 0:00 UTC)));
        assert_eq!(times[71], ts(datetime!(2014-03-10 23:00 UTC)));
        assert!(times.windows(2).all(|w| w[1] - w[0] == SECONDS_PER_HOUR));
    }

    #[test]
    fn daily_axis_steps_by_calendar_date() {
        let times = axis(date!(2016-02-27), date!(2016-03-01), Resolution::Day);
        let expected: Vec<i64> = [
            datetime!(2016-02-27 0:00 UTC),
            datetime!(2016-02-28 0:00 UTC),
            datetime!(2016-02-29 0:00 UTC),
            datetime!(2016-03-01 0:00 UTC),
        ]
        .into_iter()
        .map(ts)
        .collect();
        assert_eq!(times, expected);
    }

    #[test]
    fn single_day_axis() {
        assert_eq!(axis(date!(1970-01-01), date!(1970-01-01), Resolution::Day), vec![0]);
        assert_eq!(
            axis(date!(1970-01-01), date!(1970-01-01), Resolution::Hour).len(),
            24
        );
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(axis(date!(2014-01-02), date!(2014-01-01), Resolution::Hour).is_empty());
        assert!(axis(date!(2014-01-02), date!(2014-01-01), Resolution::Day).is_empty());
    }

    proptest! {
        #[test]
        fn day_floor_agrees_with_arithmetic(t in -10_000_000_000i64..10_000_000_000i64) {
            let floor = day_floor(t);
            prop_assert_eq!(floor, t.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY);
            prop_assert!(floor <= t && t - floor < SECONDS_PER_DAY);
        }

        #[test]
        fn every_hour_bucket_lands_on_a_day_axis_step(t in 0i64..4_000_000_000i64) {
            let key = bucket_key(hour_floor(t), Resolution::Day);
            let day = OffsetDateTime::from_unix_timestamp(t).unwrap().date();
            prop_assert_eq!(axis(day, day, Resolution::Day), vec![key]);
        }
    }
}
