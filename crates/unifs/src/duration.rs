//! Parsing of human-readable duration strings.
//!
//! The accepted form is `<integer><unit>`, e.g. `30s`, `500ms`, `2hours`.
//! Omitting the unit means milliseconds.

use std::time::Duration;

use crate::{Error, Result};

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * 60;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Parses a duration string.
///
/// Units: `d`/`day`/`days`, `h`/`hour`/`hours`, `m`/`min`/`mins`/`minute`/
/// `minutes`, `s`/`sec`/`secs`/`second`/`seconds`, `ms`/`milli`/`millis`/
/// `millisecond`/`milliseconds`, `µs`/`micro`/`micros`/`microsecond`/
/// `microseconds`, `ns`/`nano`/`nanos`/`nanosecond`/`nanoseconds`.
/// An unknown unit, a missing number, or an overflowing value is an
/// [`Error::InvalidDuration`].
pub fn parse_duration(value: &str) -> Result<Duration> {
    let invalid = || Error::InvalidDuration {
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(digits_end);
    if digits.is_empty() {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit {
        "d" | "day" | "days" => checked_seconds(amount, SECONDS_PER_DAY),
        "h" | "hour" | "hours" => checked_seconds(amount, SECONDS_PER_HOUR),
        "m" | "min" | "mins" | "minute" | "minutes" => {
            checked_seconds(amount, SECONDS_PER_MINUTE)
        }
        "s" | "sec" | "secs" | "second" | "seconds" => Some(Duration::from_secs(amount)),
        "" | "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => {
            checked_nanos(amount, NANOS_PER_MILLI)
        }
        "µs" | "micro" | "micros" | "microsecond" | "microseconds" => {
            checked_nanos(amount, NANOS_PER_MICRO)
        }
        "ns" | "nano" | "nanos" | "nanosecond" | "nanoseconds" => {
            Some(Duration::from_nanos(amount))
        }
        _ => return Err(invalid()),
    };
    duration.ok_or_else(invalid)
}

fn checked_seconds(amount: u64, scale: u64) -> Option<Duration> {
    amount.checked_mul(scale).map(Duration::from_secs)
}

fn checked_nanos(amount: u64, scale: u64) -> Option<Duration> {
    amount.checked_mul(scale).map(Duration::from_nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_units() {
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("3days").unwrap(), Duration::from_secs(259_200));
        assert_eq!(parse_duration("4h").unwrap(), Duration::from_secs(14_400));
        assert_eq!(parse_duration("5hours").unwrap(), Duration::from_secs(18_000));
        assert_eq!(parse_duration("6m").unwrap(), Duration::from_secs(360));
        assert_eq!(parse_duration("7mins").unwrap(), Duration::from_secs(420));
        assert_eq!(parse_duration("8minutes").unwrap(), Duration::from_secs(480));
        assert_eq!(parse_duration("9s").unwrap(), Duration::from_secs(9));
        assert_eq!(parse_duration("10secs").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("11seconds").unwrap(), Duration::from_secs(11));
        assert_eq!(parse_duration("12ms").unwrap(), Duration::from_millis(12));
        assert_eq!(parse_duration("13millis").unwrap(), Duration::from_millis(13));
        assert_eq!(parse_duration("14µs").unwrap(), Duration::from_micros(14));
        assert_eq!(parse_duration("15micros").unwrap(), Duration::from_micros(15));
        assert_eq!(parse_duration("16ns").unwrap(), Duration::from_nanos(16));
        assert_eq!(parse_duration("17nanoseconds").unwrap(), Duration::from_nanos(17));
    }

    #[test]
    fn missing_unit_is_milliseconds() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(matches!(
            parse_duration("5fortnights"),
            Err(Error::InvalidDuration { .. })
        ));
    }

    #[test]
    fn rejects_missing_number() {
        assert!(matches!(parse_duration("ms"), Err(Error::InvalidDuration { .. })));
        assert!(matches!(parse_duration(""), Err(Error::InvalidDuration { .. })));
    }

    #[test]
    fn rejects_negative_number() {
        assert!(matches!(parse_duration("-5s"), Err(Error::InvalidDuration { .. })));
    }

    #[test]
    fn rejects_overflow() {
        let too_many_days = format!("{}d", u64::MAX / 2);
        assert!(matches!(
            parse_duration(&too_many_days),
            Err(Error::InvalidDuration { .. })
        ));
    }
}
