//! Parsing of human-readable duration strings.
//!
//! Timeouts are given on the command line in the compact form used by most
//! network tools: a sequence of decimal numbers, each with an optional
//! fraction and a mandatory unit suffix.
//!
//! ```
//! use tether_core::parse_duration;
//! use std::time::Duration;
//!
//! assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
//! assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
//! assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
//! assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
//! ```
//!
//! Supported units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is
//! accepted without a unit. Negative durations are rejected.

use std::time::Duration;

use crate::{Error, Result};

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Fractions longer than this are truncated; beyond it they are below 1ns
/// for every supported unit.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a duration string such as `"10s"`, `"1m30s"` or `"250ms"`.
///
/// # Errors
///
/// Returns `Error::InvalidDuration` if the string is empty, negative, has a
/// number without a unit, uses an unknown unit, or overflows.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let invalid = |reason: &str| Error::InvalidDuration(format!("{reason}: {input:?}"));

    if s.is_empty() {
        return Err(invalid("empty duration"));
    }
    if s.starts_with('-') {
        return Err(invalid("negative duration"));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() {
            return Err(invalid("expected number"));
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_nanos = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid("malformed number"));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("number out of range"))?
        };
        let mut nanos = whole
            .checked_mul(unit_nanos)
            .ok_or_else(|| invalid("duration out of range"))?;

        let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
        if !fraction.is_empty() {
            let numerator: u128 = fraction.parse().map_err(|_| invalid("malformed number"))?;
            let scale = 10u128.pow(fraction.len() as u32);
            nanos += numerator * unit_nanos / scale;
        }

        total = total
            .checked_add(nanos)
            .ok_or_else(|| invalid("duration out of range"))?;
        rest = tail;
    }

    let total = u64::try_from(total).map_err(|_| invalid("duration out of range"))?;
    Ok(Duration::from_nanos(total))
}
