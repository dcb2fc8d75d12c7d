//! Pickup timestamp decoding.
//!
//! Trip files store the pickup time as a native datetime, a date, a string in
//! one of several layouts, or an epoch number. Everything is decoded to a
//! naive `NaiveDateTime`; a value that cannot be decoded becomes `None` and is
//! counted as a parse failure by the caller.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

/// String layouts tried in order after RFC 3339
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Epoch magnitudes above this are milliseconds (about 2286-11-20 in seconds)
const MAX_EPOCH_SECONDS: i64 = 10_000_000_000;
/// Above this they are microseconds
const MAX_EPOCH_MILLIS: i64 = 10_000_000_000_000;
/// Above this they are nanoseconds
const MAX_EPOCH_MICROS: i64 = 10_000_000_000_000_000;

/// Decode a timestamp column into naive datetimes, preserving row order
pub fn decode_timestamps(series: &Series) -> PolarsResult<Vec<Option<NaiveDateTime>>> {
    let decoded = match series.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let physical = series.cast(&DataType::Int64)?;
            physical
                .i64()?
                .into_iter()
                .map(|value| value.and_then(|v| from_unit(v, unit)))
                .collect()
        }
        DataType::Date => {
            let days = series.cast(&DataType::Int32)?;
            days.i32()?
                .into_iter()
                .map(|value| value.and_then(from_epoch_days))
                .collect()
        }
        DataType::String => series
            .str()?
            .into_iter()
            .map(|value| value.and_then(parse_timestamp_str))
            .collect(),
        dtype if dtype.is_integer() => {
            let values = series.cast(&DataType::Int64)?;
            values
                .i64()?
                .into_iter()
                .map(|value| value.and_then(from_epoch_number))
                .collect()
        }
        dtype if dtype.is_float() => {
            let values = series.cast(&DataType::Float64)?;
            values
                .f64()?
                .into_iter()
                .map(|value| {
                    value
                        .filter(|v| v.is_finite())
                        .and_then(|v| from_epoch_number(v.trunc() as i64))
                })
                .collect()
        }
        _ => vec![None; series.len()],
    };
    Ok(decoded)
}

/// Parse one textual timestamp. Timezone-aware values are converted to UTC.
pub fn parse_timestamp_str(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}

fn from_unit(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let parsed = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
    };
    parsed.map(|dt| dt.naive_utc())
}

fn from_epoch_days(days: i32) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(i64::from(days) * 86_400, 0).map(|dt| dt.naive_utc())
}

/// Numeric epochs: the magnitude decides the unit
fn from_epoch_number(value: i64) -> Option<NaiveDateTime> {
    let magnitude = value.unsigned_abs();
    let parsed = if magnitude < MAX_EPOCH_SECONDS as u64 {
        DateTime::from_timestamp(value, 0)
    } else if magnitude < MAX_EPOCH_MILLIS as u64 {
        DateTime::from_timestamp_millis(value)
    } else if magnitude < MAX_EPOCH_MICROS as u64 {
        DateTime::from_timestamp_micros(value)
    } else {
        Some(DateTime::from_timestamp_nanos(value))
    };
    parsed.map(|dt| dt.naive_utc())
}
