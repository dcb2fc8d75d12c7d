//! Hourly count accumulation and the long-to-wide pivot.
//!
//! Counts are kept per `(date, location, hour)` for the whole file so batch
//! boundaries never split a bucket. The pivot folds the 24 hours of each
//! `(date, location)` into one [`WideRow`]; rows below the trip threshold are
//! dropped before anything is materialized as a frame.

use crate::constants::{
    CATEGORY_COLUMN, DATE_COLUMN, HOUR_COLUMNS, HOURS_PER_DAY, LOCATION_COLUMN,
};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// One `(category, date, location)` row with its 24 hourly counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideRow {
    pub category: String,
    pub date: NaiveDate,
    pub location: String,
    pub hours: [u64; HOURS_PER_DAY],
}

impl WideRow {
    pub fn total(&self) -> u64 {
        self.hours.iter().sum()
    }
}

/// Result of the low-count filter
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub kept: Vec<WideRow>,
    /// Wide rows removed
    pub dropped_rows: u64,
    /// Trips contained in the removed rows
    pub dropped_trips: u64,
}

impl FilterOutcome {
    pub fn kept_trips(&self) -> u64 {
        self.kept.iter().map(WideRow::total).sum()
    }
}

/// Running per-bucket trip counts for one file.
///
/// Buckets are grouped by location so a row for an already seen location
/// costs a lookup, not a `String` allocation.
#[derive(Debug, Default)]
pub struct HourlyCounts {
    counts: HashMap<String, HashMap<(NaiveDate, u32), u64>>,
    total: u64,
}

impl HourlyCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, date: NaiveDate, location: &str, hour: u32) {
        if let Some(slots) = self.counts.get_mut(location) {
            *slots.entry((date, hour)).or_insert(0) += 1;
        } else {
            self.counts
                .entry(location.to_string())
                .or_default()
                .insert((date, hour), 1);
        }
        self.total += 1;
    }

    /// Number of distinct `(date, location, hour)` buckets
    pub fn buckets(&self) -> usize {
        self.counts.values().map(HashMap::len).sum()
    }


    /// Trips recorded so far
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Pivot to wide rows sorted by `(date, location)`; absent hours are zero.
    pub fn pivot(self, category: &str) -> Vec<WideRow> {
        let mut grouped: BTreeMap<(NaiveDate, String), [u64; HOURS_PER_DAY]> = BTreeMap::new();
        for (location, slots) in self.counts {
            for ((date, hour), count) in slots {
                let hours = grouped
                    .entry((date, location.clone()))
                    .or_insert([0; HOURS_PER_DAY]);
                hours[hour as usize] += count;
            }
        }

        grouped
            .into_iter()
            .map(|((date, location), hours)| WideRow {
                category: category.to_string(),
                date,
                location,
                hours,
            })
            .collect()
    }
}

/// Drop rows whose hour sum is below `min_rides`. A row with exactly
/// `min_rides` trips is kept.
pub fn filter_low_counts(rows: Vec<WideRow>, min_rides: u64) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for row in rows {
        let total = row.total();
        if total >= min_rides {
            outcome.kept.push(row);
        } else {
            outcome.dropped_rows += 1;
            outcome.dropped_trips += total;
        }
    }
    outcome
}

/// Materialize wide rows as a 27-column frame in the durable column order.
pub fn wide_rows_to_frame(rows: &[WideRow]) -> PolarsResult<DataFrame> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();

    let categories: Vec<&str> = rows.iter().map(|r| r.category.as_str()).collect();
    let days: Vec<i32> = rows
        .iter()
        .map(|r| r.date.num_days_from_ce() - epoch.num_days_from_ce())
        .collect();
    let locations: Vec<&str> = rows.iter().map(|r| r.location.as_str()).collect();

    let mut columns = Vec::with_capacity(3 + HOURS_PER_DAY);
    columns.push(Series::new(CATEGORY_COLUMN.into(), categories).into_column());
    columns.push(
        Series::new(DATE_COLUMN.into(), days)
            .cast(&DataType::Date)?
            .into_column(),
    );
    columns.push(Series::new(LOCATION_COLUMN.into(), locations).into_column());
    for (hour, name) in HOUR_COLUMNS.iter().enumerate() {
        let values: Vec<u64> = rows.iter().map(|r| r.hours[hour]).collect();
        columns.push(Series::new((*name).into(), values).into_column());
    }

    DataFrame::new(columns)
}

/// Read wide rows back from a frame with the wide-table layout.
pub fn frame_to_wide_rows(df: &DataFrame) -> PolarsResult<Vec<WideRow>> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let categories = df.column(CATEGORY_COLUMN)?.as_materialized_series().clone();
    let dates = df
        .column(DATE_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::Int32)?;
    let locations = df.column(LOCATION_COLUMN)?.as_materialized_series().clone();
    let mut hours = Vec::with_capacity(HOURS_PER_DAY);
    for name in HOUR_COLUMNS {
        hours.push(
            df.column(name)?
                .as_materialized_series()
                .cast(&DataType::UInt64)?,
        );
    }

    let categories = categories.str()?;
    let dates = dates.i32()?;
    let locations = locations.str()?;
    let hour_values: Vec<&UInt64Chunked> = hours
        .iter()
        .map(|s| s.u64())
        .collect::<PolarsResult<_>>()?;

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let mut row_hours = [0u64; HOURS_PER_DAY];
        for (hour, values) in hour_values.iter().enumerate() {
            row_hours[hour] = values.get(idx).unwrap_or(0);
        }
        let days = dates.get(idx).unwrap_or(0);
        rows.push(WideRow {
            category: categories.get(idx).unwrap_or_default().to_string(),
            date: epoch + chrono::Duration::days(days as i64),
            location: locations.get(idx).unwrap_or_default().to_string(),
            hours: row_hours,
        });
    }
    Ok(rows)
}
