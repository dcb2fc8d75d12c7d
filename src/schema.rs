//! Schema detection and normalization for heterogeneous trip files.
//!
//! Trip files from different years and fleets name the same facts differently
//! (`tpep_pickup_datetime`, `lpep_pickup_datetime`, `Trip_Pickup_DateTime`,
//! `PULocationID`, `Start_Lat`/`Start_Lon`, ...). The normalizer resolves a
//! file's column names against ordered alias tables and describes how to
//! project a batch onto the canonical `pickup_datetime` / `pickup_location`
//! pair used downstream.

use crate::constants::{
    LATITUDE_ALIASES, LOCATION_ALIASES, LOCATION_HEURISTICS, LONGITUDE_ALIASES, PICKUP_DATETIME,
    PICKUP_LOCATION, TIMESTAMP_ALIASES, TIMESTAMP_HEURISTICS,
};
use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

/// Why a file's columns could not be normalized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no pickup timestamp column among [{columns}]")]
    MissingTimestamp { columns: String },

    #[error("no pickup location or coordinate columns among [{columns}]")]
    MissingLocation { columns: String },
}

/// Where the canonical location comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationSource {
    /// A single zone/location id column
    Column(String),
    /// A latitude/longitude pair, each rounded to 3 decimals and printed in
    /// shortest form (`"40.75_-73.99"`)
    Coordinates { latitude: String, longitude: String },
}

/// Resolved mapping from a file's columns to the canonical shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSchema {
    pub timestamp: String,
    pub location: LocationSource,
}

impl NormalizedSchema {
    /// Source columns that must be read from the file
    pub fn source_columns(&self) -> Vec<String> {
        let mut columns = vec![self.timestamp.clone()];
        match &self.location {
            LocationSource::Column(name) => columns.push(name.clone()),
            LocationSource::Coordinates {
                latitude,
                longitude,
            } => {
                columns.push(latitude.clone());
                columns.push(longitude.clone());
            }
        }
        columns
    }

    /// Old-name to canonical-name mapping; empty when the schema is already canonical
    pub fn rename_map(&self) -> Vec<(String, String)> {
        let mut renames = Vec::new();
        if self.timestamp != PICKUP_DATETIME {
            renames.push((self.timestamp.clone(), PICKUP_DATETIME.to_string()));
        }
        if let LocationSource::Column(name) = &self.location {
            if name != PICKUP_LOCATION {
                renames.push((name.clone(), PICKUP_LOCATION.to_string()));
            }
        }
        renames
    }

    /// Project a raw batch onto the canonical two-column frame.
    ///
    /// The timestamp keeps its physical type; the location is always a string
    /// column, null where the source value was null.
    pub fn apply(&self, batch: &DataFrame) -> PolarsResult<DataFrame> {
        let timestamp = batch
            .column(&self.timestamp)?
            .as_materialized_series()
            .clone()
            .with_name(PICKUP_DATETIME.into());

        let location = match &self.location {
            LocationSource::Column(name) => batch
                .column(name)?
                .as_materialized_series()
                .cast(&DataType::String)?
                .with_name(PICKUP_LOCATION.into()),
            LocationSource::Coordinates {
                latitude,
                longitude,
            } => {
                let lat = batch
                    .column(latitude)?
                    .as_materialized_series()
                    .cast(&DataType::Float64)?;
                let lon = batch
                    .column(longitude)?
                    .as_materialized_series()
                    .cast(&DataType::Float64)?;
                let rendered: Vec<Option<String>> = lat
                    .f64()?
                    .into_iter()
                    .zip(lon.f64()?.into_iter())
                    .map(|pair| match pair {
                        (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                            Some(format!("{}_{}", render_coordinate(lat), render_coordinate(lon)))
                        }
                        _ => None,
                    })
                    .collect();
                Series::new(PICKUP_LOCATION.into(), rendered)
            }
        };

        DataFrame::new(vec![timestamp.into_column(), location.into_column()])
    }
}

/// Round to 3 decimals (ties to even, as numpy does) and print the shortest
/// decimal form, keeping a trailing `.0` on whole numbers: `40.7001` renders
/// as `40.7`, `-74.0` as `-74.0`.
fn render_coordinate(value: f64) -> String {
    let rounded = (value * 1000.0).round_ties_even() / 1000.0;
    let text = rounded.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Resolves timestamp and location columns from alias tables
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaNormalizer;

impl SchemaNormalizer {
    /// Resolve a file's column names. Pure over schema metadata.
    pub fn normalize<S: AsRef<str>>(columns: &[S]) -> Result<NormalizedSchema, SchemaError> {
        let names: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();

        let timestamp = find_column(&names, TIMESTAMP_ALIASES, TIMESTAMP_HEURISTICS).ok_or_else(
            || SchemaError::MissingTimestamp {
                columns: names.join(", "),
            },
        )?;

        let location = match find_column(&names, LOCATION_ALIASES, LOCATION_HEURISTICS) {
            Some(column) => LocationSource::Column(column),
            None => find_coordinates(&names).ok_or_else(|| SchemaError::MissingLocation {
                columns: names.join(", "),
            })?,
        };

        let schema = NormalizedSchema {
            timestamp,
            location,
        };
        debug!("Normalized schema: {:?}", schema);
        Ok(schema)
    }
}

/// Exact case-insensitive alias match in alias priority order, then substring heuristics
fn find_column(names: &[&str], aliases: &[&str], heuristics: &[(&str, &[&str])]) -> Option<String> {
    let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();

    for alias in aliases {
        if let Some(idx) = lowered.iter().position(|n| n == alias) {
            return Some(names[idx].to_string());
        }
    }

    for (anchor, terms) in heuristics {
        if let Some(idx) = lowered
            .iter()
            .position(|n| n.contains(anchor) && terms.iter().any(|t| n.contains(t)))
        {
            return Some(names[idx].to_string());
        }
    }

    None
}

fn find_coordinates(names: &[&str]) -> Option<LocationSource> {
    let pick = |aliases: &[&str]| {
        names
            .iter()
            .find(|n| aliases.contains(&n.to_lowercase().as_str()))
            .map(|n| n.to_string())
    };
    Some(LocationSource::Coordinates {
        latitude: pick(LATITUDE_ALIASES)?,
        longitude: pick(LONGITUDE_ALIASES)?,
    })
}
