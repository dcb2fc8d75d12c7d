//! Input file discovery.
//!
//! Finds trip Parquet files under a local directory or an S3 prefix and
//! resolves each file's expected month and fleet category from its path.
//!
//! Layouts seen in the wild:
//! ```text
//! year=2023/month=01/yellow_tripdata_2023-01.parquet
//! trip data/green_tripdata_2019-07.parquet
//! fhv_tripdata_2015_03.parquet
//! ```

use crate::constants::{KNOWN_CATEGORIES, UNKNOWN_CATEGORY};
use crate::error::{PivotError, Result};
use crate::models::{DiscoveredFile, FileLocation, Period};
use crate::storage::{S3Store, parse_s3_uri};

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Period patterns, most specific first
static PERIOD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)year[=_]?(\d{4})[/_]month[=_]?(\d{1,2})",
        r"(?i)(\d{4})[-_](\d{1,2})(?:\.parquet|/|$)",
        r"(\d{4})[-_](\d{1,2})",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Infer the month a file covers from its identifier
pub fn infer_period(identifier: &str) -> Option<Period> {
    for pattern in PERIOD_PATTERNS.iter() {
        let Some(captures) = pattern.captures(identifier) else {
            continue;
        };
        let year = captures[1].parse::<i32>().ok()?;
        let month = captures[2].parse::<u32>().ok()?;
        if (1..=12).contains(&month) {
            return Some(Period::new(year, month));
        }
    }
    None
}

/// Fleet category named in the identifier, else `unknown`
pub fn infer_category(identifier: &str) -> String {
    let lowered = identifier.to_lowercase();
    KNOWN_CATEGORIES
        .iter()
        .find(|category| lowered.contains(*category))
        .map(|category| category.to_string())
        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
}

/// Standard-schema fleets sort first so the batch sample comes from them
fn category_rank(category: &str) -> u8 {
    match category {
        "yellow" | "green" => 0,
        _ => 1,
    }
}

/// Discovers trip files for one input
#[derive(Debug)]
pub struct FileDiscovery {
    input: String,
    marker: String,
    max_files: Option<usize>,
}

impl FileDiscovery {
    pub fn new(input: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            marker: marker.into(),
            max_files: None,
        }
    }

    pub fn with_max_files(mut self, max_files: Option<usize>) -> Self {
        self.max_files = max_files;
        self
    }

    /// Discover, order and truncate. Remote inputs need `store`.
    pub async fn discover(&self, store: Option<&S3Store>) -> Result<Vec<DiscoveredFile>> {
        let locations = match parse_s3_uri(&self.input) {
            Some((bucket, prefix)) => {
                let store = store.ok_or_else(|| {
                    PivotError::configuration("S3 input given but no S3 client available")
                })?;
                store
                    .list_parquet_keys(&bucket, &prefix)
                    .await?
                    .into_iter()
                    .map(|key| FileLocation::S3 {
                        bucket: bucket.clone(),
                        key,
                    })
                    .collect()
            }
            None => self
                .discover_local(Path::new(&self.input))?
                .into_iter()
                .map(FileLocation::Local)
                .collect(),
        };

        let files = self.resolve(locations);
        if files.is_empty() {
            return Err(PivotError::NoInputFiles {
                input: self.input.clone(),
            });
        }
        Ok(files)
    }

    /// Parquet files under a directory, or the single file given
    pub fn discover_local(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(PivotError::NoInputFiles {
                input: root.display().to_string(),
            });
        }
        if root.is_file() {
            return Ok(vec![root.to_path_buf()]);
        }

        debug!("Searching for parquet files in: {}", root.display());
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file() && is_parquet_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Keep trip files, infer their facts, order and truncate
    pub fn resolve(&self, locations: Vec<FileLocation>) -> Vec<DiscoveredFile> {
        let marker = self.marker.to_lowercase();
        let mut files: Vec<DiscoveredFile> = locations
            .into_iter()
            .filter(|location| location.to_string().to_lowercase().contains(&marker))
            .map(|location| {
                let identifier = location.to_string();
                let period = infer_period(&identifier);
                if period.is_none() {
                    warn!("No year/month in {}; period check disabled for it", identifier);
                }
                // the file name wins over directory names
                let mut category = infer_category(&location.file_name());
                if category == UNKNOWN_CATEGORY {
                    category = infer_category(&identifier);
                }
                DiscoveredFile {
                    period,
                    category,
                    location,
                }
            })
            .collect();

        files.sort_by(|a, b| {
            category_rank(&a.category)
                .cmp(&category_rank(&b.category))
                .then_with(|| a.location.cmp(&b.location))
        });

        if let Some(max) = self.max_files {
            if files.len() > max {
                info!("Limiting to first {} of {} files", max, files.len());
                files.truncate(max);
            }
        }

        info!("Discovered {} trip file(s) in {}", files.len(), self.input);
        files
    }
}

fn is_parquet_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
}
