//! Bar feed loading from CSV.
//!
//! Expected header: `timestamp` (or `date`), `open`, `high`, `low`, `close`,
//! and optionally `volume`. Empty price cells load as NaN (void bars). Rows
//! are returned in file order; ordering is checked by the engine, never fixed
//! here.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use stratlab_core::Bar;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: cannot parse timestamp '{value}'")]
    Timestamp { row: usize, value: String },
    #[error("no bars in input")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    #[serde(alias = "date", alias = "Date", alias = "Timestamp", alias = "datetime")]
    timestamp: String,
    #[serde(alias = "Open")]
    open: Option<f64>,
    #[serde(alias = "High")]
    high: Option<f64>,
    #[serde(alias = "Low")]
    low: Option<f64>,
    #[serde(alias = "Close")]
    close: Option<f64>,
    #[serde(default, alias = "Volume")]
    volume: Option<f64>,
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a date, naive datetime, or RFC 3339 timestamp (converted to UTC).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// Read bars from any CSV source.
pub fn read_bars_csv<R: io::Read>(reader: R) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();
    for (i, row) in rdr.deserialize::<RawBar>().enumerate() {
        let raw = row?;
        let timestamp = parse_timestamp(&raw.timestamp).ok_or_else(|| LoadError::Timestamp {
            row: i + 1,
            value: raw.timestamp.clone(),
        })?;
        let bar = Bar {
            timestamp,
            open: raw.open.unwrap_or(f64::NAN),
            high: raw.high.unwrap_or(f64::NAN),
            low: raw.low.unwrap_or(f64::NAN),
            close: raw.close.unwrap_or(f64::NAN),
            volume: raw.volume.unwrap_or(0.0),
        };
        bars.push(bar);
    }
    if bars.is_empty() {
        return Err(LoadError::Empty);
    }
    let (void_rows, insane_rows) = suspect_rows(&bars);
    if void_rows > 0 {
        warn!(void_rows, total = bars.len(), "input contains void bars");
    }
    if insane_rows > 0 {
        warn!(insane_rows, total = bars.len(), "input contains bars with inconsistent OHLC");
    }
    debug!(bars = bars.len(), "loaded bars");
    Ok(bars)
}

/// Counts of void rows and of priced rows failing the OHLC sanity check.
fn suspect_rows(bars: &[Bar]) -> (usize, usize) {
    bars.iter().fold((0, 0), |(void, insane), bar| {
        if bar.is_void() {
            (void + 1, insane)
        } else if !bar.is_sane() {
            (void, insane + 1)
        } else {
            (void, insane)
        }
    })
}

/// Read bars from a CSV file.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_bars_csv(io::BufReader::new(file))
}
