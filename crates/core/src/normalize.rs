use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use thiserror::Error;

use crate::config::{AccountConfig, ColumnType};

/// A coerced cell. `Null` marks an absent or unparseable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Numeric(f64),
    /// Epoch seconds.
    Epoch(i64),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Stable textual form used for hashing. Whole floats keep one decimal (`42.0`).
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "None"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Numeric(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 => {
                write!(f, "{n:.1}")
            }
            CellValue::Numeric(n) => write!(f, "{n}"),
            CellValue::Epoch(secs) => write!(f, "{secs}"),
        }
    }
}

pub fn type_of(column: &str, column_types: &HashMap<String, ColumnType>) -> ColumnType {
    column_types.get(column).copied().unwrap_or_default()
}

/// Convert one raw CSV cell. Pure in `(raw, ty)`; failures degrade to `Null`.
/// Only an empty cell is `Null` for TEXT; whitespace is kept as written.
pub fn coerce(raw: &str, ty: ColumnType) -> CellValue {
    if raw.is_empty() {
        return CellValue::Null;
    }
    match ty {
        ColumnType::Text => CellValue::Text(raw.to_string()),
        ColumnType::Numeric => coerce_numeric(raw).map_or(CellValue::Null, CellValue::Numeric),
        ColumnType::Datetime => coerce_datetime(raw).map_or(CellValue::Null, CellValue::Epoch),
    }
}

fn re_non_numeric() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"[^0-9.\-]").expect("invalid regex"))
}

fn coerce_numeric(raw: &str) -> Option<f64> {
    re_non_numeric().replace_all(raw, "").parse::<f64>().ok()
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Parse a date or date-time, returning the written wall-clock value and,
/// for offset-carrying input, the matching UTC value.
fn parse_datetime(raw: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some((dt.naive_local(), dt.naive_utc()));
    }

    let plausible = |d: &NaiveDate| d.year() >= 1000;

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            if plausible(&dt.date()) {
                return Some((dt, dt));
            }
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            // Two-digit years must come through %y, not %Y.
            if plausible(&d) {
                let dt = d.and_time(chrono::NaiveTime::MIN);
                return Some((dt, dt));
            }
        }
    }
    None
}

/// Fixed North American offset: 4 h for April through October, 5 h otherwise.
/// Not calendar-accurate around the daylight-saving transitions.
pub fn utc_offset_hours(month: u32) -> i64 {
    if (4..=10).contains(&month) {
        4
    } else {
        5
    }
}

fn coerce_datetime(raw: &str) -> Option<i64> {
    let (local, utc) = parse_datetime(raw)?;
    let shifted = utc + TimeDelta::hours(utc_offset_hours(local.month()));
    Some(shifted.and_utc().timestamp())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header row {header_row} is past the end of the file ({rows} rows)")]
    HeaderRowOutOfRange { header_row: usize, rows: usize },
    #[error("Row {row} has {cells} cells but only {columns} columns are configured")]
    RowTooWide { row: usize, cells: usize, columns: usize },
}

/// Named columns plus the data rows beneath them, still as raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Apply the account's header rule to raw CSV rows.
///
/// Configured `headers` name every row's cells and no row is consumed.
/// Otherwise row `header_row - 1` supplies the names and it, together with
/// every row above it, is dropped. Columns with a blank name are removed.
/// Short rows are padded with empty cells.
pub fn normalize_header(raw: Vec<Vec<String>>, config: &AccountConfig) -> Result<Table, HeaderError> {
    let (names, data, strict) = match config.explicit_headers() {
        Some(headers) => (headers.to_vec(), raw, true),
        None => {
            let idx = config.header_row.saturating_sub(1);
            if idx >= raw.len() {
                return Err(HeaderError::HeaderRowOutOfRange {
                    header_row: config.header_row,
                    rows: raw.len(),
                });
            }
            let mut rows = raw.into_iter().skip(idx);
            let names = rows.next().unwrap_or_default();
            (names, rows.collect(), false)
        }
    };

    let kept: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.trim().is_empty())
        .map(|(i, _)| i)
        .collect();

    let mut rows = Vec::with_capacity(data.len());
    for (n, row) in data.into_iter().enumerate() {
        if strict && row.len() > names.len() {
            return Err(HeaderError::RowTooWide {
                row: n + 1,
                cells: row.len(),
                columns: names.len(),
            });
        }
        rows.push(
            kept.iter()
                .map(|&i| row.get(i).cloned().unwrap_or_default())
                .collect(),
        );
    }

    Ok(Table {
        columns: kept.iter().map(|&i| names[i].clone()).collect(),
        rows,
    })
}
