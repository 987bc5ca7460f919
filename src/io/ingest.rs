//! CSV ingest of the cumulative case matrix.
//!
//! Expected layout: a `date` column followed by one column per country, each
//! cell a cumulative count:
//!
//! ```text
//! date,Italy,South Korea
//! 2020-01-22,0,1
//! 2020-01-23,0,1
//! ```
//!
//! Design goals:
//! - **Strict schema** for the header (clear errors + exit code 2)
//! - **Row-level validation** (skip bad cells, but report what happened)
//! - **Deterministic behavior**: rows are sorted by date, columns keep file order

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use log::warn;

use crate::domain::{Observation, TimeSeries};
use crate::error::AppError;

/// A row-level problem encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    /// Country column the problem is in, if it is cell-specific.
    pub country: Option<String>,
    pub message: String,
}

/// Ingest output: one series per country column, plus what was skipped.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub series: Vec<TimeSeries>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

impl IngestedData {
    /// Series for the requested countries, in request order; all series when
    /// `countries` is empty.
    pub fn select(&self, countries: &[String]) -> Result<Vec<TimeSeries>, AppError> {
        if countries.is_empty() {
            return Ok(self.series.clone());
        }
        countries
            .iter()
            .map(|name| {
                self.series
                    .iter()
                    .find(|s| s.country == *name)
                    .cloned()
                    .ok_or_else(|| AppError::new(2, format!("Country `{name}` is not a column of the input CSV.")))
            })
            .collect()
    }
}

/// Load the case matrix from a CSV file.
pub fn load_case_matrix(path: &Path) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_case_matrix(file)
}

/// Parse the case matrix from any reader.
pub fn read_case_matrix<R: Read>(input: R) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let countries = country_columns(&headers)?;

    let mut rows: Vec<(usize, NaiveDate, StringRecord)> = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header is line 1, records() is 0-based
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    country: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match record.get(0).map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => match parse_date(raw) {
                Ok(date) => rows.push((line, date, record)),
                Err(message) => row_errors.push(RowError {
                    line,
                    country: None,
                    message,
                }),
            },
            None => row_errors.push(RowError {
                line,
                country: None,
                message: "Missing required value: `date`".to_string(),
            }),
        }
    }

    // Upstream files are not always in date order.
    rows.sort_by_key(|(line, date, _)| (*date, *line));

    let mut observations: Vec<Vec<Observation>> = vec![Vec::new(); countries.len()];
    let mut seen = HashSet::new();
    let mut rows_used = 0usize;
    for (line, date, record) in &rows {
        if !seen.insert(*date) {
            row_errors.push(RowError {
                line: *line,
                country: None,
                message: format!("Duplicate date {date}; keeping the earlier row."),
            });
            continue;
        }
        rows_used += 1;

        for (col, country) in countries.iter().enumerate() {
            match parse_count(record.get(col + 1)) {
                Ok(count) => observations[col].push(Observation { date: *date, count }),
                Err(message) => row_errors.push(RowError {
                    line: *line,
                    country: Some(country.clone()),
                    message,
                }),
            }
        }
    }

    if rows_used == 0 {
        return Err(AppError::new(3, "No valid rows in the input CSV."));
    }
    if !row_errors.is_empty() {
        warn!("{} row problems during ingest; affected cells were skipped", row_errors.len());
    }
    row_errors.sort_by_key(|e| e.line);

    let series = countries
        .into_iter()
        .zip(observations)
        .map(|(country, obs)| TimeSeries::new(country, obs))
        .collect();

    Ok(IngestedData {
        series,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn country_columns(headers: &StringRecord) -> Result<Vec<String>, AppError> {
    let first = headers.get(0).map(normalize_header_name).unwrap_or_default();
    if first != "date" {
        return Err(AppError::new(2, "The first CSV column must be `date`."));
    }

    let mut countries = Vec::new();
    for name in headers.iter().skip(1) {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::new(2, "CSV header has an empty country name."));
        }
        if countries.iter().any(|c| c == name) {
            return Err(AppError::new(2, format!("Duplicate country column: `{name}`")));
        }
        countries.push(name.to_string());
    }
    if countries.is_empty() {
        return Err(AppError::new(2, "CSV has no country columns."));
    }
    Ok(countries)
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    // ISO first, then the US month-first style of the public case files.
    const FMTS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!("Invalid date '{s}'. Expected one of: YYYY-MM-DD, M/D/YY, M/D/YYYY."))
}

fn parse_count(s: Option<&str>) -> Result<f64, String> {
    let s = s.map(str::trim).filter(|s| !s.is_empty()).ok_or("Missing count.")?;
    let v = s
        .parse::<f64>()
        .map_err(|_| format!("Invalid count '{s}'."))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("Count must be finite and non-negative, got '{s}'."));
    }
    Ok(v)
}
