//! Write the site's `_data/data.yaml` summary record.
//!
//! The layout is fixed because the site templates read it directly:
//!
//! ```text
//! lastupdate: Mar 15, 2020
//!
//! infections:
//!         Italy: 1.50 million (1.80, 1.20)
//!
//! peakdate:
//!         Italy: Mar 20, 2020
//! ```
//!
//! An `unreliable:` list follows when any entry came from poorly mixed chains.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use crate::domain::{CountrySummary, SummaryConfig};
use crate::error::AppError;
use crate::report::format_plateau;

const INDENT: &str = "        ";

/// Render the record for `summaries` (in the given order).
pub fn render_summary_yaml(
    summaries: &[CountrySummary],
    config: &SummaryConfig,
    last_update: NaiveDate,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "lastupdate: {}", last_update.format(&config.date_format));
    out.push('\n');

    out.push_str("infections:\n");
    for s in summaries {
        let _ = writeln!(
            out,
            "{INDENT}{}: {}",
            s.key(),
            format_plateau(&s.plateau, config.large_number_threshold)
        );
    }
    out.push('\n');

    out.push_str("peakdate:\n");
    for s in summaries {
        let _ = writeln!(out, "{INDENT}{}: {}", s.key(), s.peak_label);
    }

    let unreliable: Vec<String> = summaries.iter().filter(|s| !s.reliable).map(|s| s.key()).collect();
    if !unreliable.is_empty() {
        out.push('\n');
        out.push_str("unreliable:\n");
        for key in unreliable {
            let _ = writeln!(out, "{INDENT}- {key}");
        }
    }
    out
}

/// Write the record, creating parent directories as needed.
pub fn write_summary_yaml(
    path: &Path,
    summaries: &[CountrySummary],
    config: &SummaryConfig,
    last_update: NaiveDate,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::new(2, format!("Failed to create directory '{}': {e}", parent.display()))
        })?;
    }
    fs::write(path, render_summary_yaml(summaries, config, last_update))
        .map_err(|e| AppError::new(2, format!("Failed to write summary '{}': {e}", path.display())))
}
