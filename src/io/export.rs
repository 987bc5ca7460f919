//! Read/write projection JSON files.
//!
//! The projection file is the portable form of a run's curves:
//! - which pipeline produced it, and when
//! - per country: observed points, central curve, optional 90/10 band
//!
//! It is what `epi plot --projection` reads back.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::report::Projection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionFile {
    pub tool: String,
    /// `point` or `posterior`.
    pub pipeline: String,
    pub generated: NaiveDate,
    pub projections: Vec<Projection>,
}

/// Write a projection JSON file.
pub fn write_projection_json(path: &Path, file: &ProjectionFile) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::new(2, format!("Failed to create directory '{}': {e}", parent.display()))
        })?;
    }
    let out = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create projection JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(out, file)
        .map_err(|e| AppError::new(2, format!("Failed to write projection JSON: {e}")))
}

/// Read a projection JSON file.
pub fn read_projection_json(path: &Path) -> Result<ProjectionFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open projection JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid projection JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Band;

    #[test]
    fn write_then_read_keeps_structure() {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let file = ProjectionFile {
            tool: "epi".to_string(),
            pipeline: "posterior".to_string(),
            generated: start,
            projections: vec![Projection {
                country: "Italy".to_string(),
                start_date: start,
                observed_days: vec![0.0, 1.0],
                observed: vec![10.0, 20.0],
                days: vec![0.0, 1.0, 2.0],
                central: vec![10.0, 20.0, 30.0],
                band: Some(Band {
                    upper: vec![12.0, 24.0, 36.0],
                    lower: vec![8.0, 16.0, 24.0],
                }),
                ensemble: Vec::new(),
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("projection.json");
        write_projection_json(&path, &file).unwrap();
        let back = read_projection_json(&path).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn invalid_json_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(read_projection_json(&path).unwrap_err().exit_code(), 2);
    }
}
