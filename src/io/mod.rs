//! Input/output helpers.
//!
//! - CSV case-matrix ingest + validation (`ingest`)
//! - TOML run configuration (`config`)
//! - the site's YAML summary record (`summary_yaml`)
//! - projection JSON read/write (`export`)

pub mod config;
pub mod export;
pub mod ingest;
pub mod summary_yaml;

pub use config::*;
pub use export::*;
pub use ingest::*;
pub use summary_yaml::*;
