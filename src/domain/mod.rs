//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observed series (`TimeSeries`, `Observation`)
//! - the growth parameters and their log-space encoding (`GrowthParams`, `LogParams`)
//! - estimator configuration (`PriorConfig`, `SamplerConfig`, `FitConfig`)
//! - fit and summary outputs (`PointFit`, `CountrySummary`, etc.)

pub mod types;

pub use types::*;
