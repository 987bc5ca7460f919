//! Mathematical utilities: least squares, descriptive statistics, log densities.

pub mod density;
pub mod ols;
pub mod stats;

pub use density::*;
pub use ols::*;
pub use stats::*;
