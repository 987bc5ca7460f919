//! Logistic growth model.
//!
//! The model is implemented as small, pure functions so that the least-squares
//! and sampling backends share one implementation.

pub mod model;

pub use model::*;
