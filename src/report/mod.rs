//! Reporting: summary entries, projection series, and terminal formatting.

pub mod format;
pub mod projection;
pub mod summary;

pub use format::*;
pub use projection::*;
pub use summary::*;
