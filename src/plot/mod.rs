//! Chart output: ASCII for the terminal, SVG embeds for the site.

pub mod ascii;
pub mod chart;

pub use ascii::render_projection_ascii;
pub use chart::*;
