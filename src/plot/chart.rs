//! SVG chart embeds for the site.
//!
//! Each chart is rendered with Plotters' SVG backend into a string and wrapped
//! in a `<div>` so the site templates can `{% include %}` it verbatim:
//!
//! - `_includes/<Key>_infections_embed.html`: one country, linear axis,
//!   observed circles, solid fit over the observed days, dashed projection
//! - `_includes/infections_embed.html`: every country, log axis
//!
//! All styling comes from an explicit [`ChartTheme`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use serde::Deserialize;

use crate::domain::country_key;
use crate::error::AppError;
use crate::report::Projection;

type DrawResult<T> = Result<T, DrawingAreaErrorKind<std::io::Error>>;

const CAPTION_HEIGHT: u32 = 24;

/// Rendering settings shared by every chart of a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChartTheme {
    pub width: u32,
    pub height: u32,
    /// Hex colors (`#rrggbb`); countries cycle through them in the overview.
    pub palette: Vec<String>,
    /// Name in the `Created by ... on ...` caption.
    pub author: String,
}

impl Default for ChartTheme {
    fn default() -> Self {
        Self {
            width: 800,
            height: 500,
            // Colorblind-friendly set from Paul Tol.
            palette: ["#228833", "#ee6677", "#4477aa", "#aa3377", "#ccbb44", "#aaaaaa", "#66ccee"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            author: "epi-curves".to_string(),
        }
    }
}

impl ChartTheme {
    /// Parse the palette, rejecting empty or malformed entries.
    pub fn colors(&self) -> Result<Vec<RGBColor>, AppError> {
        if self.palette.is_empty() {
            return Err(AppError::new(2, "Chart palette must contain at least one color."));
        }
        self.palette.iter().map(|s| parse_hex_color(s)).collect()
    }

    fn caption(&self, created: NaiveDate) -> String {
        format!("Created by {} on {}", self.author, created.format("%b %d, %Y"))
    }
}

/// Parse `#rrggbb` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Result<RGBColor, AppError> {
    let hex = s.trim().trim_start_matches('#');
    let bad = || AppError::new(2, format!("Invalid chart color `{s}` (expected #rrggbb)."));
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(bad());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad());
    Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// Render one country's chart as an SVG document.
pub fn render_country_svg(
    projection: &Projection,
    theme: &ChartTheme,
    created: NaiveDate,
) -> Result<String, AppError> {
    let colors = theme.colors()?;
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (theme.width, theme.height)).into_drawing_area();
        draw_country(&root, projection, colors[0], &theme.caption(created), theme.height)
            .and_then(|()| root.present())
            .map_err(|e| render_error(&projection.country, e))?;
    }
    Ok(svg)
}

/// Render the log-scale overview of every projection as an SVG document.
pub fn render_overview_svg(
    projections: &[Projection],
    theme: &ChartTheme,
    created: NaiveDate,
) -> Result<String, AppError> {
    let colors = theme.colors()?;
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (theme.width, theme.height)).into_drawing_area();
        draw_overview(&root, projections, &colors, &theme.caption(created), theme.height)
            .and_then(|()| root.present())
            .map_err(|e| render_error("overview", e))?;
    }
    Ok(svg)
}

/// Wrap an SVG document so it can be included in a page.
pub fn embed_html(id: &str, svg: &str) -> String {
    format!("<div class=\"epi-chart\" id=\"{id}\">\n{svg}\n</div>\n")
}

/// Write every per-country embed plus the overview into `<out_dir>/_includes`.
///
/// Returns the written paths, overview last.
pub fn write_chart_embeds(
    out_dir: &Path,
    projections: &[Projection],
    theme: &ChartTheme,
    created: NaiveDate,
) -> Result<Vec<PathBuf>, AppError> {
    let dir = out_dir.join("_includes");
    fs::create_dir_all(&dir)
        .map_err(|e| AppError::new(2, format!("Failed to create directory '{}': {e}", dir.display())))?;

    let mut written = Vec::with_capacity(projections.len() + 1);
    for p in projections {
        let key = country_key(&p.country);
        let svg = render_country_svg(p, theme, created)?;
        let path = dir.join(format!("{key}_infections_embed.html"));
        write_embed(&path, &embed_html(&key, &svg))?;
        written.push(path);
    }

    let svg = render_overview_svg(projections, theme, created)?;
    let path = dir.join("infections_embed.html");
    write_embed(&path, &embed_html("infections", &svg))?;
    written.push(path);

    log::debug!("Wrote {} chart embeds to {}", written.len(), dir.display());
    Ok(written)
}

fn write_embed(path: &Path, html: &str) -> Result<(), AppError> {
    fs::write(path, html).map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))
}

fn render_error(what: &str, e: DrawingAreaErrorKind<std::io::Error>) -> AppError {
    AppError::new(4, format!("Failed to render chart for {what}: {e}"))
}

fn draw_country(
    root: &DrawingArea<SVGBackend<'_>, Shift>,
    p: &Projection,
    color: RGBColor,
    caption: &str,
    height: u32,
) -> DrawResult<()> {
    root.fill(&WHITE)?;
    let (plot_area, footer) = root.split_vertically(height.saturating_sub(CAPTION_HEIGHT));

    let x_max = p.days.last().copied().unwrap_or(1.0).max(1.0);
    let y_max = p
        .central
        .iter()
        .chain(&p.observed)
        .chain(p.band.iter().flat_map(|b| b.upper.iter()))
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.05 } else { 1.0 };

    let start = p.start_date;
    let mut chart = ChartBuilder::on(&plot_area)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_max, 0.0..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(6)
        .y_labels(6)
        .x_label_formatter(&|d| day_label(start, *d))
        .y_label_formatter(&|v| axis_count(*v))
        .draw()?;

    let last = p.last_observed_day();
    let projected = p.days.iter().copied().zip(p.central.iter().copied());
    chart.draw_series(DashedLineSeries::new(projected, 8, 4, color.stroke_width(2)))?;

    if let Some(band) = &p.band {
        for edge in [&band.upper, &band.lower] {
            let pts = p.days.iter().copied().zip(edge.iter().copied());
            chart.draw_series(DashedLineSeries::new(pts, 4, 4, color.mix(0.5).stroke_width(1)))?;
        }
    }

    let fitted = p
        .days
        .iter()
        .copied()
        .zip(p.central.iter().copied())
        .filter(|&(d, _)| d <= last);
    chart
        .draw_series(LineSeries::new(fitted, color.stroke_width(2)))?
        .label(p.country.as_str())
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

    chart.draw_series(
        p.observed_days
            .iter()
            .zip(&p.observed)
            .map(|(&d, &y)| Circle::new((d, y), 3, color.filled())),
    )?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    footer.draw(&Text::new(caption.to_string(), (10, 4), ("sans-serif", 12).into_font()))?;
    Ok(())
}

fn draw_overview(
    root: &DrawingArea<SVGBackend<'_>, Shift>,
    projections: &[Projection],
    colors: &[RGBColor],
    caption: &str,
    height: u32,
) -> DrawResult<()> {
    root.fill(&WHITE)?;
    let (plot_area, footer) = root.split_vertically(height.saturating_sub(CAPTION_HEIGHT));

    // Countries start on different dates; place them on a shared day axis.
    let origin = projections
        .iter()
        .map(|p| p.start_date)
        .min()
        .unwrap_or_default();
    let shift = |p: &Projection| (p.start_date - origin).num_days() as f64;

    let x_max = projections
        .iter()
        .filter_map(|p| p.days.last().map(|d| d + shift(p)))
        .fold(1.0_f64, f64::max);
    let positive = projections
        .iter()
        .flat_map(|p| p.central.iter().chain(&p.observed))
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0);
    let (y_min, y_max) = positive.fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (y_min, y_max) = if y_min.is_finite() && y_max > y_min {
        (y_min.max(1.0) / 2.0, y_max * 2.0)
    } else {
        (1.0, 10.0)
    };

    let mut chart = ChartBuilder::on(&plot_area)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_max, (y_min..y_max).log_scale())?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(6)
        .y_labels(6)
        .x_label_formatter(&|d| day_label(origin, *d))
        .y_label_formatter(&|v| axis_count(*v))
        .draw()?;

    for (i, p) in projections.iter().enumerate() {
        let color = colors[i % colors.len()];
        let dx = shift(p);
        let observed = p
            .observed_days
            .iter()
            .zip(&p.observed)
            .filter(|(_, y)| **y > 0.0)
            .map(|(&d, &y)| (d + dx, y));
        chart
            .draw_series(LineSeries::new(observed, color.stroke_width(2)))?
            .label(p.country.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

        let projected = p
            .days
            .iter()
            .zip(&p.central)
            .filter(|(_, y)| **y > 0.0)
            .map(|(&d, &y)| (d + dx, y));
        chart.draw_series(DashedLineSeries::new(projected, 8, 4, color.mix(0.6).stroke_width(1)))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    footer.draw(&Text::new(caption.to_string(), (10, 4), ("sans-serif", 12).into_font()))?;
    Ok(())
}

fn day_label(start: NaiveDate, day: f64) -> String {
    (start + Duration::days(day.round() as i64)).format("%b %d").to_string()
}

/// Compact axis label: `850`, `12k`, `1.5M`.
fn axis_count(v: f64) -> String {
    let a = v.abs();
    if a >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if a >= 1e3 {
        format!("{:.0}k", v / 1e3)
    } else {
        format!("{v:.0}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Band;

    fn projection(country: &str, start: NaiveDate, band: bool) -> Projection {
        let days: Vec<f64> = (0..40).map(|d| d as f64).collect();
        let central: Vec<f64> = days.iter().map(|d| 1e4 / (1.0 + (-(d - 20.0) / 4.0).exp())).collect();
        Projection {
            country: country.to_string(),
            start_date: start,
            observed_days: days[..25].to_vec(),
            observed: central[..25].to_vec(),
            band: band.then(|| Band {
                upper: central.iter().map(|v| v * 1.2).collect(),
                lower: central.iter().map(|v| v * 0.8).collect(),
            }),
            days,
            central,
            ensemble: Vec::new(),
        }
    }

    fn theme() -> ChartTheme {
        ChartTheme {
            author: "tester".to_string(),
            ..ChartTheme::default()
        }
    }

    #[test]
    fn parses_palette_colors() {
        assert_eq!(parse_hex_color("#228833").unwrap(), RGBColor(0x22, 0x88, 0x33));
        assert_eq!(parse_hex_color("ee6677").unwrap(), RGBColor(0xee, 0x66, 0x77));
        assert_eq!(parse_hex_color("#12345").unwrap_err().exit_code(), 2);
        assert_eq!(parse_hex_color("#zz0000").unwrap_err().exit_code(), 2);

        let empty = ChartTheme {
            palette: Vec::new(),
            ..ChartTheme::default()
        };
        assert_eq!(empty.colors().unwrap_err().exit_code(), 2);
        assert_eq!(ChartTheme::default().colors().unwrap().len(), 7);
    }

    #[test]
    fn country_chart_carries_legend_and_caption() {
        let start = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        let created = NaiveDate::from_ymd_opt(2020, 3, 20).unwrap();
        let svg = render_country_svg(&projection("Italy", start, true), &theme(), created).unwrap();
        assert!(svg.starts_with("<svg"), "{}", &svg[..svg.len().min(80)]);
        assert!(svg.contains("Italy"));
        assert!(svg.contains("Created by tester on Mar 20, 2020"));
        assert!(svg.contains("<circle"));
    }

    #[test]
    fn writes_country_and_overview_embeds() {
        let dir = tempfile::tempdir().unwrap();
        let start = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        let projections = vec![
            projection("South Korea", start, false),
            projection("Italy", start + Duration::days(10), true),
        ];
        let created = NaiveDate::from_ymd_opt(2020, 3, 20).unwrap();

        let written = write_chart_embeds(dir.path(), &projections, &theme(), created).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "SouthKorea_infections_embed.html",
                "Italy_infections_embed.html",
                "infections_embed.html",
            ]
        );

        let overview = fs::read_to_string(dir.path().join("_includes").join("infections_embed.html")).unwrap();
        assert!(overview.starts_with("<div class=\"epi-chart\" id=\"infections\">"));
        assert!(overview.contains("South Korea"));
        assert!(overview.contains("Italy"));
    }

    #[test]
    fn axis_labels_are_compact() {
        assert_eq!(axis_count(850.0), "850");
        assert_eq!(axis_count(12_000.0), "12k");
        assert_eq!(axis_count(1_500_000.0), "1.5M");
        assert_eq!(day_label(NaiveDate::from_ymd_opt(2020, 2, 27).unwrap(), 3.0), "Mar 01");
    }
}
