//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - observed counts: `o`
//! - fitted curve over the observed period: `-`
//! - projected curve past the last observation: `.`
//! - 90th / 10th percentile band (posterior only): `:`

use crate::report::Projection;

/// Render one country's projection.
pub fn render_projection_ascii(projection: &Projection, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (d_min, d_max) = day_range(projection).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = y_range(projection).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    let last = projection.last_observed_day();

    // Curves first so observed points overlay them.
    let fitted: Vec<(f64, f64)> = curve_points(&projection.days, &projection.central)
        .filter(|&(d, _)| d <= last)
        .collect();
    let projected: Vec<(f64, f64)> = curve_points(&projection.days, &projection.central)
        .filter(|&(d, _)| d >= last)
        .collect();
    draw_curve(&mut grid, &fitted, (d_min, d_max), (y_min, y_max), '-');
    draw_curve(&mut grid, &projected, (d_min, d_max), (y_min, y_max), '.');

    if let Some(band) = &projection.band {
        for edge in [&band.upper, &band.lower] {
            let pts: Vec<(f64, f64)> = curve_points(&projection.days, edge).collect();
            draw_curve(&mut grid, &pts, (d_min, d_max), (y_min, y_max), ':');
        }
    }

    for (&d, &y) in projection.observed_days.iter().zip(&projection.observed) {
        let x = map_x(d, d_min, d_max, width);
        let yy = map_y(y, y_min, y_max, height);
        grid[yy][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: {} | days=[{d_min:.0}, {d_max:.0}] since {} | cases=[{y_min:.2}, {y_max:.2}]\n",
        projection.country, projection.start_date
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn curve_points<'a>(days: &'a [f64], values: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    days.iter()
        .zip(values)
        .map(|(&d, &v)| (d, v))
        .filter(|(_, v)| v.is_finite())
}

fn day_range(p: &Projection) -> Option<(f64, f64)> {
    let min_d = p.days.iter().chain(&p.observed_days).copied().fold(f64::INFINITY, f64::min);
    let max_d = p.days.iter().chain(&p.observed_days).copied().fold(f64::NEG_INFINITY, f64::max);
    if min_d.is_finite() && max_d.is_finite() && max_d > min_d {
        Some((min_d, max_d))
    } else {
        None
    }
}

fn y_range(p: &Projection) -> Option<(f64, f64)> {
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let band = p.band.iter().flat_map(|b| b.upper.iter().chain(&b.lower));
    for &y in p.central.iter().chain(&p.observed).chain(band) {
        if y.is_finite() {
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }
    if min_y.is_finite() && max_y.is_finite() && max_y > min_y {
        Some((min_y, max_y))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_range: (f64, f64), y_range: (f64, f64), ch: char) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, x_range.0, x_range.1, width);
        let yy = map_y(y, y_range.0, y_range.1, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, ch);
        } else if grid[yy][x] == ' ' {
            grid[yy][x] = ch;
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
