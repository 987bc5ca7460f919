//! Model curves over the observed period plus future days, for charting.
//!
//! A point fit yields one curve. A posterior yields its per-sample curves and
//! the 50th / 90th / 10th percentile bands across them; the 50th percentile
//! becomes the central curve.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{PointFit, TimeSeries};
use crate::error::FitError;
use crate::fit::PosteriorFit;
use crate::math::percentile_sorted;
use crate::models::predict_log;

/// Upper and lower credible curves, aligned with `Projection::days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// 90th percentile.
    pub upper: Vec<f64>,
    /// 10th percentile.
    pub lower: Vec<f64>,
}

/// Projected curves for one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub country: String,
    pub start_date: NaiveDate,
    /// Observed day offsets and counts.
    pub observed_days: Vec<f64>,
    pub observed: Vec<f64>,
    /// Day offsets of the curves.
    pub days: Vec<f64>,
    /// Point-fit curve, or the posterior median.
    pub central: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<Band>,
    /// Per-sample curves (posterior only; not exported).
    #[serde(skip)]
    pub ensemble: Vec<Vec<f64>>,
}

impl Projection {
    /// Last observed day offset; curve points after it are projections.
    pub fn last_observed_day(&self) -> f64 {
        self.observed_days.last().copied().unwrap_or(0.0)
    }

    pub fn is_posterior(&self) -> bool {
        self.band.is_some()
    }
}

/// Evaluate a point fit over `0 ..= last_day + future_days`.
pub fn project_point(
    series: &TimeSeries,
    fit: &PointFit,
    future_days: usize,
) -> Result<Projection, FitError> {
    let days = series.projection_horizon(future_days);
    let central = days.iter().map(|&x| predict_log(x, &fit.params)).collect();
    Ok(Projection {
        country: series.country.clone(),
        start_date: start_date(series)?,
        observed_days: series.day_offsets(),
        observed: series.counts(),
        days,
        central,
        band: None,
        ensemble: Vec::new(),
    })
}

/// Median curve and 90/10 band from the posterior's per-sample curves.
pub fn project_posterior(series: &TimeSeries, fit: &PosteriorFit) -> Result<Projection, FitError> {
    let (median, band) = percentile_curves(&fit.curves, fit.horizon.len())?;
    Ok(Projection {
        country: series.country.clone(),
        start_date: start_date(series)?,
        observed_days: series.day_offsets(),
        observed: series.counts(),
        days: fit.horizon.clone(),
        central: median,
        band: Some(band),
        ensemble: fit.curves.clone(),
    })
}

/// Per-day 50th percentile plus the 90/10 band across `curves`.
pub fn percentile_curves(curves: &[Vec<f64>], len: usize) -> Result<(Vec<f64>, Band), FitError> {
    if curves.is_empty() {
        return Err(FitError::numerical("no sample curves to summarize"));
    }
    if curves.iter().any(|c| c.len() != len) {
        return Err(FitError::numerical("sample curves have inconsistent lengths"));
    }

    let mut median = Vec::with_capacity(len);
    let mut upper = Vec::with_capacity(len);
    let mut lower = Vec::with_capacity(len);
    let mut column = Vec::with_capacity(curves.len());
    for day in 0..len {
        column.clear();
        column.extend(curves.iter().map(|c| c[day]).filter(|v| v.is_finite()));
        if column.is_empty() {
            return Err(FitError::numerical(format!("no finite curve values on day {day}")));
        }
        column.sort_by(f64::total_cmp);
        median.push(percentile_sorted(&column, 50.0));
        upper.push(percentile_sorted(&column, 90.0));
        lower.push(percentile_sorted(&column, 10.0));
    }
    Ok((median, Band { upper, lower }))
}

fn start_date(series: &TimeSeries) -> Result<NaiveDate, FitError> {
    series
        .start_date()
        .ok_or_else(|| FitError::invalid_input(format!("{}: empty series", series.country)))
}
