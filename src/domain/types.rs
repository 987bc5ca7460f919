//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON / the summary file
//! - reloaded later for plotting

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::ValueEnum;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Minimum number of observations needed to identify three free parameters
/// with at least one residual degree of freedom.
pub const MIN_FIT_POINTS: usize = 4;

/// One observed day: date plus cumulative count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub count: f64,
}

/// Cumulative counts for one country, ordered by date.
///
/// Counts are expected to be non-decreasing but revisions upstream can break
/// that; nothing here relies on monotonicity.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub country: String,
    pub observations: Vec<Observation>,
}

impl TimeSeries {
    pub fn new(country: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            country: country.into(),
            observations,
        }
    }

    /// Build a series from consecutive daily counts starting at `start`.
    pub fn from_daily(country: impl Into<String>, start: NaiveDate, counts: &[f64]) -> Self {
        let observations = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| Observation {
                date: start + chrono::Duration::days(i as i64),
                count,
            })
            .collect();
        Self::new(country, observations)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.observations.first().map(|o| o.date)
    }

    /// Day offsets from the first date (the `x` used for fitting).
    pub fn day_offsets(&self) -> Vec<f64> {
        let Some(start) = self.start_date() else {
            return Vec::new();
        };
        self.observations
            .iter()
            .map(|o| (o.date - start).num_days() as f64)
            .collect()
    }

    /// Day offsets from the first date through `future_days` past the last one.
    pub fn projection_horizon(&self, future_days: usize) -> Vec<f64> {
        let last = self.day_offsets().last().copied().unwrap_or(-1.0);
        let end = last as usize + 1 + future_days;
        (0..end).map(|d| d as f64).collect()
    }

    pub fn counts(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.count).collect()
    }

    /// Most recent observed cumulative count.
    pub fn latest_count(&self) -> Option<f64> {
        self.observations.last().map(|o| o.count)
    }

    /// Reject series that cannot identify the growth model.
    pub fn validate_for_fit(&self) -> Result<(), FitError> {
        if self.len() < MIN_FIT_POINTS {
            return Err(FitError::invalid_input(format!(
                "{}: {} observations, need at least {MIN_FIT_POINTS}",
                self.country,
                self.len()
            )));
        }
        if self
            .observations
            .iter()
            .any(|o| !o.count.is_finite() || o.count < 0.0)
        {
            return Err(FitError::invalid_input(format!(
                "{}: counts must be finite and non-negative",
                self.country
            )));
        }
        if self.observations.iter().all(|o| o.count == 0.0) {
            return Err(FitError::invalid_input(format!("{}: series is all zero", self.country)));
        }
        if self
            .observations
            .windows(2)
            .any(|w| w[1].date <= w[0].date)
        {
            return Err(FitError::invalid_input(format!(
                "{}: dates must be strictly increasing",
                self.country
            )));
        }
        Ok(())
    }
}

/// Growth parameters in natural units: `a` (days), `b` (day offset), `c` (cases).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthParams {
    pub growth_rate: f64,
    pub midpoint: f64,
    pub plateau: f64,
}

impl GrowthParams {
    pub fn new(growth_rate: f64, midpoint: f64, plateau: f64) -> Result<Self, FitError> {
        for (name, v) in [
            ("growth rate", growth_rate),
            ("midpoint", midpoint),
            ("plateau", plateau),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(FitError::invalid_input(format!("{name} must be finite and > 0, got {v}")));
            }
        }
        Ok(Self {
            growth_rate,
            midpoint,
            plateau,
        })
    }

    /// Encode into optimizer space.
    pub fn encode(&self) -> LogParams {
        LogParams {
            la: self.growth_rate.ln(),
            lb: self.midpoint.ln(),
            lc: self.plateau.ln(),
        }
    }
}

/// Growth parameters in log space: `(ln a, ln b, ln c)`.
///
/// Any real triple decodes to a valid (strictly positive) parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogParams {
    pub la: f64,
    pub lb: f64,
    pub lc: f64,
}

impl LogParams {
    pub fn from_slice(v: &[f64]) -> Self {
        Self {
            la: v[0],
            lb: v[1],
            lc: v[2],
        }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.la, self.lb, self.lc]
    }

    /// Decode back to natural units.
    pub fn decode(&self) -> GrowthParams {
        GrowthParams {
            growth_rate: self.la.exp(),
            midpoint: self.lb.exp(),
            plateau: self.lc.exp(),
        }
    }
}

/// Least-squares result for one country.
#[derive(Debug, Clone)]
pub struct PointFit {
    pub params: LogParams,
    /// Covariance of `(la, lb, lc)`, scaled by the residual variance.
    pub covariance: Matrix3<f64>,
    pub sse: f64,
    pub rmse: f64,
    pub n: usize,
    pub evaluations: usize,
}

impl PointFit {
    /// One-sigma uncertainties of `(la, lb, lc)`.
    pub fn std_errors(&self) -> [f64; 3] {
        [
            self.covariance[(0, 0)].max(0.0).sqrt(),
            self.covariance[(1, 1)].max(0.0).sqrt(),
            self.covariance[(2, 2)].max(0.0).sqrt(),
        ]
    }
}

/// Prior on the growth rate `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GrowthPrior {
    /// Normal on `ln a`, centered on the least-squares estimate.
    Lognormal,
    /// Gamma on `a` with its mode at the least-squares estimate, truncated
    /// below at `gamma_lower`.
    Gamma,
}

/// Observation model for the cumulative counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LikelihoodKind {
    /// Gaussian noise with an inferred standard deviation, all rows.
    Normal,
    /// Negative binomial over rows above `count_threshold`.
    Negbin,
}

/// Prior and likelihood settings for the posterior estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    pub growth: GrowthPrior,
    /// Spread of the log-normal growth prior (in `ln a`).
    pub growth_sigma: f64,
    /// Shape of the gamma growth prior (must exceed 1 for an interior mode).
    pub gamma_shape: f64,
    /// Lower truncation of the gamma growth prior (days).
    pub gamma_lower: f64,
    /// Expected day offset of the outbreak midpoint.
    pub midpoint_day: f64,
    /// Spread of the midpoint prior (in `ln b`).
    pub midpoint_sigma: f64,
    /// Spread of the plateau prior (in `ln c`), before bounding.
    pub plateau_sigma: f64,
    pub likelihood: LikelihoodKind,
    /// Rows with counts at or below this value are left out of the
    /// negative-binomial likelihood.
    pub count_threshold: f64,
    /// Shape of the inverse-gamma prior on the negative-binomial dispersion.
    pub dispersion_shape: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            growth: GrowthPrior::Gamma,
            growth_sigma: 1.0,
            gamma_shape: 2.0,
            gamma_lower: 0.1,
            midpoint_day: 46.0,
            midpoint_sigma: 0.5,
            plateau_sigma: 2.0,
            likelihood: LikelihoodKind::Negbin,
            count_threshold: 50.0,
            dispersion_shape: 2.0,
        }
    }
}

/// Markov-chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Post-tuning draws per chain.
    pub draws: usize,
    /// Tuning (burn-in) iterations per chain; discarded.
    pub tune: usize,
    pub chains: usize,
    /// Target mean acceptance probability for step-size adaptation.
    pub target_accept: f64,
    pub seed: u64,
    /// Mean leapfrog steps per transition; each transition draws its count
    /// uniformly from `[ceil(n/2), n + n/2]`.
    pub leapfrog_steps: usize,
    /// Fixed starting step size. `None` searches for one before tuning and
    /// after every mass-matrix update.
    pub initial_step_size: Option<f64>,
    /// Iteration cap of the MAP search.
    pub map_max_iters: u64,
    /// Fraction of divergent post-tuning transitions tolerated before the
    /// country is failed.
    pub max_divergence_fraction: f64,
    /// Entries whose worst R-hat exceeds this are flagged unreliable.
    pub max_r_hat: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            draws: 1000,
            tune: 1000,
            chains: 4,
            target_accept: 0.9,
            seed: 42,
            leapfrog_steps: 10,
            initial_step_size: None,
            map_max_iters: 5000,
            max_divergence_fraction: 0.05,
            max_r_hat: 1.1,
        }
    }
}

/// Presentation settings of the summary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Plateau values strictly above this are written in millions.
    pub large_number_threshold: f64,
    /// `chrono` format of the peak date.
    pub date_format: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            large_number_threshold: 1_000_000.0,
            date_format: "%b %d, %Y".to_string(),
        }
    }
}

/// Which pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Least squares only.
    Point,
    /// Least squares, then MAP + MCMC.
    Posterior,
}

/// A full run's configuration as understood by the pipeline.
///
/// Built from the TOML config file (if any), then overridden by CLI flags.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub data_path: PathBuf,
    pub out_dir: PathBuf,
    pub pipeline: PipelineKind,
    /// Countries to process, in order. Empty means every column of the input.
    pub countries: Vec<String>,
    /// Total population per country (plateau ceiling).
    pub populations: BTreeMap<String, f64>,
    pub initial_guess: GrowthParams,
    pub max_evaluations: usize,
    pub future_days: usize,
    pub priors: PriorConfig,
    pub sampler: SamplerConfig,
    pub summary: SummaryConfig,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub export_projection: Option<PathBuf>,
}

/// Plateau estimate as reported in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum PlateauEstimate {
    Point(f64),
    Interval { central: f64, upper: f64, lower: f64 },
}

impl PlateauEstimate {
    pub fn central(&self) -> f64 {
        match *self {
            PlateauEstimate::Point(v) => v,
            PlateauEstimate::Interval { central, .. } => central,
        }
    }
}

/// One country's entry in the summary record.
#[derive(Debug, Clone, PartialEq)]
pub struct CountrySummary {
    pub country: String,
    pub peak_date: NaiveDate,
    pub peak_label: String,
    pub plateau: PlateauEstimate,
    /// False when sampler diagnostics indicate poor mixing.
    pub reliable: bool,
}

impl CountrySummary {
    /// Record key: the country name with spaces removed.
    pub fn key(&self) -> String {
        country_key(&self.country)
    }
}

pub fn country_key(country: &str) -> String {
    country.chars().filter(|c| !c.is_whitespace()).collect()
}

/// A country that could not be summarized, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryFailure {
    pub country: String,
    pub error: FitError,
}
