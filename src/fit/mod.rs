//! Estimators.
//!
//! Responsibilities:
//!
//! - least-squares point fit in log space (always run first)
//! - posterior: MAP search, then parallel HMC chains seeded from it
//! - convergence diagnostics (divergences, R-hat) for the pooled draws

pub mod least_squares;
pub mod map;
pub mod posterior;
pub mod sampler;

pub use least_squares::*;
pub use map::*;
pub use posterior::*;
pub use sampler::*;

use log::{info, warn};
use rayon::prelude::*;

use crate::domain::{PointFit, PriorConfig, SamplerConfig, TimeSeries};
use crate::error::FitError;
use crate::math::r_hat;
use crate::models::predict_log;

/// Per-chain statistics kept after pooling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSummary {
    pub acceptance_rate: f64,
    pub divergent: usize,
    pub step_size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDiagnostics {
    pub map: MapEstimate,
    /// Rows that entered the likelihood.
    pub fit_rows: usize,
    pub chains: Vec<ChainSummary>,
    /// Gelman–Rubin statistic per unconstrained coordinate.
    pub r_hat: Vec<f64>,
    /// False when any R-hat exceeds the configured threshold or the MAP
    /// search stopped at its iteration cap.
    pub reliable: bool,
}

impl PosteriorDiagnostics {
    pub fn max_r_hat(&self) -> f64 {
        self.r_hat.iter().copied().fold(f64::NAN, f64::max)
    }

    pub fn divergent(&self) -> usize {
        self.chains.iter().map(|c| c.divergent).sum()
    }
}

/// Pooled posterior draws for one country.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorFit {
    /// Chain 0's draws first, then chain 1's, and so on.
    pub samples: Vec<PosteriorSample>,
    /// Day offsets the curves are evaluated on.
    pub horizon: Vec<f64>,
    /// One model curve per sample, aligned with `samples`.
    pub curves: Vec<Vec<f64>>,
    pub diagnostics: PosteriorDiagnostics,
}

/// Run the posterior estimator for one country.
///
/// `point` only warm-starts the search and centers the priors; it is never
/// returned in place of a failed posterior.
pub fn fit_posterior(
    series: &TimeSeries,
    point: &PointFit,
    population: f64,
    priors: &PriorConfig,
    sampler: &SamplerConfig,
    horizon: &[f64],
) -> Result<PosteriorFit, FitError> {
    let model = PosteriorModel::new(series, point, population, priors)?;
    let map = find_map(&model, model.initial_theta(point), sampler.map_max_iters)?;
    let chains = sample(&model, &map.theta, sampler)?;

    let total = check_divergences(&chains, sampler.max_divergence_fraction)?;
    let divergent: usize = chains.iter().map(|c| c.divergent).sum();
    if divergent > 0 {
        warn!("{}: {divergent} of {total} transitions divergent", series.country);
    }

    let r_hats: Vec<f64> = (0..DIM)
        .map(|j| {
            let per_chain: Vec<Vec<f64>> = chains
                .iter()
                .map(|c| c.draws.iter().map(|d| d[j]).collect())
                .collect();
            r_hat(&per_chain).unwrap_or(f64::NAN)
        })
        .collect();
    let mixed = r_hats.iter().all(|r| r.is_finite() && *r <= sampler.max_r_hat);
    if !mixed {
        warn!(
            "{}: chains did not mix (R-hat {:?} > {}); entry flagged unreliable",
            series.country, r_hats, sampler.max_r_hat
        );
    }
    if !map.converged {
        warn!(
            "{}: MAP search stopped at its iteration cap; entry flagged unreliable",
            series.country
        );
    }
    let reliable = mixed && map.converged;

    let samples: Vec<PosteriorSample> = chains
        .iter()
        .flat_map(|c| c.draws.iter().map(|theta| model.decode(theta)))
        .collect();
    let curves: Vec<Vec<f64>> = samples
        .par_iter()
        .map(|s| horizon.iter().map(|&x| predict_log(x, &s.params)).collect())
        .collect();
    let diagnostics = PosteriorDiagnostics {
        map,
        fit_rows: model.fit_rows(),
        chains: chains
            .iter()
            .map(|c| ChainSummary {
                acceptance_rate: c.acceptance_rate,
                divergent: c.divergent,
                step_size: c.step_size,
            })
            .collect(),
        r_hat: r_hats,
        reliable,
    };
    info!(
        "{}: {total} posterior draws from {} chains, max R-hat {:.3}",
        series.country,
        diagnostics.chains.len(),
        diagnostics.max_r_hat()
    );

    Ok(PosteriorFit {
        samples,
        horizon: horizon.to_vec(),
        curves,
        diagnostics,
    })
}

/// Fail when the pooled divergent fraction exceeds `max_fraction`.
///
/// Returns the number of post-tuning transitions on success.
pub fn check_divergences(chains: &[Chain], max_fraction: f64) -> Result<usize, FitError> {
    let total: usize = chains.iter().map(|c| c.draws.len()).sum();
    let divergent: usize = chains.iter().map(|c| c.divergent).sum();
    if total == 0 || divergent as f64 / total as f64 > max_fraction {
        return Err(FitError::SamplerDivergence { divergent, total });
    }
    Ok(total)
}
