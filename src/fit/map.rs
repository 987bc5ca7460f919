//! Maximum a posteriori search that seeds the sampler.
//!
//! The negative log posterior is minimized with `argmin`'s Nelder–Mead over
//! the unconstrained vector. Points outside the support cost `+∞`, which the
//! simplex simply moves away from.

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use log::{debug, warn};

use crate::error::FitError;
use crate::fit::posterior::PosteriorModel;

/// Edge length of the initial simplex in unconstrained units.
const SIMPLEX_STEP: f64 = 0.25;

/// Stop once the simplex cost spread falls below this.
const SD_TOLERANCE: f64 = 1e-10;

/// Result of the MAP search.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    pub theta: Vec<f64>,
    pub log_density: f64,
    pub iterations: u64,
    /// False when the iteration cap stopped the search.
    pub converged: bool,
}

struct NegLogPosterior<'a> {
    model: &'a PosteriorModel,
}

impl CostFunction for NegLogPosterior<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let lp = self.model.log_density(theta);
        Ok(if lp.is_finite() { -lp } else { f64::INFINITY })
    }
}

/// Locate the posterior mode starting from `theta0`.
pub fn find_map(
    model: &PosteriorModel,
    theta0: Vec<f64>,
    max_iters: u64,
) -> Result<MapEstimate, FitError> {
    if max_iters == 0 {
        return Err(FitError::config("map_max_iters must be > 0"));
    }
    if !model.log_density(&theta0).is_finite() {
        return Err(FitError::MapFailed(
            "log posterior is not finite at the starting point".to_string(),
        ));
    }

    let solver = NelderMead::new(initial_simplex(&theta0))
        .with_sd_tolerance(SD_TOLERANCE)
        .map_err(|e| FitError::MapFailed(e.to_string()))?;

    let result = Executor::new(NegLogPosterior { model }, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
        .map_err(|e| FitError::MapFailed(e.to_string()))?;

    let state = result.state();
    let iterations = state.get_iter();
    let cost = state.get_best_cost();
    let Some(theta) = state.get_best_param().cloned() else {
        return Err(FitError::MapFailed("optimizer returned no parameters".to_string()));
    };
    if !cost.is_finite() || theta.iter().any(|v| !v.is_finite()) {
        return Err(FitError::MapFailed(format!("non-finite optimum (cost {cost})")));
    }

    let converged = !matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::MaxItersReached)
    );
    if converged {
        debug!("MAP converged after {iterations} iterations: log density {:.4}", -cost);
    } else {
        warn!("MAP search hit the {max_iters} iteration cap; continuing from the best point");
    }

    Ok(MapEstimate {
        theta,
        log_density: -cost,
        iterations,
        converged,
    })
}

fn initial_simplex(theta0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(theta0.len() + 1);
    simplex.push(theta0.to_vec());
    for i in 0..theta0.len() {
        let mut vertex = theta0.to_vec();
        vertex[i] += SIMPLEX_STEP;
        simplex.push(vertex);
    }
    simplex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GrowthParams, PriorConfig, TimeSeries};
    use crate::fit::least_squares::{LeastSquaresOptions, fit_point};
    use crate::models::predict;
    use chrono::NaiveDate;

    fn model() -> (PosteriorModel, Vec<f64>) {
        let truth = GrowthParams::new(4.0, 30.0, 50_000.0).unwrap();
        let counts: Vec<f64> = (0..60).map(|i| predict(i as f64, &truth).round()).collect();
        let series =
            TimeSeries::from_daily("Testland", NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(), &counts);
        let fit = fit_point(&series, &LeastSquaresOptions::default()).unwrap();
        let model = PosteriorModel::new(&series, &fit, 1e7, &PriorConfig::default()).unwrap();
        let theta0 = model.initial_theta(&fit);
        (model, theta0)
    }

    #[test]
    fn map_does_not_decrease_log_density() {
        let (model, theta0) = model();
        let start = model.log_density(&theta0);
        let map = find_map(&model, theta0, 2000).unwrap();
        assert!(map.log_density >= start - 1e-9, "{} < {start}", map.log_density);
        assert!((model.log_density(&map.theta) - map.log_density).abs() < 1e-6);
    }

    #[test]
    fn non_finite_start_is_map_failure() {
        let (model, _) = model();
        let err = find_map(&model, vec![f64::NAN, 0.0, 0.0, 0.0], 100).unwrap_err();
        assert!(matches!(err, FitError::MapFailed(_)));
    }

    #[test]
    fn iteration_cap_still_returns_best_point() {
        let (model, theta0) = model();
        let map = find_map(&model, theta0, 3).unwrap();
        assert!(!map.converged);
        assert!(map.log_density.is_finite());
    }
}
