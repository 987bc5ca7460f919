//! Point estimator: nonlinear least squares on the log-space parameters.
//!
//! Given:
//! - day offsets `x_i`
//! - observed cumulative counts `y_i`
//! - an initial guess `(ln a, ln b, ln c)`
//!
//! we minimize `Σ (y_i - model(x_i))²` with Levenberg–Marquardt and return
//! the best-fit vector together with the covariance estimate
//! `(JᵀJ)⁻¹ · SSE / (n - 3)`.
//!
//! Working in log space keeps every iterate a valid parameter set without box
//! constraints.

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3};

use crate::domain::{GrowthParams, LogParams, PointFit, TimeSeries};
use crate::error::FitError;
use crate::math::{pseudo_inverse, solve_damped_step};
use crate::models::{predict_log, predict_with_gradient};

/// Generic early-outbreak shape `(a, b, c)`.
pub const DEFAULT_INITIAL_GUESS: (f64, f64, f64) = (2.3, 46.0, 2000.0);

/// Function-evaluation budget before the fit is declared non-convergent.
pub const DEFAULT_MAX_EVALUATIONS: usize = 10_000;

/// Relative tolerance on SSE reduction and on the step length.
const TOL: f64 = 1.49012e-8;

/// Initial damping; dimensionless because the step is scaled by the
/// Jacobian column norms.
const INITIAL_DAMPING: f64 = 1e-3;

/// Options for the least-squares fit.
#[derive(Debug, Clone)]
pub struct LeastSquaresOptions {
    pub initial_guess: GrowthParams,
    pub max_evaluations: usize,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        let (a, b, c) = DEFAULT_INITIAL_GUESS;
        Self {
            initial_guess: GrowthParams {
                growth_rate: a,
                midpoint: b,
                plateau: c,
            },
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
        }
    }
}

/// Fit the logistic model to one series.
pub fn fit_point(series: &TimeSeries, opts: &LeastSquaresOptions) -> Result<PointFit, FitError> {
    series.validate_for_fit()?;
    let x = series.day_offsets();
    let y = series.counts();
    fit_arrays(&x, &y, opts)
}

/// Fit the logistic model to raw `(x, y)` arrays.
pub fn fit_arrays(x: &[f64], y: &[f64], opts: &LeastSquaresOptions) -> Result<PointFit, FitError> {
    let n = x.len();
    if n != y.len() {
        return Err(FitError::invalid_input("x and y lengths differ"));
    }
    if n < 3 {
        return Err(FitError::invalid_input(format!("{n} observations cannot identify 3 parameters")));
    }
    if opts.max_evaluations == 0 {
        return Err(FitError::config("max_evaluations must be > 0"));
    }

    let mut params = opts.initial_guess.encode();
    let mut residuals = residual_vector(x, y, &params);
    let mut sse = residuals.norm_squared();
    let mut evaluations = 1usize;
    if !sse.is_finite() {
        return Err(FitError::numerical("non-finite residuals at the initial guess"));
    }

    let mut jacobian = jacobian_matrix(x, &params);
    let mut mu = INITIAL_DAMPING;
    let mut nu = 2.0;

    loop {
        if sse == 0.0 {
            break;
        }
        if evaluations >= opts.max_evaluations {
            return Err(FitError::NonConvergence {
                evaluations,
                max_evaluations: opts.max_evaluations,
            });
        }

        // Marquardt scaling keeps the damping invariant to parameter units.
        let scale = column_norms(&jacobian);
        let Some(step) = solve_damped_step(&jacobian, &residuals, &scale, mu) else {
            return Err(FitError::numerical("singular damped least-squares step"));
        };

        let current = DVector::from_row_slice(&params.to_array());
        if step.norm() <= TOL * (current.norm() + TOL) {
            break;
        }

        let candidate_vec = &current + &step;
        let candidate = LogParams::from_slice(candidate_vec.as_slice());
        let candidate_residuals = residual_vector(x, y, &candidate);
        let candidate_sse = candidate_residuals.norm_squared();
        evaluations += 1;

        let linearized = &residuals - &jacobian * &step;
        let predicted = sse - linearized.norm_squared();
        let actual = sse - candidate_sse;

        if candidate_sse.is_finite() && actual > 0.0 && predicted > 0.0 {
            let rho = actual / predicted;
            params = candidate;
            residuals = candidate_residuals;
            let converged = actual <= TOL * sse && predicted <= TOL * sse;
            sse = candidate_sse;
            if converged {
                break;
            }
            jacobian = jacobian_matrix(x, &params);
            mu *= (1.0 / 3.0_f64).max(1.0 - (2.0 * rho - 1.0).powi(3));
            nu = 2.0;
        } else {
            mu *= nu;
            nu *= 2.0;
            if !mu.is_finite() {
                return Err(FitError::numerical("damping overflow in least squares"));
            }
        }
    }

    let jacobian = jacobian_matrix(x, &params);
    let covariance = covariance(&jacobian, sse, n);
    debug!(
        "least squares converged after {evaluations} evaluations: sse={sse:.4e} params={:?}",
        params.decode()
    );

    Ok(PointFit {
        params,
        covariance,
        sse,
        rmse: (sse / n as f64).sqrt(),
        n,
        evaluations,
    })
}

fn residual_vector(x: &[f64], y: &[f64], params: &LogParams) -> DVector<f64> {
    DVector::from_iterator(
        x.len(),
        x.iter().zip(y).map(|(&xi, &yi)| yi - predict_log(xi, params)),
    )
}

fn jacobian_matrix(x: &[f64], params: &LogParams) -> DMatrix<f64> {
    let mut j = DMatrix::<f64>::zeros(x.len(), 3);
    for (i, &xi) in x.iter().enumerate() {
        let (_, grad) = predict_with_gradient(xi, params);
        for k in 0..3 {
            j[(i, k)] = grad[k];
        }
    }
    j
}

fn column_norms(j: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(
        j.ncols(),
        j.column_iter().map(|c| c.norm().max(1e-12)),
    )
}

fn covariance(jacobian: &DMatrix<f64>, sse: f64, n: usize) -> Matrix3<f64> {
    let dof = n.saturating_sub(3);
    let normal = jacobian.transpose() * jacobian;
    match pseudo_inverse(&normal) {
        Some(inv) if dof > 0 => {
            let s_sq = sse / dof as f64;
            Matrix3::from_fn(|r, c| inv[(r, c)] * s_sq)
        }
        _ => Matrix3::from_element(f64::INFINITY),
    }
}
