//! Linear least squares helpers.
//!
//! Each Levenberg–Marquardt iteration solves a small damped linear problem:
//!
//! ```text
//! minimize ||r - J δ||² + μ ||D δ||²
//! ```
//!
//! which we express as the stacked ordinary least squares system
//! `[J; √μ D] δ ≈ [r; 0]` and solve with SVD. The parameter dimension is 3, so
//! SVD cost is negligible and it stays robust when `J` is nearly rank deficient
//! (e.g. the plateau is not yet identified early in an outbreak).

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the damped step `(JᵀJ + μ DᵀD) δ = Jᵀ r` via the stacked system.
pub fn solve_damped_step(
    jacobian: &DMatrix<f64>,
    residuals: &DVector<f64>,
    scale: &DVector<f64>,
    mu: f64,
) -> Option<DVector<f64>> {
    let n = jacobian.nrows();
    let p = jacobian.ncols();
    let mut a = DMatrix::<f64>::zeros(n + p, p);
    let mut b = DVector::<f64>::zeros(n + p);

    a.view_mut((0, 0), (n, p)).copy_from(jacobian);
    b.rows_mut(0, n).copy_from(residuals);

    let sqrt_mu = mu.sqrt();
    for j in 0..p {
        a[(n + j, j)] = sqrt_mu * scale[j];
    }

    solve_least_squares(&a, &b)
}

/// Moore–Penrose pseudo-inverse of a symmetric normal matrix.
///
/// Used for the parameter covariance `(JᵀJ)⁻¹`; near-singular directions are
/// truncated rather than blowing up.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let svd = m.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = (max_sv * f64::EPSILON * m.nrows().max(m.ncols()) as f64).max(1e-300);
    svd.pseudo_inverse(eps)
        .ok()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn damped_step_shrinks_towards_zero() {
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let r = DVector::from_row_slice(&[2.0, 5.0, 8.0]);
        let d = DVector::from_element(2, 1.0);

        let undamped = solve_damped_step(&j, &r, &d, 0.0).unwrap();
        let damped = solve_damped_step(&j, &r, &d, 100.0).unwrap();
        assert!((undamped[0] - 2.0).abs() < 1e-9);
        assert!(damped.norm() < undamped.norm());
    }

    #[test]
    fn pseudo_inverse_of_diagonal() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.5]);
        let inv = pseudo_inverse(&m).unwrap();
        assert!((inv[(0, 0)] - 0.25).abs() < 1e-12);
        assert!((inv[(1, 1)] - 2.0).abs() < 1e-12);
    }
}
