//! Logistic growth model evaluation.
//!
//! The estimators rely on two primitive operations:
//! - predict the cumulative count at day offset `x` (residuals, likelihoods, projections)
//! - the partial derivatives of that prediction w.r.t. the log-space parameters
//!   (least-squares Jacobian)
//!
//! `model(x) = c / (1 + exp(-(x - b) / a))`
//!
//! The log-space entry points exponentiate internally, so any real-valued
//! optimizer input maps to a defined curve.

use crate::domain::{GrowthParams, LogParams};

/// Numerically stable logistic sigmoid.
pub fn sigmoid(u: f64) -> f64 {
    if u >= 0.0 {
        1.0 / (1.0 + (-u).exp())
    } else {
        let e = u.exp();
        e / (1.0 + e)
    }
}

/// Predict the cumulative count at day offset `x`.
pub fn predict(x: f64, params: &GrowthParams) -> f64 {
    let u = (x - params.midpoint) / params.growth_rate;
    params.plateau * sigmoid(u)
}

/// Predict from log-space parameters.
pub fn predict_log(x: f64, params: &LogParams) -> f64 {
    predict(x, &params.decode())
}

/// Evaluate the model over a grid of day offsets.
pub fn predict_series(xs: &[f64], params: &GrowthParams) -> Vec<f64> {
    xs.iter().map(|&x| predict(x, params)).collect()
}

/// Prediction and its gradient w.r.t. `(la, lb, lc)` at `x`.
///
/// With `u = (x - b) / a` and `s = sigmoid(u)`:
/// - `∂f/∂la = -c s (1 - s) u`
/// - `∂f/∂lb = -c s (1 - s) b / a`
/// - `∂f/∂lc = c s`
pub fn predict_with_gradient(x: f64, params: &LogParams) -> (f64, [f64; 3]) {
    let p = params.decode();
    let u = (x - p.midpoint) / p.growth_rate;
    let s = sigmoid(u);
    let f = p.plateau * s;
    let slope = p.plateau * s * (1.0 - s);
    (f, [-slope * u, -slope * p.midpoint / p.growth_rate, f])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GrowthParams {
        GrowthParams::new(5.0, 30.0, 100_000.0).unwrap()
    }

    #[test]
    fn half_plateau_at_midpoint() {
        let p = params();
        assert!((predict(30.0, &p) - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn monotone_in_x() {
        let p = params();
        let mut prev = predict(-200.0, &p);
        for i in -199..400 {
            let y = predict(i as f64 * 0.5, &p);
            assert!(y >= prev, "model decreased at x={}", i as f64 * 0.5);
            prev = y;
        }
    }

    #[test]
    fn bounded_by_plateau() {
        let p = params();
        for x in [-1e6, -50.0, 0.0, 29.0, 30.0, 45.0, 70.0, 80.0] {
            let y = predict(x, &p);
            assert!(y < p.plateau, "x={x} gave {y}");
            assert!(y >= 0.0);
        }
        assert!(predict(30.0 + 100.0 * 5.0, &p) > 0.999 * p.plateau);
        assert!(predict(-1e6, &p) < 1e-6);
    }

    #[test]
    fn no_overflow_far_from_midpoint() {
        let p = GrowthParams::new(0.01, 30.0, 1e6).unwrap();
        assert!(predict(-1e5, &p).is_finite());
        assert!(predict(1e5, &p).is_finite());
    }

    #[test]
    fn log_space_matches_natural() {
        let p = params();
        let lp = p.encode();
        for x in [0.0, 12.5, 30.0, 59.0] {
            assert!((predict_log(x, &lp) - predict(x, &p)).abs() < 1e-6);
        }
        let back = lp.decode();
        assert!((back.growth_rate - 5.0).abs() < 1e-12);
        assert!((back.midpoint - 30.0).abs() < 1e-12);
        assert!((back.plateau - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let lp = GrowthParams::new(4.0, 25.0, 5_000.0).unwrap().encode();
        let x = 21.0;
        let (_, grad) = predict_with_gradient(x, &lp);
        let h = 1e-6;
        let base = lp.to_array();
        for (k, g) in grad.iter().enumerate() {
            let mut up = base;
            let mut dn = base;
            up[k] += h;
            dn[k] -= h;
            let fd = (predict_log(x, &LogParams::from_slice(&up))
                - predict_log(x, &LogParams::from_slice(&dn)))
                / (2.0 * h);
            assert!((fd - g).abs() < 1e-3 * g.abs().max(1.0), "param {k}: fd={fd} analytic={g}");
        }
    }
}
