//! Log densities used by the posterior that `statrs` does not provide directly.
//!
//! Normal, gamma and inverse-gamma priors are `statrs::distribution` values
//! built once per model (see `fit::posterior`). What stays here:
//!
//! - the half-normal, which is a folded `Normal(0, scale)`
//! - the negative binomial in its mean / dispersion form, mapped onto
//!   `statrs`' `(r, p)` parameterization
//! - `softplus` for the plateau Jacobian
//!
//! All functions return `-∞` outside the support instead of panicking, so the
//! sampler can simply reject such proposals.

use std::f64::consts::LN_2;

use statrs::distribution::{Continuous, Discrete, NegativeBinomial, Normal};

/// Half-normal on `[0, ∞)`: twice the density of `Normal(0, scale)`.
pub fn half_normal_lpdf(x: f64, scale: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    match Normal::new(0.0, scale) {
        Ok(n) => LN_2 + n.ln_pdf(x),
        Err(_) => f64::NEG_INFINITY,
    }
}

/// Negative binomial in the mean / dispersion parameterization.
///
/// `Var[y] = mu + mu² / alpha`; large `alpha` approaches a Poisson.
/// Equivalent to `NegativeBinomial(r = alpha, p = alpha / (alpha + mu))`.
pub fn neg_binomial_lpmf(y: u64, mu: f64, alpha: f64) -> f64 {
    if !(mu > 0.0 && alpha > 0.0 && mu.is_finite() && alpha.is_finite()) {
        return f64::NEG_INFINITY;
    }
    match NegativeBinomial::new(alpha, alpha / (alpha + mu)) {
        Ok(nb) => nb.ln_pmf(y),
        Err(_) => f64::NEG_INFINITY,
    }
}

/// `ln(1 + exp(x))` without overflow.
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::function::gamma::ln_gamma;

    #[test]
    fn half_normal_doubles_the_normal() {
        let n = Normal::new(0.0, 2.0).unwrap();
        let v = half_normal_lpdf(1.5, 2.0);
        assert!((v - (n.ln_pdf(1.5) + LN_2)).abs() < 1e-12);
        // Closed form: 0.5 ln(2/π) - ln s - x²/(2s²)
        let closed = 0.5 * (2.0 / std::f64::consts::PI).ln() - 2f64.ln() - 1.5 * 1.5 / 8.0;
        assert!((v - closed).abs() < 1e-12);
    }

    #[test]
    fn neg_binomial_matches_mean_dispersion_form() {
        let (y, mu, alpha) = (7u64, 12.5, 3.0);
        let k = y as f64;
        let expected = ln_gamma(k + alpha) - ln_gamma(alpha) - ln_gamma(k + 1.0)
            + alpha * (alpha / (alpha + mu)).ln()
            + k * (mu / (alpha + mu)).ln();
        assert!((neg_binomial_lpmf(y, mu, alpha) - expected).abs() < 1e-10);
    }

    #[test]
    fn neg_binomial_sums_to_one() {
        let total: f64 = (0..2000u64).map(|k| neg_binomial_lpmf(k, 20.0, 3.0).exp()).sum();
        assert!((total - 1.0).abs() < 1e-8, "total = {total}");
    }

    #[test]
    fn outside_support_is_neg_infinity() {
        assert_eq!(half_normal_lpdf(-0.1, 1.0), f64::NEG_INFINITY);
        assert_eq!(half_normal_lpdf(0.5, 0.0), f64::NEG_INFINITY);
        assert_eq!(neg_binomial_lpmf(3, 0.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(neg_binomial_lpmf(3, 5.0, f64::NAN), f64::NEG_INFINITY);
    }

    #[test]
    fn softplus_is_stable() {
        assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-12);
        assert!((softplus(800.0) - 800.0).abs() < 1e-9);
        assert!(softplus(-800.0) >= 0.0);
    }
}
