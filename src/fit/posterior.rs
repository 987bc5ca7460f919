//! Log posterior of the logistic model.
//!
//! The sampler works on an unconstrained vector `θ = [g, lb, z, q]`:
//!
//! - `g`: growth rate: `ln a` (log-normal prior) or `ln(a - lower)` (gamma prior)
//! - `lb`: log midpoint, real-valued with a normal prior
//! - `z`: plateau, mapped into `[ln(latest), ln(population)]` by a scaled
//!   logistic so the double bound holds for every `θ`
//! - `q`: log of the noise scale (normal σ) or the negative-binomial dispersion
//!
//! `log_density` includes the log-Jacobian of each transform, so densities are
//! correct in the unconstrained space.

use crate::domain::{
    GrowthPrior, LikelihoodKind, LogParams, MIN_FIT_POINTS, PointFit, PriorConfig, TimeSeries,
};
use crate::error::FitError;
use statrs::distribution::{Continuous, Gamma, InverseGamma, Normal};

use crate::math::{half_normal_lpdf, increments, neg_binomial_lpmf, softplus, variance};
use crate::models::{predict_log, sigmoid};

/// Dimension of the unconstrained sampling space.
pub const DIM: usize = 4;

/// Keeps the initial plateau strictly inside its bounds.
const EDGE: f64 = 1e-6;

/// Smallest mean handed to the negative binomial.
const MIN_MEAN: f64 = 1e-9;

/// Growth prior with its data-dependent hyperparameters resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedGrowthPrior {
    /// `ln a ~ Normal`.
    LogNormal(Normal),
    /// `a ~ Gamma(shape, rate)`, bounded below by `lower`.
    Gamma { dist: Gamma, lower: f64 },
}

/// Observation model with its hyperparameters resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedLikelihood {
    /// σ ~ HalfNormal(scale).
    Normal { scale: f64 },
    /// dispersion ~ InverseGamma(shape, scale).
    NegBinomial(InverseGamma),
}

/// A posterior draw in model units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosteriorSample {
    pub params: LogParams,
    /// Normal σ or negative-binomial dispersion, depending on the likelihood.
    pub noise: f64,
}

/// Data plus resolved priors for one country.
#[derive(Debug, Clone)]
pub struct PosteriorModel {
    x: Vec<f64>,
    y: Vec<f64>,
    growth: ResolvedGrowthPrior,
    midpoint: Normal,
    plateau: Normal,
    plateau_lower: f64,
    plateau_upper: f64,
    likelihood: ResolvedLikelihood,
}

impl PosteriorModel {
    /// Resolve priors against the data and the least-squares fit.
    ///
    /// Fails with a configuration error when the population ceiling does not
    /// exceed the latest observed count, or when a prior cannot be built from
    /// the configured hyperparameters.
    pub fn new(
        series: &TimeSeries,
        point: &PointFit,
        population: f64,
        priors: &PriorConfig,
    ) -> Result<Self, FitError> {
        series.validate_for_fit()?;
        validate_priors(priors)?;

        let latest = series.latest_count().unwrap_or(0.0);
        if !(population.is_finite() && population > 0.0) {
            return Err(FitError::config(format!(
                "{}: population ceiling must be finite and > 0, got {population}",
                series.country
            )));
        }
        if population <= latest {
            return Err(FitError::config(format!(
                "{}: population ceiling {population} does not exceed the latest count {latest}",
                series.country
            )));
        }

        let plateau_lower = latest.max(1.0).ln();
        let plateau_upper = population.ln();
        if plateau_upper <= plateau_lower {
            return Err(FitError::config(format!(
                "{}: population ceiling {population} leaves no room above the plateau floor",
                series.country
            )));
        }

        let (x, y) = likelihood_rows(series, priors);
        if x.len() < MIN_FIT_POINTS {
            return Err(FitError::invalid_input(format!(
                "{}: only {} rows above the count threshold {}",
                series.country,
                x.len(),
                priors.count_threshold
            )));
        }

        let a_hat = point.params.decode().growth_rate;
        let growth = match priors.growth {
            GrowthPrior::Lognormal => ResolvedGrowthPrior::LogNormal(prior(
                "growth",
                Normal::new(point.params.la, priors.growth_sigma),
            )?),
            GrowthPrior::Gamma => ResolvedGrowthPrior::Gamma {
                dist: prior(
                    "growth",
                    Gamma::new(
                        priors.gamma_shape,
                        (priors.gamma_shape - 1.0) / a_hat.max(f64::EPSILON),
                    ),
                )?,
                lower: priors.gamma_lower,
            },
        };

        // Empirical spread of the daily increments sets the noise scale.
        let increment_var = variance(&increments(&y))
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(1.0)
            .max(1.0);
        let likelihood = match priors.likelihood {
            LikelihoodKind::Normal => ResolvedLikelihood::Normal {
                scale: increment_var.sqrt(),
            },
            LikelihoodKind::Negbin => ResolvedLikelihood::NegBinomial(prior(
                "dispersion",
                InverseGamma::new(priors.dispersion_shape, increment_var),
            )?),
        };

        let midpoint = prior(
            "midpoint",
            Normal::new(priors.midpoint_day.ln(), priors.midpoint_sigma),
        )?;
        let plateau = prior(
            "plateau",
            Normal::new(
                point.params.lc.clamp(plateau_lower, plateau_upper),
                priors.plateau_sigma,
            ),
        )?;

        Ok(Self {
            x,
            y,
            growth,
            midpoint,
            plateau,
            plateau_lower,
            plateau_upper,
            likelihood,
        })
    }

    /// Number of observations entering the likelihood.
    pub fn fit_rows(&self) -> usize {
        self.x.len()
    }

    pub fn growth_prior(&self) -> ResolvedGrowthPrior {
        self.growth
    }

    pub fn likelihood(&self) -> ResolvedLikelihood {
        self.likelihood
    }

    /// `[ln(latest), ln(population)]`.
    pub fn plateau_bounds(&self) -> (f64, f64) {
        (self.plateau_lower, self.plateau_upper)
    }

    /// Map a least-squares fit into the unconstrained space.
    pub fn initial_theta(&self, point: &PointFit) -> Vec<f64> {
        let a = point.params.decode().growth_rate;
        let g = match self.growth {
            ResolvedGrowthPrior::LogNormal { .. } => point.params.la,
            ResolvedGrowthPrior::Gamma { lower, .. } => (a - lower).max(EDGE).ln(),
        };

        let span = self.plateau_upper - self.plateau_lower;
        let frac = ((point.params.lc - self.plateau_lower) / span).clamp(EDGE, 1.0 - EDGE);
        let z = (frac / (1.0 - frac)).ln();

        let q = match self.likelihood {
            ResolvedLikelihood::Normal { scale } => scale.ln(),
            // Prior mode β / (α + 1).
            ResolvedLikelihood::NegBinomial(d) => (d.rate() / (d.shape() + 1.0)).ln(),
        };

        vec![g, point.params.lb, z, q]
    }

    /// Decode an unconstrained vector into model units.
    pub fn decode(&self, theta: &[f64]) -> PosteriorSample {
        let la = match self.growth {
            ResolvedGrowthPrior::LogNormal { .. } => theta[0],
            ResolvedGrowthPrior::Gamma { lower, .. } => (lower + theta[0].exp()).ln(),
        };
        let span = self.plateau_upper - self.plateau_lower;
        let lc = self.plateau_lower + span * sigmoid(theta[2]);
        PosteriorSample {
            params: LogParams {
                la,
                lb: theta[1],
                lc,
            },
            noise: theta[3].exp(),
        }
    }

    /// Unnormalized log posterior at `θ` (including transform Jacobians).
    pub fn log_density(&self, theta: &[f64]) -> f64 {
        if theta.len() != DIM || theta.iter().any(|v| !v.is_finite()) {
            return f64::NEG_INFINITY;
        }
        let sample = self.decode(theta);
        let mut lp = 0.0;

        lp += match self.growth {
            ResolvedGrowthPrior::LogNormal(d) => d.ln_pdf(theta[0]),
            ResolvedGrowthPrior::Gamma { dist, lower } => {
                dist.ln_pdf(lower + theta[0].exp()) + theta[0]
            }
        };

        lp += self.midpoint.ln_pdf(theta[1]);

        // ln σ(z) + ln(1 - σ(z)) = -softplus(-z) - softplus(z)
        let span = self.plateau_upper - self.plateau_lower;
        lp += self.plateau.ln_pdf(sample.params.lc) + span.ln()
            - softplus(-theta[2])
            - softplus(theta[2]);

        lp += match self.likelihood {
            ResolvedLikelihood::Normal { scale } => half_normal_lpdf(sample.noise, scale) + theta[3],
            ResolvedLikelihood::NegBinomial(d) => d.ln_pdf(sample.noise) + theta[3],
        };
        if !lp.is_finite() {
            return f64::NEG_INFINITY;
        }

        lp + self.log_likelihood(&sample)
    }

    fn log_likelihood(&self, sample: &PosteriorSample) -> f64 {
        let residual = match self.likelihood {
            ResolvedLikelihood::Normal { .. } => match Normal::new(0.0, sample.noise) {
                Ok(d) => Some(d),
                Err(_) => return f64::NEG_INFINITY,
            },
            ResolvedLikelihood::NegBinomial(_) => None,
        };

        let mut ll = 0.0;
        for (&xi, &yi) in self.x.iter().zip(&self.y) {
            let mu = predict_log(xi, &sample.params);
            ll += match &residual {
                Some(d) => d.ln_pdf(yi - mu),
                None => neg_binomial_lpmf(yi.round().max(0.0) as u64, mu.max(MIN_MEAN), sample.noise),
            };
        }
        if ll.is_finite() { ll } else { f64::NEG_INFINITY }
    }
}

/// Rows entering the likelihood: all rows for the normal model, rows strictly
/// above the count threshold for the negative binomial.
fn likelihood_rows(series: &TimeSeries, priors: &PriorConfig) -> (Vec<f64>, Vec<f64>) {
    let x = series.day_offsets();
    let y = series.counts();
    match priors.likelihood {
        LikelihoodKind::Normal => (x, y),
        LikelihoodKind::Negbin => x
            .into_iter()
            .zip(y)
            .filter(|(_, yi)| *yi > priors.count_threshold)
            .unzip(),
    }
}

fn prior<D, E: std::fmt::Display>(name: &str, built: Result<D, E>) -> Result<D, FitError> {
    built.map_err(|e| FitError::config(format!("invalid {name} prior: {e}")))
}

/// Checks the settings the distribution constructors cannot see.
fn validate_priors(priors: &PriorConfig) -> Result<(), FitError> {
    if !(priors.midpoint_day.is_finite() && priors.midpoint_day > 0.0) {
        return Err(FitError::config(format!(
            "midpoint_day must be finite and > 0, got {}",
            priors.midpoint_day
        )));
    }
    if priors.growth == GrowthPrior::Gamma {
        if !(priors.gamma_shape.is_finite() && priors.gamma_shape > 1.0) {
            return Err(FitError::config(format!(
                "gamma_shape must be > 1 for an interior mode, got {}",
                priors.gamma_shape
            )));
        }
        if !(priors.gamma_lower.is_finite() && priors.gamma_lower >= 0.0) {
            return Err(FitError::config(format!(
                "gamma_lower must be finite and >= 0, got {}",
                priors.gamma_lower
            )));
        }
    }
    if !priors.count_threshold.is_finite() {
        return Err(FitError::config("count_threshold must be finite"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GrowthParams;
    use crate::fit::least_squares::{LeastSquaresOptions, fit_point};
    use crate::models::predict;
    use chrono::NaiveDate;

    fn series() -> TimeSeries {
        let truth = GrowthParams::new(3.0, 30.0, 100_000.0).unwrap();
        let counts: Vec<f64> = (0..60).map(|i| predict(i as f64, &truth).round()).collect();
        TimeSeries::from_daily("Testland", NaiveDate::from_ymd_opt(2020, 1, 22).unwrap(), &counts)
    }

    #[test]
    fn ceiling_below_latest_count_is_config_error() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let latest = s.latest_count().unwrap();
        let err = PosteriorModel::new(&s, &fit, latest - 1.0, &PriorConfig::default()).unwrap_err();
        assert!(matches!(err, FitError::Config(_)), "{err:?}");
    }

    #[test]
    fn negative_binomial_uses_only_rows_above_threshold() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let priors = PriorConfig::default();
        let expected = s.counts().iter().filter(|&&c| c > priors.count_threshold).count();
        assert!(expected < s.len(), "fixture should contain rows below the threshold");

        let model = PosteriorModel::new(&s, &fit, 1e9, &priors).unwrap();
        assert_eq!(model.fit_rows(), expected);
    }

    #[test]
    fn normal_likelihood_uses_every_row() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let priors = PriorConfig {
            likelihood: LikelihoodKind::Normal,
            ..PriorConfig::default()
        };
        let model = PosteriorModel::new(&s, &fit, 1e9, &priors).unwrap();
        assert_eq!(model.fit_rows(), s.len());
    }

    #[test]
    fn plateau_always_within_bounds() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let model = PosteriorModel::new(&s, &fit, 2e5, &PriorConfig::default()).unwrap();
        let (lo, hi) = model.plateau_bounds();
        for z in [-50.0, -3.0, 0.0, 3.0, 50.0] {
            let lc = model.decode(&[1.0, 3.4, z, 0.0]).params.lc;
            assert!(lc >= lo && lc <= hi, "z={z} gave lc={lc} outside [{lo}, {hi}]");
        }
        assert!((lo - s.latest_count().unwrap().ln()).abs() < 1e-12);
        assert!((hi - 2e5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn initial_theta_round_trips_point_fit() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        for growth in [GrowthPrior::Lognormal, GrowthPrior::Gamma] {
            let priors = PriorConfig {
                growth,
                ..PriorConfig::default()
            };
            let model = PosteriorModel::new(&s, &fit, 1e9, &priors).unwrap();
            let theta = model.initial_theta(&fit);
            let back = model.decode(&theta).params;
            assert!((back.la - fit.params.la).abs() < 1e-9);
            assert!((back.lb - fit.params.lb).abs() < 1e-12);
            assert!((back.lc - fit.params.lc).abs() < 1e-3);
            assert!(model.log_density(&theta).is_finite());
        }
    }

    #[test]
    fn invalid_prior_settings_are_config_errors() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let cases = [
            PriorConfig {
                plateau_sigma: 0.0,
                ..PriorConfig::default()
            },
            PriorConfig {
                midpoint_sigma: -1.0,
                ..PriorConfig::default()
            },
            PriorConfig {
                dispersion_shape: 0.0,
                ..PriorConfig::default()
            },
            PriorConfig {
                growth: GrowthPrior::Lognormal,
                growth_sigma: f64::NAN,
                ..PriorConfig::default()
            },
            PriorConfig {
                midpoint_day: 0.0,
                ..PriorConfig::default()
            },
        ];
        for priors in cases {
            let err = PosteriorModel::new(&s, &fit, 1e9, &priors).unwrap_err();
            assert!(matches!(err, FitError::Config(_)), "{priors:?}: {err:?}");
        }
    }

    #[test]
    fn resolved_priors_carry_configured_hyperparameters() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let priors = PriorConfig::default();
        let model = PosteriorModel::new(&s, &fit, 1e9, &priors).unwrap();

        let ResolvedGrowthPrior::Gamma { dist, lower } = model.growth_prior() else {
            panic!("default growth prior is the bounded gamma");
        };
        assert_eq!(dist.shape(), priors.gamma_shape);
        assert_eq!(lower, priors.gamma_lower);
        // Mode (shape - 1) / rate sits on the least-squares growth rate.
        let a_hat = fit.params.decode().growth_rate;
        assert!(((dist.shape() - 1.0) / dist.rate() - a_hat).abs() < 1e-9);

        let ResolvedLikelihood::NegBinomial(d) = model.likelihood() else {
            panic!("default likelihood is the negative binomial");
        };
        assert_eq!(d.shape(), priors.dispersion_shape);
        assert!(d.rate() >= 1.0);
    }

    #[test]
    fn log_density_rejects_non_finite_input() {
        let s = series();
        let fit = fit_point(&s, &LeastSquaresOptions::default()).unwrap();
        let model = PosteriorModel::new(&s, &fit, 1e9, &PriorConfig::default()).unwrap();
        assert_eq!(model.log_density(&[f64::NAN, 0.0, 0.0, 0.0]), f64::NEG_INFINITY);
        assert_eq!(model.log_density(&[0.0, 0.0]), f64::NEG_INFINITY);
    }
}
