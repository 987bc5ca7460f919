//! Hamiltonian Monte Carlo over an unconstrained log density.
//!
//! Each chain:
//!
//! - starts from a jittered copy of the supplied point
//! - tunes its step size with dual averaging towards `target_accept`
//! - estimates a dense mass matrix over doubling tuning windows, restarting
//!   the step-size adaptation after each one
//! - draws its leapfrog count per transition around `leapfrog_steps`
//! - records `draws` post-tuning positions
//!
//! Chains run in parallel; chain `k` uses an RNG seeded from `seed` and `k`,
//! and results come back in chain order, so a fixed seed reproduces the pooled
//! draws exactly regardless of thread scheduling.
//!
//! Gradients are central finite differences of the log density.

use std::ops::Range;

use finitediff::FiniteDiff;
use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::domain::SamplerConfig;
use crate::error::FitError;
use crate::fit::posterior::{self, PosteriorModel};

/// Energy error above which a trajectory is counted as divergent.
const MAX_ENERGY_ERROR: f64 = 1000.0;

/// Spacing between per-chain seeds.
const CHAIN_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Half-width of the uniform jitter applied to each chain's start.
const START_JITTER: f64 = 0.05;

// Dual-averaging constants (Hoffman & Gelman 2014).
const DA_GAMMA: f64 = 0.05;
const DA_T0: f64 = 10.0;
const DA_KAPPA: f64 = 0.75;

// Tuning schedule: fast step-size-only buffers around doubling slow windows.
const INIT_BUFFER: usize = 75;
const TERM_BUFFER: usize = 50;
const BASE_WINDOW: usize = 25;

/// Fewest window samples a mass-matrix update is estimated from.
const MIN_WINDOW_SAMPLES: usize = 10;

/// An unnormalized log density on `R^dim`.
///
/// Returning `-∞` marks a point outside the support.
pub trait LogDensity: Sync {
    fn dim(&self) -> usize;
    fn log_density(&self, theta: &[f64]) -> f64;
}

impl LogDensity for PosteriorModel {
    fn dim(&self) -> usize {
        posterior::DIM
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        PosteriorModel::log_density(self, theta)
    }
}

/// Output of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    /// Post-tuning positions, one per draw.
    pub draws: Vec<Vec<f64>>,
    /// Mean acceptance probability over the post-tuning draws.
    pub acceptance_rate: f64,
    /// Divergent post-tuning transitions.
    pub divergent: usize,
    /// Step size used after tuning.
    pub step_size: f64,
}

/// Run `config.chains` chains from `start`.
pub fn sample<D: LogDensity>(
    target: &D,
    start: &[f64],
    config: &SamplerConfig,
) -> Result<Vec<Chain>, FitError> {
    validate_config(config)?;
    if start.len() != target.dim() {
        return Err(FitError::invalid_input(format!(
            "start point has {} coordinates, density has {}",
            start.len(),
            target.dim()
        )));
    }
    if !target.log_density(start).is_finite() {
        return Err(FitError::numerical("log density is not finite at the sampler start"));
    }

    let chains: Vec<Chain> = (0..config.chains)
        .into_par_iter()
        .map(|k| {
            let seed = config
                .seed
                .wrapping_add((k as u64).wrapping_mul(CHAIN_SEED_STRIDE));
            run_chain(target, start, config, seed)
        })
        .collect();

    for (k, chain) in chains.iter().enumerate() {
        debug!(
            "chain {k}: step size {:.4}, acceptance {:.3}, {} divergent",
            chain.step_size, chain.acceptance_rate, chain.divergent
        );
    }
    Ok(chains)
}

fn validate_config(config: &SamplerConfig) -> Result<(), FitError> {
    if config.draws == 0 {
        return Err(FitError::config("draws must be > 0"));
    }
    if config.chains < 2 {
        return Err(FitError::config(format!(
            "at least 2 chains are needed for convergence checks, got {}",
            config.chains
        )));
    }
    if config.leapfrog_steps == 0 {
        return Err(FitError::config("leapfrog_steps must be > 0"));
    }
    if !(config.target_accept > 0.0 && config.target_accept < 1.0) {
        return Err(FitError::config(format!(
            "target_accept must be in (0, 1), got {}",
            config.target_accept
        )));
    }
    if let Some(eps) = config.initial_step_size {
        if !(eps.is_finite() && eps > 0.0) {
            return Err(FitError::config(format!(
                "initial_step_size must be finite and > 0, got {eps}"
            )));
        }
    }
    Ok(())
}

/// Slow mass-matrix windows over the tuning iterations.
///
/// With enough tuning the schedule is a 75-iteration initial buffer, windows
/// of 25, 50, 100, ... and a 50-iteration terminal buffer; the last window is
/// stretched up to the terminal buffer. Shorter tuning uses 15% / 75% / 10%
/// with a single window.
fn mass_windows(tune: usize) -> Vec<Range<usize>> {
    let (init, term, base) = if tune >= INIT_BUFFER + BASE_WINDOW + TERM_BUFFER {
        (INIT_BUFFER, TERM_BUFFER, BASE_WINDOW)
    } else {
        let init = tune * 15 / 100;
        let term = tune / 10;
        (init, term, tune - init - term)
    };

    let end = tune - term;
    let mut windows = Vec::new();
    let mut start = init;
    let mut size = base;
    while size > 0 && start < end {
        let mut stop = (start + size).min(end);
        if stop + 2 * size > end {
            stop = end;
        }
        windows.push(start..stop);
        start = stop;
        size *= 2;
    }
    windows
}

/// Euclidean metric for the kinetic energy.
#[derive(Debug, Clone)]
struct Metric {
    /// Inverse mass matrix, a covariance estimate of the position.
    inv_mass: DMatrix<f64>,
    /// Lower Cholesky factor of `inv_mass`.
    factor: DMatrix<f64>,
}

impl Metric {
    fn identity(dim: usize) -> Self {
        Self {
            inv_mass: DMatrix::identity(dim, dim),
            factor: DMatrix::identity(dim, dim),
        }
    }

    /// Sample covariance of `window` shrunk towards a small multiple of the
    /// identity. `None` when the estimate is not positive definite.
    fn from_window(window: &[Vec<f64>]) -> Option<Self> {
        let n = window.len();
        let dim = window.first()?.len();
        if n < 2 {
            return None;
        }
        let rows = DMatrix::from_fn(n, dim, |i, j| window[i][j]);
        let mean = rows.row_mean();
        let centered = DMatrix::from_fn(n, dim, |i, j| rows[(i, j)] - mean[j]);
        let cov = centered.transpose() * &centered / (n as f64 - 1.0);

        let nf = n as f64;
        let shrunk = cov * (nf / (nf + 5.0))
            + DMatrix::<f64>::identity(dim, dim) * (1e-3 * 5.0 / (nf + 5.0));
        if shrunk.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let factor = Cholesky::new(shrunk.clone())?.l();
        Some(Self {
            inv_mass: shrunk,
            factor,
        })
    }

    /// `p ~ N(0, M)` with `M` the inverse of `inv_mass = L Lᵀ`: solves `Lᵀ p = z`.
    fn draw_momentum(&self, rng: &mut StdRng) -> DVector<f64> {
        let dim = self.inv_mass.nrows();
        let z: DVector<f64> =
            DVector::from_iterator(dim, (0..dim).map(|_| rng.sample::<f64, _>(StandardNormal)));
        match self.factor.tr_solve_lower_triangular(&z) {
            Some(p) => p,
            None => z,
        }
    }

    fn velocity(&self, momentum: &DVector<f64>) -> DVector<f64> {
        &self.inv_mass * momentum
    }

    fn kinetic(&self, momentum: &DVector<f64>) -> f64 {
        0.5 * momentum.dot(&self.velocity(momentum))
    }
}

/// Position with its cached log density and gradient.
#[derive(Debug, Clone)]
struct Point {
    theta: Vec<f64>,
    log_density: f64,
    grad: Vec<f64>,
}

impl Point {
    fn at<D: LogDensity>(target: &D, theta: Vec<f64>) -> Self {
        let log_density = target.log_density(&theta);
        let grad = gradient(target, &theta);
        Self {
            theta,
            log_density,
            grad,
        }
    }

    fn is_finite(&self) -> bool {
        self.log_density.is_finite() && self.grad.iter().all(|g| g.is_finite())
    }
}

fn gradient<D: LogDensity>(target: &D, theta: &[f64]) -> Vec<f64> {
    let x = theta.to_vec();
    x.central_diff(&|t: &Vec<f64>| target.log_density(t))
}

struct Transition {
    point: Point,
    accept_prob: f64,
    divergent: bool,
}

struct DualAveraging {
    mu: f64,
    h_bar: f64,
    log_eps_bar: f64,
    iteration: f64,
    target: f64,
}

impl DualAveraging {
    fn new(step_size: f64, target: f64) -> Self {
        Self {
            mu: (10.0 * step_size).ln(),
            h_bar: 0.0,
            log_eps_bar: 0.0,
            iteration: 0.0,
            target,
        }
    }

    /// Feed one acceptance probability; returns the next step size to try.
    fn update(&mut self, accept_prob: f64) -> f64 {
        self.iteration += 1.0;
        let m = self.iteration;
        let w = 1.0 / (m + DA_T0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target - accept_prob);
        let log_eps = self.mu - m.sqrt() / DA_GAMMA * self.h_bar;
        let eta = m.powf(-DA_KAPPA);
        self.log_eps_bar = eta * log_eps + (1.0 - eta) * self.log_eps_bar;
        log_eps.exp()
    }

    /// Averaged step size, or `fallback` before any update.
    fn final_step_size(&self, fallback: f64) -> f64 {
        if self.iteration == 0.0 {
            fallback
        } else {
            self.log_eps_bar.exp()
        }
    }
}

fn run_chain<D: LogDensity>(target: &D, start: &[f64], config: &SamplerConfig, seed: u64) -> Chain {
    let mut rng = StdRng::seed_from_u64(seed);
    let dim = start.len();

    let mut current = jittered_start(target, start, &mut rng);
    let mut metric = Metric::identity(dim);
    let mut step_size = starting_step_size(target, &current, &metric, config, &mut rng);
    let mut adapt = DualAveraging::new(step_size, config.target_accept);

    let windows = mass_windows(config.tune);
    let mut next_window = 0;
    let mut window: Vec<Vec<f64>> = Vec::new();

    for i in 0..config.tune {
        let steps = jittered_steps(config.leapfrog_steps, &mut rng);
        let t = transition(target, &current, step_size, &metric, steps, &mut rng);
        current = t.point;
        step_size = adapt.update(t.accept_prob);

        let Some(w) = windows.get(next_window) else {
            continue;
        };
        if w.contains(&i) {
            window.push(current.theta.clone());
        }
        if i + 1 == w.end {
            if window.len() >= MIN_WINDOW_SAMPLES {
                match Metric::from_window(&window) {
                    Some(m) => metric = m,
                    None => debug!("mass window {}..{} is degenerate; keeping the metric", w.start, w.end),
                }
            }
            window.clear();
            next_window += 1;
            step_size = starting_step_size(target, &current, &metric, config, &mut rng);
            adapt = DualAveraging::new(step_size, config.target_accept);
        }
    }
    step_size = adapt.final_step_size(step_size);

    let mut draws = Vec::with_capacity(config.draws);
    let mut accept_sum = 0.0;
    let mut divergent = 0usize;
    for _ in 0..config.draws {
        let steps = jittered_steps(config.leapfrog_steps, &mut rng);
        let t = transition(target, &current, step_size, &metric, steps, &mut rng);
        accept_sum += t.accept_prob;
        if t.divergent {
            divergent += 1;
        }
        current = t.point;
        draws.push(current.theta.clone());
    }

    Chain {
        draws,
        acceptance_rate: accept_sum / config.draws as f64,
        divergent,
        step_size,
    }
}

fn jittered_start<D: LogDensity>(target: &D, start: &[f64], rng: &mut StdRng) -> Point {
    let theta: Vec<f64> = start
        .iter()
        .map(|&v| v + rng.gen_range(-START_JITTER..START_JITTER))
        .collect();
    let point = Point::at(target, theta);
    if point.is_finite() {
        point
    } else {
        Point::at(target, start.to_vec())
    }
}

/// Leapfrog count for one transition, uniform on `[ceil(n/2), n + n/2]`.
fn jittered_steps(steps: usize, rng: &mut StdRng) -> usize {
    rng.gen_range(steps.div_ceil(2)..=steps + steps / 2)
}

fn starting_step_size<D: LogDensity>(
    target: &D,
    point: &Point,
    metric: &Metric,
    config: &SamplerConfig,
    rng: &mut StdRng,
) -> f64 {
    match config.initial_step_size {
        Some(eps) => eps,
        None => initial_step_size(target, point, metric, rng),
    }
}

/// Double or halve a trial step until the one-step acceptance crosses 1/2.
fn initial_step_size<D: LogDensity>(
    target: &D,
    point: &Point,
    metric: &Metric,
    rng: &mut StdRng,
) -> f64 {
    let mut eps = 0.1;
    let momentum = metric.draw_momentum(rng);
    let h0 = hamiltonian(point.log_density, &momentum, metric);

    let log_ratio = |eps: f64| {
        let (next, p) = leapfrog(target, point, &momentum, eps, metric, 1);
        let h1 = hamiltonian(next.log_density, &p, metric);
        if h1.is_finite() { h0 - h1 } else { f64::NEG_INFINITY }
    };

    let direction = if log_ratio(eps) > 0.5f64.ln() { 1.0 } else { -1.0 };
    for _ in 0..50 {
        let r = log_ratio(eps);
        if direction * r <= direction * 0.5f64.ln() {
            break;
        }
        eps *= 2f64.powf(direction);
    }
    eps.clamp(1e-6, 10.0)
}

fn hamiltonian(log_density: f64, momentum: &DVector<f64>, metric: &Metric) -> f64 {
    metric.kinetic(momentum) - log_density
}

fn leapfrog<D: LogDensity>(
    target: &D,
    start: &Point,
    momentum: &DVector<f64>,
    eps: f64,
    metric: &Metric,
    steps: usize,
) -> (Point, DVector<f64>) {
    let mut p = momentum.clone();
    let mut point = start.clone();
    for _ in 0..steps {
        for (pi, g) in p.iter_mut().zip(&point.grad) {
            *pi += 0.5 * eps * g;
        }
        let velocity = metric.velocity(&p);
        let theta: Vec<f64> = point
            .theta
            .iter()
            .zip(velocity.iter())
            .map(|(x, v)| x + eps * v)
            .collect();
        point = Point::at(target, theta);
        if !point.is_finite() {
            break;
        }
        for (pi, g) in p.iter_mut().zip(&point.grad) {
            *pi += 0.5 * eps * g;
        }
    }
    (point, p)
}

fn transition<D: LogDensity>(
    target: &D,
    current: &Point,
    eps: f64,
    metric: &Metric,
    steps: usize,
    rng: &mut StdRng,
) -> Transition {
    let momentum = metric.draw_momentum(rng);
    let h0 = hamiltonian(current.log_density, &momentum, metric);
    let (proposal, p) = leapfrog(target, current, &momentum, eps, metric, steps);
    let h1 = hamiltonian(proposal.log_density, &p, metric);

    let energy_error = h1 - h0;
    if !proposal.is_finite() || !energy_error.is_finite() || energy_error > MAX_ENERGY_ERROR {
        return Transition {
            point: current.clone(),
            accept_prob: 0.0,
            divergent: true,
        };
    }

    let accept_prob = (-energy_error).exp().min(1.0);
    let u: f64 = rng.gen_range(0.0..1.0);
    let point = if u < accept_prob {
        proposal
    } else {
        current.clone()
    };
    Transition {
        point,
        accept_prob,
        divergent: false,
    }
}
