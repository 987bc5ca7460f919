//! Small descriptive statistics over sample slices.
//!
//! Moments come from `statrs::statistics::Statistics`; these wrappers turn
//! its `NaN` for too-short input into `None`. Percentiles keep their own
//! linear interpolation so the 90/10 band is pinned to one definition.

use statrs::statistics::Statistics;

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Unbiased sample variance; `None` with fewer than two values.
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(values.iter().variance())
}

/// Day-over-day differences.
pub fn increments(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is in percent (`0..=100`). Matches the common "linear" definition, so
/// `percentile(&[1, 2, 3, 4], 50) == 2.5`.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !q.is_finite() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(percentile_sorted(&sorted, q))
}

/// Percentile of an already sorted, finite slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 100.0) / 100.0;
    let pos = q * (sorted.len() as f64 - 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Gelman–Rubin potential scale reduction factor across chains.
///
/// Chains must have equal length ≥ 2. Returns `None` for fewer than two chains.
pub fn r_hat(chains: &[Vec<f64>]) -> Option<f64> {
    if chains.len() < 2 {
        return None;
    }
    let n = chains[0].len();
    if n < 2 || chains.iter().any(|c| c.len() != n) {
        return None;
    }

    let means: Vec<f64> = chains.iter().filter_map(|c| mean(c)).collect();
    let within: f64 = chains.iter().filter_map(|c| variance(c)).sum::<f64>() / chains.len() as f64;
    let between = n as f64 * variance(&means)?;

    if within <= 0.0 {
        return Some(if between <= 0.0 { 1.0 } else { f64::INFINITY });
    }

    let n_f = n as f64;
    let var_hat = (n_f - 1.0) / n_f * within + between / n_f;
    Some((var_hat / within).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_linear_interpolation() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert!((percentile(&v, 50.0).unwrap() - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 0.0).unwrap() - 1.0).abs() < 1e-12);
        assert!((percentile(&v, 100.0).unwrap() - 4.0).abs() < 1e-12);
        assert!((percentile(&v, 90.0).unwrap() - 3.7).abs() < 1e-12);
    }

    #[test]
    fn variance_and_increments() {
        assert_eq!(increments(&[1.0, 3.0, 6.0]), vec![2.0, 3.0]);
        assert!((variance(&[2.0, 3.0]).unwrap() - 0.5).abs() < 1e-12);
        assert!(variance(&[1.0]).is_none());
    }

    #[test]
    fn moments_match_closed_form() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v).unwrap() - 5.0).abs() < 1e-12);
        // Sum of squared deviations 32 over n - 1 = 7.
        assert!((variance(&v).unwrap() - 32.0 / 7.0).abs() < 1e-12);
        assert!(mean(&[]).is_none());
    }

    #[test]
    fn r_hat_near_one_for_identical_chains() {
        let c: Vec<f64> = (0..100).map(|i| (i as f64 * 0.37).sin()).collect();
        let r = r_hat(&[c.clone(), c]).unwrap();
        assert!((r - 1.0).abs() < 0.02, "r_hat = {r}");
    }

    #[test]
    fn r_hat_large_for_separated_chains() {
        let a: Vec<f64> = (0..100).map(|i| (i as f64 * 0.37).sin()).collect();
        let b: Vec<f64> = a.iter().map(|v| v + 10.0).collect();
        assert!(r_hat(&[a, b]).unwrap() > 2.0);
    }
}
