//! Peak date and plateau size derived from either estimator.
//!
//! The plateau text is parsed downstream, so its shape is fixed:
//!
//! - `"1.50 million"` / `"0.75 thousand"` for a point estimate
//! - `"1.50 million (1.80, 1.20)"` for a posterior, central value first,
//!   then the 90th and 10th percentiles in the central value's unit

use chrono::{Duration, NaiveDate};

use crate::domain::{CountrySummary, PlateauEstimate, PointFit, SummaryConfig, TimeSeries};
use crate::error::FitError;
use crate::fit::PosteriorFit;
use crate::math::{mean, percentile};

/// Display unit of a plateau value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Thousand,
    Million,
}

impl Unit {
    /// Millions strictly above `threshold`, thousands otherwise.
    pub fn for_value(value: f64, threshold: f64) -> Self {
        if value > threshold {
            Unit::Million
        } else {
            Unit::Thousand
        }
    }

    fn divisor(self) -> f64 {
        match self {
            Unit::Thousand => 1e3,
            Unit::Million => 1e6,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Unit::Thousand => "thousand",
            Unit::Million => "million",
        }
    }
}

/// `"1.50 million"` / `"0.75 thousand"`.
pub fn format_count(value: f64, threshold: f64) -> String {
    let unit = Unit::for_value(value, threshold);
    format!("{:.2} {}", value / unit.divisor(), unit.label())
}

/// Plateau text as written to the summary record.
pub fn format_plateau(plateau: &PlateauEstimate, threshold: f64) -> String {
    match *plateau {
        PlateauEstimate::Point(v) => format_count(v, threshold),
        PlateauEstimate::Interval {
            central,
            upper,
            lower,
        } => {
            let unit = Unit::for_value(central, threshold);
            let d = unit.divisor();
            format!(
                "{:.2} {} ({:.2}, {:.2})",
                central / d,
                unit.label(),
                upper / d,
                lower / d
            )
        }
    }
}

/// Series start plus `days`, truncated to whole days.
pub fn peak_date(start: NaiveDate, days: f64) -> Result<NaiveDate, FitError> {
    if !(days.is_finite() && days >= 0.0) {
        return Err(FitError::numerical(format!("peak offset {days} is not a finite day count")));
    }
    start
        .checked_add_signed(Duration::days(days.floor() as i64))
        .ok_or_else(|| FitError::numerical(format!("peak offset {days} days is out of the calendar range")))
}

/// Summary entry from a least-squares fit.
pub fn summarize_point(
    series: &TimeSeries,
    fit: &PointFit,
    config: &SummaryConfig,
) -> Result<CountrySummary, FitError> {
    let start = start_date(series)?;
    let params = fit.params.decode();
    let peak = peak_date(start, params.midpoint)?;
    if !params.plateau.is_finite() {
        return Err(FitError::numerical("plateau estimate is not finite"));
    }
    Ok(CountrySummary {
        country: series.country.clone(),
        peak_date: peak,
        peak_label: peak.format(&config.date_format).to_string(),
        plateau: PlateauEstimate::Point(params.plateau),
        reliable: true,
    })
}

/// Summary entry from pooled posterior draws.
pub fn summarize_posterior(
    series: &TimeSeries,
    fit: &PosteriorFit,
    config: &SummaryConfig,
) -> Result<CountrySummary, FitError> {
    let start = start_date(series)?;
    let midpoints: Vec<f64> = fit.samples.iter().map(|s| s.params.lb.exp()).collect();
    let plateaus: Vec<f64> = fit.samples.iter().map(|s| s.params.lc.exp()).collect();

    let empty = || FitError::numerical("posterior has no samples");
    let peak = peak_date(start, mean(&midpoints).ok_or_else(empty)?)?;
    let central = mean(&plateaus).ok_or_else(empty)?;
    let upper = percentile(&plateaus, 90.0).ok_or_else(empty)?;
    let lower = percentile(&plateaus, 10.0).ok_or_else(empty)?;
    if !central.is_finite() {
        return Err(FitError::numerical("posterior plateau mean is not finite"));
    }

    Ok(CountrySummary {
        country: series.country.clone(),
        peak_date: peak,
        peak_label: peak.format(&config.date_format).to_string(),
        plateau: PlateauEstimate::Interval {
            central,
            upper,
            lower,
        },
        reliable: fit.diagnostics.reliable,
    })
}

fn start_date(series: &TimeSeries) -> Result<NaiveDate, FitError> {
    series
        .start_date()
        .ok_or_else(|| FitError::invalid_input(format!("{}: empty series", series.country)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GrowthParams, LogParams};
    use crate::fit::{MapEstimate, PosteriorDiagnostics, PosteriorSample};
    use nalgebra::Matrix3;

    const THRESHOLD: f64 = 1_000_000.0;

    #[test]
    fn formats_millions_and_thousands() {
        assert_eq!(format_count(1_500_000.0, THRESHOLD), "1.50 million");
        assert_eq!(format_count(750.0, THRESHOLD), "0.75 thousand");
        assert_eq!(format_count(100_000.0, THRESHOLD), "100.00 thousand");
    }

    #[test]
    fn threshold_itself_stays_in_thousands() {
        assert_eq!(format_count(1_000_000.0, THRESHOLD), "1000.00 thousand");
        assert_eq!(format_count(1_000_000.5, THRESHOLD), "1.00 million");
        assert_eq!(format_count(12_345.0, 10_000.0), "0.01 million");
    }

    #[test]
    fn interval_uses_central_unit() {
        let plateau = PlateauEstimate::Interval {
            central: 1_500_000.0,
            upper: 1_800_000.0,
            lower: 1_200_000.0,
        };
        assert_eq!(format_plateau(&plateau, THRESHOLD), "1.50 million (1.80, 1.20)");

        let straddling = PlateauEstimate::Interval {
            central: 900_000.0,
            upper: 1_100_000.0,
            lower: 700_000.0,
        };
        assert_eq!(format_plateau(&straddling, THRESHOLD), "900.00 thousand (1100.00, 700.00)");
    }

    #[test]
    fn point_summary_truncates_peak_to_whole_days() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 22).unwrap();
        let series = TimeSeries::from_daily("South Korea", start, &[1.0, 2.0, 4.0, 8.0]);
        let fit = PointFit {
            params: GrowthParams::new(4.0, 30.7, 10_000.0).unwrap().encode(),
            covariance: Matrix3::zeros(),
            sse: 0.0,
            rmse: 0.0,
            n: 4,
            evaluations: 1,
        };
        let summary = summarize_point(&series, &fit, &SummaryConfig::default()).unwrap();
        assert_eq!(summary.peak_date, NaiveDate::from_ymd_opt(2020, 2, 21).unwrap());
        assert_eq!(summary.peak_label, "Feb 21, 2020");
        assert_eq!(summary.key(), "SouthKorea");
        assert_eq!(format_plateau(&summary.plateau, THRESHOLD), "10.00 thousand");
    }

    #[test]
    fn posterior_summary_uses_mean_and_percentiles() {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let series = TimeSeries::from_daily("Italy", start, &[1.0, 2.0, 4.0, 8.0]);
        let samples: Vec<PosteriorSample> = (1..=11)
            .map(|i| PosteriorSample {
                params: LogParams {
                    la: 0.0,
                    lb: (10.5 + i as f64).ln(),
                    lc: (i as f64 * 100_000.0).ln(),
                },
                noise: 1.0,
            })
            .collect();
        let fit = PosteriorFit {
            samples,
            horizon: Vec::new(),
            curves: Vec::new(),
            diagnostics: PosteriorDiagnostics {
                map: MapEstimate {
                    theta: vec![0.0; 4],
                    log_density: 0.0,
                    iterations: 0,
                    converged: true,
                },
                fit_rows: 4,
                chains: Vec::new(),
                r_hat: vec![1.0; 4],
                reliable: false,
            },
        };

        let summary = summarize_posterior(&series, &fit, &SummaryConfig::default()).unwrap();
        // mean midpoint 16.5 days
        assert_eq!(summary.peak_date, NaiveDate::from_ymd_opt(2020, 3, 17).unwrap());
        assert!(!summary.reliable);
        match summary.plateau {
            PlateauEstimate::Interval {
                central,
                upper,
                lower,
            } => {
                assert!((central - 600_000.0).abs() < 1e-6);
                assert!((upper - 1_000_000.0).abs() < 1e-6);
                assert!((lower - 200_000.0).abs() < 1e-6);
            }
            other => panic!("expected interval, got {other:?}"),
        }
        assert_eq!(
            format_plateau(&summary.plateau, THRESHOLD),
            "600.00 thousand (1000.00, 200.00)"
        );
    }

    #[test]
    fn non_finite_peak_is_rejected() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(matches!(peak_date(start, f64::NAN), Err(FitError::Numerical(_))));
        assert!(matches!(peak_date(start, f64::INFINITY), Err(FitError::Numerical(_))));
    }
}
