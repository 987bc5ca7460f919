//! Shared batch pipeline: ingest -> per-country fits -> summaries/projections.
//!
//! Countries are processed one at a time, in request order. A country that
//! fails is recorded with its reason and the batch moves on; nothing is
//! substituted for it.

use std::path::Path;

use chrono::NaiveDate;
use log::{info, warn};

use crate::domain::{
    CountryFailure, CountrySummary, FitConfig, PipelineKind, PointFit, TimeSeries, country_key,
};
use crate::error::{AppError, FitError};
use crate::fit::{LeastSquaresOptions, PosteriorDiagnostics, fit_point, fit_posterior};
use crate::io::{IngestedData, ProjectionFile, load_case_matrix, write_projection_json, write_summary_yaml};
use crate::plot::{ChartTheme, write_chart_embeds};
use crate::report::{Projection, project_point, project_posterior, summarize_point, summarize_posterior};

/// Everything computed for one successfully fitted country.
#[derive(Debug, Clone)]
pub struct CountryRun {
    pub summary: CountrySummary,
    pub point: PointFit,
    pub projection: Projection,
    /// Present for the posterior pipeline only.
    pub diagnostics: Option<PosteriorDiagnostics>,
}

/// All computed outputs of a single `epi fit` / `epi posterior` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedData,
    pub countries: Vec<CountryRun>,
    pub failures: Vec<CountryFailure>,
}

impl RunOutput {
    pub fn summaries(&self) -> Vec<CountrySummary> {
        self.countries.iter().map(|c| c.summary.clone()).collect()
    }

    pub fn projections(&self) -> Vec<Projection> {
        self.countries.iter().map(|c| c.projection.clone()).collect()
    }
}

/// Load the configured CSV and run the pipeline on it.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let ingest = load_case_matrix(&config.data_path)?;
    run_fit_with_data(config, ingest)
}

/// Run the pipeline on already-ingested data.
///
/// Fails with exit code 3 only when no country at all could be fitted.
pub fn run_fit_with_data(config: &FitConfig, ingest: IngestedData) -> Result<RunOutput, AppError> {
    let selected = ingest.select(&config.countries)?;

    let mut countries = Vec::with_capacity(selected.len());
    let mut failures = Vec::new();
    for series in &selected {
        match fit_country(series, config) {
            Ok(run) => {
                info!(
                    "{}: peak {}, plateau {:.0}",
                    series.country,
                    run.summary.peak_label,
                    run.summary.plateau.central()
                );
                countries.push(run);
            }
            Err(error) => {
                warn!("{}: {error}", series.country);
                failures.push(CountryFailure {
                    country: series.country.clone(),
                    error,
                });
            }
        }
    }

    if countries.is_empty() {
        let reasons: Vec<String> = failures.iter().map(|f| format!("{}: {}", f.country, f.error)).collect();
        return Err(AppError::new(
            3,
            format!("No country could be fitted.\n{}", reasons.join("\n")),
        ));
    }

    Ok(RunOutput {
        ingest,
        countries,
        failures,
    })
}

/// Fit one country with the configured pipeline.
pub fn fit_country(series: &TimeSeries, config: &FitConfig) -> Result<CountryRun, FitError> {
    let opts = LeastSquaresOptions {
        initial_guess: config.initial_guess,
        max_evaluations: config.max_evaluations,
    };
    let point = fit_point(series, &opts)?;

    match config.pipeline {
        PipelineKind::Point => Ok(CountryRun {
            summary: summarize_point(series, &point, &config.summary)?,
            projection: project_point(series, &point, config.future_days)?,
            point,
            diagnostics: None,
        }),
        PipelineKind::Posterior => {
            let population = population_for(config, &series.country)?;
            let horizon = series.projection_horizon(config.future_days);
            let posterior = fit_posterior(
                series,
                &point,
                population,
                &config.priors,
                &config.sampler,
                &horizon,
            )?;
            Ok(CountryRun {
                summary: summarize_posterior(series, &posterior, &config.summary)?,
                projection: project_posterior(series, &posterior)?,
                point,
                diagnostics: Some(posterior.diagnostics),
            })
        }
    }
}

/// Population ceiling by exact name, then by the space-free key.
fn population_for(config: &FitConfig, country: &str) -> Result<f64, FitError> {
    config
        .populations
        .get(country)
        .or_else(|| config.populations.get(&country_key(country)))
        .copied()
        .ok_or_else(|| FitError::config(format!("no population configured for {country}")))
}

/// Write the summary record, chart embeds, and (optionally) the projection JSON.
pub fn write_outputs(
    run: &RunOutput,
    config: &FitConfig,
    theme: &ChartTheme,
    today: NaiveDate,
) -> Result<(), AppError> {
    let out: &Path = &config.out_dir;
    let yaml = out.join("_data").join("data.yaml");
    write_summary_yaml(&yaml, &run.summaries(), &config.summary, today)?;
    info!("Wrote {}", yaml.display());

    let projections = run.projections();
    let embeds = write_chart_embeds(out, &projections, theme, today)?;
    info!("Wrote {} chart embeds under {}", embeds.len(), out.join("_includes").display());

    if let Some(path) = &config.export_projection {
        let file = ProjectionFile {
            tool: env!("CARGO_PKG_NAME").to_string(),
            pipeline: match config.pipeline {
                PipelineKind::Point => "point",
                PipelineKind::Posterior => "posterior",
            }
            .to_string(),
            generated: today,
            projections,
        };
        write_projection_json(path, &file)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use crate::domain::{GrowthParams, PriorConfig, SamplerConfig, SummaryConfig};
    use crate::io::read_case_matrix;

    fn config(pipeline: PipelineKind) -> FitConfig {
        FitConfig {
            data_path: PathBuf::from("unused.csv"),
            out_dir: PathBuf::from("."),
            pipeline,
            countries: Vec::new(),
            populations: BTreeMap::new(),
            initial_guess: GrowthParams::new(2.3, 46.0, 2000.0).unwrap(),
            max_evaluations: 10_000,
            future_days: 20,
            priors: PriorConfig::default(),
            sampler: SamplerConfig::default(),
            summary: SummaryConfig::default(),
            plot: false,
            plot_width: 80,
            plot_height: 20,
            export_projection: None,
        }
    }

    fn csv(columns: &[(&str, fn(f64) -> f64)], days: usize) -> String {
        let mut out = String::from("date");
        for (name, _) in columns {
            out.push(',');
            out.push_str(name);
        }
        out.push('\n');
        let start = NaiveDate::from_ymd_opt(2020, 1, 22).unwrap();
        for d in 0..days {
            out.push_str(&(start + chrono::Duration::days(d as i64)).to_string());
            for (_, f) in columns {
                out.push_str(&format!(",{}", f(d as f64).round()));
            }
            out.push('\n');
        }
        out
    }

    fn logistic(x: f64) -> f64 {
        1e5 / (1.0 + (-(x - 30.0) / 5.0).exp())
    }

    #[test]
    fn missing_population_fails_only_that_country() {
        let text = csv(&[("Italy", logistic as fn(f64) -> f64)], 60);
        let ingest = read_case_matrix(text.as_bytes()).unwrap();
        let series = ingest.select(&[]).unwrap();

        let err = fit_country(&series[0], &config(PipelineKind::Posterior)).unwrap_err();
        assert!(matches!(err, FitError::Config(_)), "{err:?}");
    }

    #[test]
    fn divergent_sampler_drops_the_country() {
        let text = csv(&[("Italy", logistic as fn(f64) -> f64)], 60);
        let ingest = read_case_matrix(text.as_bytes()).unwrap();
        let series = ingest.select(&[]).unwrap();

        let mut cfg = config(PipelineKind::Posterior);
        cfg.populations.insert("Italy".to_string(), 6e7);
        cfg.sampler = SamplerConfig {
            draws: 20,
            tune: 0,
            chains: 2,
            initial_step_size: Some(1e3),
            ..SamplerConfig::default()
        };

        let err = fit_country(&series[0], &cfg).unwrap_err();
        assert!(matches!(err, FitError::SamplerDivergence { .. }), "{err:?}");

        let err = run_fit_with_data(&cfg, ingest).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("Italy: sampler diverged"), "{err}");
    }

    #[test]
    fn population_lookup_accepts_space_free_key() {
        let mut cfg = config(PipelineKind::Posterior);
        cfg.populations.insert("SouthKorea".to_string(), 5e7);
        assert_eq!(population_for(&cfg, "South Korea").unwrap(), 5e7);
        assert!(population_for(&cfg, "Italy").is_err());
    }

    #[test]
    fn all_failures_is_exit_three() {
        let text = csv(&[("Nowhere", (|_| 0.0) as fn(f64) -> f64)], 30);
        let ingest = read_case_matrix(text.as_bytes()).unwrap();
        let err = run_fit_with_data(&config(PipelineKind::Point), ingest).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("Nowhere"));
    }

    #[test]
    fn writes_every_output() {
        let text = csv(&[("South Korea", logistic as fn(f64) -> f64)], 60);
        let ingest = read_case_matrix(text.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(PipelineKind::Point);
        cfg.out_dir = dir.path().to_path_buf();
        cfg.export_projection = Some(dir.path().join("projection.json"));

        let run = run_fit_with_data(&cfg, ingest).unwrap();
        let today = NaiveDate::from_ymd_opt(2020, 3, 22).unwrap();
        write_outputs(&run, &cfg, &ChartTheme::default(), today).unwrap();

        let yaml = std::fs::read_to_string(dir.path().join("_data").join("data.yaml")).unwrap();
        assert!(yaml.starts_with("lastupdate: Mar 22, 2020\n"));
        assert!(yaml.contains("        SouthKorea: 100.00 thousand\n"), "{yaml}");
        assert!(dir.path().join("_includes").join("SouthKorea_infections_embed.html").exists());
        assert!(dir.path().join("_includes").join("infections_embed.html").exists());

        let file = crate::io::read_projection_json(&dir.path().join("projection.json")).unwrap();
        assert_eq!(file.pipeline, "point");
        assert_eq!(file.projections.len(), 1);
        assert_eq!(file.projections[0].days.len(), 80);
    }
}
