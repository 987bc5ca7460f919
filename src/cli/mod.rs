//! Command-line parsing for the growth-curve fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.
//!
//! Estimator settings are optional here: when a flag is absent the value from
//! the `--config` file (or its default) is used.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{GrowthPrior, LikelihoodKind};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "epi", version, about = "Logistic growth-curve fits for cumulative case counts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Least-squares fit per country; write the summary record and chart embeds.
    Fit(FitArgs),
    /// Least squares, then MAP + MCMC per country; summaries carry a 90/10 band.
    Posterior(PosteriorArgs),
    /// Plot a previously exported projection JSON in the terminal.
    Plot(PlotArgs),
}

/// Options shared by both fitting pipelines.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Case matrix CSV (`date` column, then one column per country).
    #[arg(short = 'd', long, value_name = "CSV")]
    pub data: PathBuf,

    /// TOML file with populations and estimator settings.
    #[arg(long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Country to fit (repeatable). Defaults to every column of the CSV.
    #[arg(short = 'c', long = "country", value_name = "NAME")]
    pub countries: Vec<String>,

    /// Site root; `_data/` and `_includes/` are written below it.
    #[arg(short = 'o', long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Days projected past the last observation.
    #[arg(long, default_value_t = 100)]
    pub future_days: usize,

    /// Least-squares starting point `a,b,c` (growth days, midpoint day, plateau).
    #[arg(long, value_delimiter = ',', value_name = "A,B,C")]
    pub initial_guess: Vec<f64>,

    /// Least-squares function-evaluation budget.
    #[arg(long, default_value_t = 10_000)]
    pub max_evaluations: usize,

    /// Render an ASCII plot per country in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export the projection series to JSON (readable by `epi plot`).
    #[arg(long = "export-projection", value_name = "JSON")]
    pub export_projection: Option<PathBuf>,
}

/// Posterior pipeline options.
#[derive(Debug, Args, Clone)]
pub struct PosteriorArgs {
    #[command(flatten)]
    pub fit: FitArgs,

    /// Population ceiling `COUNTRY=N` (repeatable; overrides the config file).
    #[arg(long = "population", value_name = "COUNTRY=N", value_parser = parse_population)]
    pub populations: Vec<(String, f64)>,

    /// Post-tuning draws per chain.
    #[arg(long)]
    pub draws: Option<usize>,

    /// Tuning iterations per chain.
    #[arg(long)]
    pub tune: Option<usize>,

    /// Number of chains (at least 2).
    #[arg(long)]
    pub chains: Option<usize>,

    /// Target acceptance for step-size adaptation.
    #[arg(long)]
    pub target_accept: Option<f64>,

    /// Base seed; chain `k` derives its own stream from it.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Observation model.
    #[arg(long, value_enum)]
    pub likelihood: Option<LikelihoodKind>,

    /// Prior on the growth rate.
    #[arg(long, value_enum)]
    pub growth_prior: Option<GrowthPrior>,
}

/// Options for plotting a saved projection.
#[derive(Debug, Args)]
pub struct PlotArgs {
    /// Projection JSON produced by `--export-projection`.
    #[arg(long, value_name = "JSON")]
    pub projection: PathBuf,

    /// Only plot these countries (repeatable).
    #[arg(short = 'c', long = "country", value_name = "NAME")]
    pub countries: Vec<String>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

fn parse_population(s: &str) -> Result<(String, f64), String> {
    let (country, value) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected COUNTRY=N, got `{s}`"))?;
    let country = country.trim();
    if country.is_empty() {
        return Err(format!("missing country in `{s}`"));
    }
    let value: f64 = value
        .trim()
        .replace('_', "")
        .parse()
        .map_err(|e| format!("invalid population in `{s}`: {e}"))?;
    if !(value.is_finite() && value > 0.0) {
        return Err(format!("population must be positive, got {value}"));
    }
    Ok((country.to_string(), value))
}
