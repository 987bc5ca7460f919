//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - merges the TOML config file with CLI overrides
//! - runs the per-country fit pipeline
//! - prints reports/plots
//! - writes the summary record, chart embeds, and optional exports

use clap::Parser;
use log::info;

use crate::cli::{Cli, Command, FitArgs, PlotArgs, PosteriorArgs};
use crate::domain::{FitConfig, GrowthParams, PipelineKind};
use crate::error::AppError;
use crate::fit::DEFAULT_INITIAL_GUESS;
use crate::io::{ConfigFile, load_config, read_projection_json};
use crate::plot::{ChartTheme, render_projection_ascii};

pub mod pipeline;

/// Entry point for the `epi` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(&args, None),
        Command::Posterior(args) => handle_fit(&args.fit, Some(&args)),
        Command::Plot(args) => handle_plot(args),
    }
}

fn handle_fit(args: &FitArgs, posterior: Option<&PosteriorArgs>) -> Result<(), AppError> {
    let file = match &args.config {
        Some(path) => load_config(path)?,
        None => ConfigFile::default(),
    };
    let (config, theme) = fit_config_from_args(args, posterior, file)?;
    info!(
        "Fitting {} from {}",
        if config.countries.is_empty() {
            "all countries".to_string()
        } else {
            config.countries.join(", ")
        },
        config.data_path.display()
    );

    let run = pipeline::run_fit(&config)?;

    // Print terminal output.
    println!("{}", crate::report::format_run_summary(&run, &config));
    if config.plot {
        for country in &run.countries {
            println!(
                "{}",
                render_projection_ascii(&country.projection, config.plot_width, config.plot_height)
            );
        }
    }

    let today = chrono::Local::now().date_naive();
    pipeline::write_outputs(&run, &config, &theme, today)
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let file = read_projection_json(&args.projection)?;

    let selected: Vec<_> = file
        .projections
        .iter()
        .filter(|p| args.countries.is_empty() || args.countries.contains(&p.country))
        .collect();
    if selected.is_empty() {
        return Err(AppError::new(
            2,
            format!("No matching country in '{}'.", args.projection.display()),
        ));
    }

    for p in selected {
        println!("{}", render_projection_ascii(p, args.width, args.height));
    }
    Ok(())
}

/// Build the run configuration: config file values first, CLI flags on top.
pub fn fit_config_from_args(
    args: &FitArgs,
    posterior: Option<&PosteriorArgs>,
    file: ConfigFile,
) -> Result<(FitConfig, ChartTheme), AppError> {
    let ConfigFile {
        mut populations,
        mut sampler,
        mut priors,
        summary,
        chart,
    } = file;

    let initial_guess = match args.initial_guess.as_slice() {
        [] => {
            let (a, b, c) = DEFAULT_INITIAL_GUESS;
            GrowthParams::new(a, b, c)
        }
        [a, b, c] => GrowthParams::new(*a, *b, *c),
        other => {
            return Err(AppError::new(
                2,
                format!("--initial-guess takes exactly three values, got {}", other.len()),
            ));
        }
    }
    .map_err(|e| AppError::new(2, format!("Invalid --initial-guess: {e}")))?;

    if args.max_evaluations == 0 {
        return Err(AppError::new(2, "--max-evaluations must be positive."));
    }

    let pipeline = match posterior {
        None => PipelineKind::Point,
        Some(p) => {
            populations.extend(p.populations.iter().cloned());
            if let Some(v) = p.draws {
                sampler.draws = v;
            }
            if let Some(v) = p.tune {
                sampler.tune = v;
            }
            if let Some(v) = p.chains {
                sampler.chains = v;
            }
            if let Some(v) = p.target_accept {
                sampler.target_accept = v;
            }
            if let Some(v) = p.seed {
                sampler.seed = v;
            }
            if let Some(v) = p.likelihood {
                priors.likelihood = v;
            }
            if let Some(v) = p.growth_prior {
                priors.growth = v;
            }
            PipelineKind::Posterior
        }
    };

    let config = FitConfig {
        data_path: args.data.clone(),
        out_dir: args.out_dir.clone(),
        pipeline,
        countries: args.countries.clone(),
        populations,
        initial_guess,
        max_evaluations: args.max_evaluations,
        future_days: args.future_days,
        priors,
        sampler,
        summary,
        plot: args.plot && !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_projection: args.export_projection.clone(),
    };
    Ok((config, chart))
}
