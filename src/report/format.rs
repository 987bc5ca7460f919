//! Formatted terminal output for a run.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized (important for snapshot tests)

use crate::app::pipeline::{CountryRun, RunOutput};
use crate::domain::{CountryFailure, FitConfig, PipelineKind};
use crate::io::RowError;
use crate::report::format_plateau;

/// Row errors listed before the remainder is summarized as a count.
const MAX_ROW_ERRORS: usize = 10;

/// Format the full run summary (dataset stats + per-country results + failures).
pub fn format_run_summary(run: &RunOutput, config: &FitConfig) -> String {
    let mut out = String::new();

    let pipeline = match config.pipeline {
        PipelineKind::Point => "least squares",
        PipelineKind::Posterior => "least squares + posterior",
    };
    out.push_str(&format!("=== epi - logistic growth fit ({pipeline}) ===\n"));
    out.push_str(&format!("Data: {}\n", config.data_path.display()));
    out.push_str(&format!(
        "Rows: read={} used={} | countries fitted={} failed={}\n",
        run.ingest.rows_read,
        run.ingest.rows_used,
        run.countries.len(),
        run.failures.len()
    ));
    if !run.ingest.row_errors.is_empty() {
        out.push('\n');
        out.push_str(&format_row_errors(&run.ingest.row_errors, MAX_ROW_ERRORS));
    }

    out.push_str("\nFits:\n");
    out.push_str(&format_fit_table(&run.countries, config.summary.large_number_threshold));

    if config.pipeline == PipelineKind::Posterior {
        out.push_str("\nPosterior diagnostics:\n");
        out.push_str(&format_diagnostics_table(&run.countries));
    }

    if !run.failures.is_empty() {
        out.push_str("\nFailures:\n");
        out.push_str(&format_failures(&run.failures));
    }

    out
}

/// List skipped rows/cells, at most `limit` of them.
pub fn format_row_errors(errors: &[RowError], limit: usize) -> String {
    let mut out = format!("Skipped rows/cells ({}):\n", errors.len());
    for e in errors.iter().take(limit) {
        match &e.country {
            Some(country) => out.push_str(&format!("- line {} [{country}]: {}\n", e.line, e.message)),
            None => out.push_str(&format!("- line {}: {}\n", e.line, e.message)),
        }
    }
    if errors.len() > limit {
        out.push_str(&format!("  ... and {} more\n", errors.len() - limit));
    }
    out
}

pub fn format_failures(failures: &[CountryFailure]) -> String {
    let mut out = String::new();
    for f in failures {
        out.push_str(&format!("- {}: {}\n", f.country, f.error));
    }
    out
}

fn format_fit_table(rows: &[CountryRun], threshold: f64) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:<18} {:>4} {:>12} {:>12} {:>10} {:<28} {:<14}",
            "country", "n", "a (days)", "b (day)", "rmse", "plateau", "peak"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<18} {:-<4} {:-<12} {:-<12} {:-<10} {:-<28} {:-<14}", "", "", "", "", "", "", ""),
    );

    for r in rows {
        let params = r.point.params.decode();
        let [se_a, se_b, _] = r.point.std_errors();
        push_row(
            &mut out,
            format!(
                "{:<18} {:>4} {:>12} {:>12} {:>10.1} {:<28} {:<14}",
                truncate(&r.summary.country, 18),
                r.point.n,
                // One-sigma errors are in log space; scale to natural units.
                format!("{:.2}±{:.2}", params.growth_rate, params.growth_rate * se_a),
                format!("{:.1}±{:.1}", params.midpoint, params.midpoint * se_b),
                r.point.rmse,
                format_plateau(&r.summary.plateau, threshold),
                r.summary.peak_label,
            ),
        );
    }
    out
}

fn format_diagnostics_table(rows: &[CountryRun]) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:<18} {:>6} {:>8} {:>10} {:>9} {:<10}",
            "country", "rows", "accept", "divergent", "R-hat", "mixing"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<18} {:-<6} {:-<8} {:-<10} {:-<9} {:-<10}", "", "", "", "", "", ""),
    );

    for r in rows {
        let Some(d) = &r.diagnostics else {
            continue;
        };
        let accept = if d.chains.is_empty() {
            f64::NAN
        } else {
            d.chains.iter().map(|c| c.acceptance_rate).sum::<f64>() / d.chains.len() as f64
        };
        push_row(
            &mut out,
            format!(
                "{:<18} {:>6} {:>8.3} {:>10} {:>9.3} {:<10}",
                truncate(&r.summary.country, 18),
                d.fit_rows,
                accept,
                d.divergent(),
                d.max_r_hat(),
                if d.reliable { "ok" } else { "UNRELIABLE" },
            ),
        );
    }
    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FitError;

    #[test]
    fn row_errors_are_capped() {
        let errors: Vec<RowError> = (0..4)
            .map(|i| RowError {
                line: i + 2,
                country: (i % 2 == 0).then(|| "Italy".to_string()),
                message: "not a number".to_string(),
            })
            .collect();
        let text = format_row_errors(&errors, 2);
        assert_eq!(
            text,
            "Skipped rows/cells (4):\n\
             - line 2 [Italy]: not a number\n\
             - line 3: not a number\n\
             \x20 ... and 2 more\n"
        );
    }

    #[test]
    fn failures_name_country_and_reason() {
        let text = format_failures(&[CountryFailure {
            country: "Narnia".to_string(),
            error: FitError::invalid_input("series is all zero"),
        }]);
        assert_eq!(text, "- Narnia: invalid input: series is all zero\n");
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("Italy", 18), "Italy");
        assert_eq!(truncate("Democratic Republic of the Congo", 10), "Democrati.");
    }
}
