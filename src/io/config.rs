//! TOML run configuration.
//!
//! Every section is optional; missing keys fall back to defaults:
//!
//! ```toml
//! [populations]
//! Italy = 60_360_000
//! "South Korea" = 51_640_000
//!
//! [sampler]
//! draws = 2000
//! seed = 7
//!
//! [priors]
//! likelihood = "normal"
//! growth = "lognormal"
//!
//! [summary]
//! large_number_threshold = 1_000_000
//!
//! [chart]
//! author = "the data desk"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::domain::{PriorConfig, SamplerConfig, SummaryConfig};
use crate::error::AppError;
use crate::plot::ChartTheme;

/// Contents of a config file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Total population per country; the plateau ceiling.
    pub populations: BTreeMap<String, f64>,
    pub sampler: SamplerConfig,
    pub priors: PriorConfig,
    pub summary: SummaryConfig,
    pub chart: ChartTheme,
}

/// Read and parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read config '{}': {e}", path.display())))?;
    parse_config(&text)
        .map_err(|e| AppError::new(2, format!("Invalid config '{}': {e}", path.display())))
}

/// Parse config text and check the population table.
pub fn parse_config(text: &str) -> Result<ConfigFile, AppError> {
    let config: ConfigFile =
        toml::from_str(text).map_err(|e| AppError::new(2, format!("{e}")))?;
    for (country, &population) in &config.populations {
        if !(population.is_finite() && population > 0.0) {
            return Err(AppError::new(
                2,
                format!("Population for `{country}` must be a positive number, got {population}."),
            ));
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GrowthPrior, LikelihoodKind};

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.priors.likelihood, LikelihoodKind::Negbin);
        assert_eq!(config.priors.growth, GrowthPrior::Gamma);
        assert_eq!(config.sampler.chains, 4);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let text = r#"
            [populations]
            Italy = 60360000
            "South Korea" = 51_640_000.0

            [sampler]
            draws = 200
            seed = 9
            initial_step_size = 0.05

            [priors]
            likelihood = "normal"
            growth = "lognormal"
            count_threshold = 100
        "#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.populations["Italy"], 60_360_000.0);
        assert_eq!(config.populations["South Korea"], 51_640_000.0);
        assert_eq!(config.sampler.draws, 200);
        assert_eq!(config.sampler.seed, 9);
        assert_eq!(config.sampler.tune, SamplerConfig::default().tune);
        assert_eq!(config.sampler.initial_step_size, Some(0.05));
        assert_eq!(config.priors.likelihood, LikelihoodKind::Normal);
        assert_eq!(config.priors.growth, GrowthPrior::Lognormal);
        assert_eq!(config.priors.count_threshold, 100.0);
        assert_eq!(config.priors.midpoint_day, PriorConfig::default().midpoint_day);
    }

    #[test]
    fn rejects_unknown_sections_and_bad_populations() {
        assert_eq!(parse_config("[samplr]\ndraws = 1\n").unwrap_err().exit_code(), 2);
        assert_eq!(parse_config("[populations]\nItaly = -5\n").unwrap_err().exit_code(), 2);
        assert_eq!(parse_config("[priors]\nlikelihood = \"poisson\"\n").unwrap_err().exit_code(), 2);
    }
}
