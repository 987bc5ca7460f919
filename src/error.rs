use thiserror::Error;

/// Application-level error: a message plus the process exit code.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Per-country fitting failure.
///
/// Every variant is fatal for the country it was raised for, and only for that
/// country: the batch pipeline records it and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Rejected before any fitting was attempted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Settings that cannot produce a well-defined model (e.g. population
    /// ceiling not above the latest observed count).
    #[error("configuration error: {0}")]
    Config(String),

    /// Least squares ran out of its function-evaluation budget.
    #[error("least squares did not converge after {evaluations} evaluations (cap {max_evaluations})")]
    NonConvergence {
        evaluations: usize,
        max_evaluations: usize,
    },

    /// The MAP search that seeds the sampler failed.
    #[error("MAP optimization failed: {0}")]
    MapFailed(String),

    /// Too many divergent transitions across the chains.
    #[error("sampler diverged: {divergent} of {total} post-tuning transitions divergent")]
    SamplerDivergence { divergent: usize, total: usize },

    /// Non-finite values where the model must be finite.
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl FitError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        FitError::InvalidInput(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        FitError::Config(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        FitError::Numerical(message.into())
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match err {
            FitError::InvalidInput(_) | FitError::Config(_) => 2,
            _ => 4,
        };
        AppError::new(code, err.to_string())
    }
}
