//! Error types shared by every module of the crate.

use thiserror::Error;

/// Errors raised by decomposition, imputation and metric routines.
///
/// Non-convergence of an iterative solver is deliberately *not* represented
/// here: hitting the iteration cap is a normal terminal state reported
/// through a diagnostic flag on the result.
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter is outside its valid domain (negative shrinkage
    /// threshold, mismatched period/weight lists, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Two matrices that must agree in shape do not, or a 1-D signal was
    /// routed through a 2-D-only path.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Not enough observed entries to estimate the requested quantity.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A required configuration value was not provided.
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    /// A dense linear-algebra routine failed in the backend.
    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

pub type Result<T> = std::result::Result<T, Error>;
