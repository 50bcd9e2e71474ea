//! Missing-data imputation on partially observed matrices.
//!
//! Matrices are `ndarray` arrays of `f64` with NaN marking missing
//! entries. Two families of imputers are provided:
//!
//! * [`rpca`]: robust decomposition of the input into a low-rank part and
//!   a sparse anomaly part, either exact (principal component pursuit) or
//!   regularized with optional temporal penalties for periodic signals.
//! * [`em`]: expectation-maximization under a Gaussian model, joint over
//!   the columns or autoregressive over the rows, with deterministic or
//!   sampled draws.
//!
//! [`metrics`] scores an imputation against a reference, and [`prepare`]
//! holds the reshaping and seeding helpers shared by the solvers.

pub mod em;
pub mod error;
pub mod metrics;
pub mod noisy;
mod pcp;
pub mod prepare;
pub mod rpca;
pub mod shrinkage;
pub mod temporal;

use ndarray::{Array2, ArrayView2};

pub use crate::error::{Error, Result};

/// Common surface of the imputers: learn from a matrix, then fill the
/// missing entries of a compatible one.
pub trait Imputer {
    fn fit(&mut self, x: ArrayView2<f64>) -> Result<()>;

    /// Return a copy of `x` with NaN entries filled; observed entries pass
    /// through unchanged.
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    fn fit_transform(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}
