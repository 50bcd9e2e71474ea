//! Banded difference operators encoding periodicity penalties.
//!
//! For a matrix `M` with `n` columns and a periodicity `p`, the operator `H`
//! built here satisfies: column `j` of `M.dot(&H)` is the difference between
//! column `j` of `M` and the column `p` steps later. Penalizing the norm of
//! `M.dot(&H)` therefore penalizes non-periodic variation.

use log::warn;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rpca::TemporalNorm;
use crate::shrinkage::{frobenius_norm, l1_norm};

/// Band shape of the difference operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandModel {
    /// Forward difference at the period offset only.
    Column,
    /// Differences spanning two adjacent offsets (a second difference
    /// across the period).
    ColumnRow,
}

/// Banded Toeplitz difference matrix for one periodicity.
///
/// The result has `dimension` rows; the column count is `dimension - period`
/// for [`BandModel::Column`] and `dimension - period - 1` for
/// [`BandModel::ColumnRow`].
pub fn toeplitz_matrix(period: usize, dimension: usize, model: BandModel) -> Result<Array2<f64>> {
    if period == 0 {
        return Err(Error::InvalidArgument(
            "period must be positive".to_string(),
        ));
    }
    let span = match model {
        BandModel::Column => period,
        BandModel::ColumnRow => period + 1,
    };
    if span >= dimension {
        return Err(Error::InvalidArgument(format!(
            "period {period} does not fit a dimension of {dimension}"
        )));
    }
    let n_lags = dimension - span;
    let mut h = Array2::zeros((dimension, n_lags));
    for j in 0..n_lags {
        h[[j, j]] += 1.0;
        h[[j + period, j]] -= 1.0;
        if model == BandModel::ColumnRow {
            h[[j + 1, j]] -= 1.0;
            h[[j + period + 1, j]] += 1.0;
        }
    }
    Ok(h)
}

/// Weighted set of difference operators, fixed for one decomposition call.
#[derive(Debug, Clone, Default)]
pub struct TemporalOperators {
    operators: Vec<Array2<f64>>,
    weights: Vec<f64>,
}

impl TemporalOperators {
    /// Build one operator per declared period.
    ///
    /// `periods` and `weights` must have matching cardinality. A period too
    /// large for the given column count is skipped with a warning, matching
    /// the tolerant behavior expected when a short signal is folded.
    pub fn build(
        dimension: usize,
        periods: &[usize],
        weights: &[f64],
        model: BandModel,
    ) -> Result<Self> {
        if periods.len() != weights.len() {
            return Err(Error::InvalidArgument(format!(
                "{} periods declared against {} weights",
                periods.len(),
                weights.len()
            )));
        }
        let mut operators = Vec::with_capacity(periods.len());
        let mut kept_weights = Vec::with_capacity(periods.len());
        for (&period, &weight) in periods.iter().zip(weights) {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "period weight must be non-negative, got {weight}"
                )));
            }
            if period == 0 {
                return Err(Error::InvalidArgument(
                    "period must be positive".to_string(),
                ));
            }
            let span = match model {
                BandModel::Column => period,
                BandModel::ColumnRow => period + 1,
            };
            if span >= dimension {
                warn!("period {period} does not fit {dimension} columns, skipping its penalty");
                continue;
            }
            operators.push(toeplitz_matrix(period, dimension, model)?);
            kept_weights.push(weight);
        }
        Ok(Self {
            operators,
            weights: kept_weights,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Iterate over `(H_p, eta_p)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Array2<f64>, f64)> {
        self.operators.iter().zip(self.weights.iter().copied())
    }

    /// Realized penalty `sum_p eta_p * ||M H_p||` under the given norm.
    pub fn penalty(&self, m: ArrayView2<f64>, norm: TemporalNorm) -> f64 {
        self.iter()
            .map(|(h, eta)| {
                let lagged = m.dot(h);
                let value = match norm {
                    TemporalNorm::L1 => l1_norm(lagged.view()),
                    TemporalNorm::L2 => frobenius_norm(lagged.view()),
                };
                eta * value
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_column_model_lagged_differences() {
        let h = toeplitz_matrix(2, 5, BandModel::Column).unwrap();
        assert_eq!(h.dim(), (5, 3));
        let m = arr2(&[[1.0, 2.0, 4.0, 7.0, 11.0]]);
        let diff = m.dot(&h);
        // column j minus column j + 2
        assert_eq!(diff, arr2(&[[-3.0, -5.0, -7.0]]));
    }

    #[test]
    fn test_column_row_model_second_differences() {
        let h = toeplitz_matrix(2, 5, BandModel::ColumnRow).unwrap();
        assert_eq!(h.dim(), (5, 2));
        let m = arr2(&[[1.0, 2.0, 4.0, 7.0, 11.0]]);
        let diff = m.dot(&h);
        // (m_j - m_{j+2}) - (m_{j+1} - m_{j+3})
        assert_eq!(diff, arr2(&[[-1.0, -1.0]]));
    }

    #[test]
    fn test_periodic_signal_has_zero_penalty() {
        let h = toeplitz_matrix(3, 9, BandModel::Column).unwrap();
        let m = arr2(&[[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]]);
        let diff = m.dot(&h);
        assert!(diff.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_mismatched_cardinality_rejected() {
        let result = TemporalOperators::build(10, &[2, 3], &[0.5], BandModel::Column);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_period_skipped() {
        let ops = TemporalOperators::build(5, &[2, 12], &[0.5, 0.5], BandModel::Column).unwrap();
        assert_eq!(ops.iter().count(), 1);
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(matches!(
            toeplitz_matrix(0, 5, BandModel::Column),
            Err(Error::InvalidArgument(_))
        ));
    }
}
