//! Reshaping and seeding of partially observed data ahead of decomposition.

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fallback fill strategy for entries still missing after interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImputeMethod {
    /// Columnwise mean of the observed entries.
    Mean,
    /// Columnwise median of the observed entries.
    Median,
    /// Constant zero.
    Zeros,
}

/// Linear interpolation across missing entries, series by series.
///
/// Each row is treated as one series along its time axis: interior gaps are
/// filled linearly between the surrounding observations, boundary gaps take
/// the nearest observed value. A row with no observed entry is left as-is.
/// Only used to seed iterative solvers, never as a final answer.
pub fn linear_interpolation(x: ArrayView2<f64>) -> Array2<f64> {
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        let observed: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .map(|(i, _)| i)
            .collect();
        if observed.is_empty() {
            continue;
        }
        let mut next_obs = 0;
        for i in 0..row.len() {
            if !row[i].is_nan() {
                continue;
            }
            while next_obs < observed.len() && observed[next_obs] < i {
                next_obs += 1;
            }
            row[i] = if next_obs == 0 {
                row[observed[0]]
            } else if next_obs == observed.len() {
                row[observed[observed.len() - 1]]
            } else {
                let left = observed[next_obs - 1];
                let right = observed[next_obs];
                let t = (i - left) as f64 / (right - left) as f64;
                row[left] + t * (row[right] - row[left])
            };
        }
    }
    out
}

/// Fold a 1-D signal into a matrix with `period` rows.
///
/// The signal is laid out in row-major chunks of `ceil(n / period)` values;
/// the tail of the last row is padded with NaN so the padding is treated as
/// missing downstream.
pub fn fold_signal(x: ArrayView1<f64>, period: usize) -> Result<Array2<f64>> {
    if period == 0 {
        return Err(Error::InvalidArgument(
            "period must be positive".to_string(),
        ));
    }
    let n = x.len();
    if n == 0 {
        return Err(Error::InsufficientData("empty signal".to_string()));
    }
    let n_cols = (n + period - 1) / period;
    let mut out = Array2::from_elem((period, n_cols), f64::NAN);
    for (i, &value) in x.iter().enumerate() {
        out[[i / n_cols, i % n_cols]] = value;
    }
    Ok(out)
}

/// Inverse of [`fold_signal`]: read back the first `n` values in row-major
/// order, dropping the padding.
pub fn unfold_signal(m: ArrayView2<f64>, n: usize) -> Array1<f64> {
    m.iter().copied().take(n).collect()
}

/// Fold a 1-D signal for decomposition; the period is mandatory here.
pub fn prepare_signal(x: ArrayView1<f64>, period: Option<usize>) -> Result<Array2<f64>> {
    match period {
        Some(p) => fold_signal(x, p),
        None => Err(Error::MissingConfiguration(
            "a period is required to fold a 1-D signal".to_string(),
        )),
    }
}

/// Pass a 2-D matrix through unchanged; any declared period is ignored.
///
/// A single-row matrix is a 1-D signal routed through the wrong path and is
/// rejected: it must go through [`prepare_signal`] with an explicit period.
pub fn prepare_data(x: ArrayView2<f64>, _period: Option<usize>) -> Result<Array2<f64>> {
    if x.nrows() == 1 {
        return Err(Error::ShapeMismatch(
            "got a single-row matrix; fold the 1-D signal with an explicit period instead"
                .to_string(),
        ));
    }
    Ok(x.to_owned())
}

/// Replace remaining NaN entries using columnwise statistics (or zero).
///
/// An all-missing column falls back to zero.
pub fn impute_nans(x: ArrayView2<f64>, method: ImputeMethod) -> Array2<f64> {
    let mut out = x.to_owned();
    for j in 0..x.ncols() {
        let observed: Vec<f64> = x
            .column(j)
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        let fill = match method {
            ImputeMethod::Zeros => 0.0,
            ImputeMethod::Mean => {
                if observed.is_empty() {
                    0.0
                } else {
                    observed.iter().sum::<f64>() / observed.len() as f64
                }
            }
            ImputeMethod::Median => {
                if observed.is_empty() {
                    0.0
                } else {
                    let sorted: Vec<f64> =
                        observed.iter().copied().sorted_by(|a, b| a.total_cmp(b)).collect();
                    let mid = sorted.len() / 2;
                    if sorted.len() % 2 == 1 {
                        sorted[mid]
                    } else {
                        (sorted[mid - 1] + sorted[mid]) / 2.0
                    }
                }
            }
        };
        for i in 0..x.nrows() {
            if out[[i, j]].is_nan() {
                out[[i, j]] = fill;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn incomplete_fixture() -> Array2<f64> {
        arr2(&[
            [1.0, f64::NAN, 3.0, 2.0, f64::NAN],
            [7.0, 2.0, f64::NAN, 1.0, 1.0],
            [f64::NAN, 4.0, 3.0, f64::NAN, 5.0],
            [f64::NAN, 4.0, 3.0, 5.0, 5.0],
            [4.0, 4.0, 3.0, f64::NAN, 5.0],
        ])
    }

    fn assert_matrices_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{x} != {y}");
        }
    }

    #[test]
    fn test_linear_interpolation_fixture() {
        let expected = arr2(&[
            [1.0, 2.0, 3.0, 2.0, 2.0],
            [7.0, 2.0, 1.5, 1.0, 1.0],
            [4.0, 4.0, 3.0, 4.0, 5.0],
            [4.0, 4.0, 3.0, 5.0, 5.0],
            [4.0, 4.0, 3.0, 4.0, 5.0],
        ]);
        let result = linear_interpolation(incomplete_fixture().view());
        assert_matrices_close(&result, &expected, 1e-12);
    }

    #[test]
    fn test_impute_nans_mean() {
        let expected = arr2(&[
            [1.0, 3.5, 3.0, 2.0, 4.0],
            [7.0, 2.0, 3.0, 1.0, 1.0],
            [4.0, 4.0, 3.0, 8.0 / 3.0, 5.0],
            [4.0, 4.0, 3.0, 5.0, 5.0],
            [4.0, 4.0, 3.0, 8.0 / 3.0, 5.0],
        ]);
        let result = impute_nans(incomplete_fixture().view(), ImputeMethod::Mean);
        assert_matrices_close(&result, &expected, 1e-10);
    }

    #[test]
    fn test_impute_nans_median() {
        let expected = arr2(&[
            [1.0, 4.0, 3.0, 2.0, 5.0],
            [7.0, 2.0, 3.0, 1.0, 1.0],
            [4.0, 4.0, 3.0, 2.0, 5.0],
            [4.0, 4.0, 3.0, 5.0, 5.0],
            [4.0, 4.0, 3.0, 2.0, 5.0],
        ]);
        let result = impute_nans(incomplete_fixture().view(), ImputeMethod::Median);
        assert_matrices_close(&result, &expected, 1e-12);
    }

    #[test]
    fn test_impute_nans_zeros() {
        let result = impute_nans(incomplete_fixture().view(), ImputeMethod::Zeros);
        assert!(result.iter().all(|v| !v.is_nan()));
        assert_eq!(result[[0, 1]], 0.0);
        assert_eq!(result[[2, 0]], 0.0);
        assert_eq!(result[[1, 1]], 2.0);
    }

    #[test]
    fn test_fold_signal_pads_with_nan() {
        let signal = arr1(&[1.0, 4.0, f64::NAN, 3.0, 2.0]);
        let folded = fold_signal(signal.view(), 2).unwrap();
        assert_eq!(folded.dim(), (2, 3));
        assert_eq!(folded[[0, 0]], 1.0);
        assert_eq!(folded[[0, 1]], 4.0);
        assert!(folded[[0, 2]].is_nan());
        assert_eq!(folded[[1, 0]], 3.0);
        assert_eq!(folded[[1, 1]], 2.0);
        assert!(folded[[1, 2]].is_nan());
    }

    #[test]
    fn test_fold_unfold_round_trip() {
        let signal: Array1<f64> = (0..23).map(|i| i as f64 * 0.7).collect();
        for period in [1, 2, 5, 7, 23] {
            let folded = fold_signal(signal.view(), period).unwrap();
            let unfolded = unfold_signal(folded.view(), signal.len());
            assert_eq!(unfolded, signal);
        }
    }

    #[test]
    fn test_prepare_signal_requires_period() {
        let signal = arr1(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            prepare_signal(signal.view(), None),
            Err(Error::MissingConfiguration(_))
        ));
        assert!(prepare_signal(signal.view(), Some(2)).is_ok());
    }

    #[test]
    fn test_prepare_data_passes_matrix_through() {
        let x = incomplete_fixture();
        let result = prepare_data(x.view(), Some(3)).unwrap();
        assert_eq!(result.dim(), x.dim());
    }

    #[test]
    fn test_prepare_data_rejects_single_row() {
        let x = arr2(&[[1.0, 2.0, 3.0, 4.0]]);
        assert!(matches!(
            prepare_data(x.view(), None),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
