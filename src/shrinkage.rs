//! Shrinkage operators and matrix norms used by the decomposition solvers.

use ndarray::{s, Array2, ArrayView2};
use ndarray_linalg::{Norm, SVD};

use crate::error::{Error, Result};

/// Elementwise soft-thresholding: `sign(x) * max(|x| - threshold, 0)`.
pub fn soft_thresholding(m: ArrayView2<f64>, threshold: f64) -> Result<Array2<f64>> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "soft-thresholding requires a non-negative threshold, got {threshold}"
        )));
    }
    Ok(m.mapv(|x| x.signum() * (x.abs() - threshold).max(0.0)))
}

/// Singular-value thresholding: SVD, shrink the singular values by
/// `threshold`, reconstruct from the surviving components.
///
/// Returns the thresholded matrix and the retained rank. When every
/// singular value falls below the threshold the result is the zero matrix,
/// which is a valid outcome and not an error.
pub fn svd_thresholding(m: ArrayView2<f64>, threshold: f64) -> Result<(Array2<f64>, usize)> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "singular-value thresholding requires a non-negative threshold, got {threshold}"
        )));
    }
    let (u, sigma, vt) = m.svd(true, true)?;
    let u = u.expect("SVD with requested U");
    let vt = vt.expect("SVD with requested Vt");

    let rank = sigma.iter().filter(|&&v| v > threshold).count();
    let shrunk = sigma.slice(s![..rank]).mapv(|v| v - threshold);
    let reconstructed = u
        .slice(s![.., ..rank])
        .dot(&Array2::from_diag(&shrunk))
        .dot(&vt.slice(s![..rank, ..]));
    Ok((reconstructed, rank))
}

/// Sum of absolute values of all entries.
pub fn l1_norm(m: ArrayView2<f64>) -> f64 {
    m.norm_l1()
}

/// Frobenius norm: root of the sum of squared entries.
pub fn frobenius_norm(m: ArrayView2<f64>) -> f64 {
    m.norm_l2()
}

/// Nuclear norm: sum of singular values.
pub fn nuclear_norm(m: ArrayView2<f64>) -> Result<f64> {
    let (_, sigma, _) = m.svd(false, false)?;
    Ok(sigma.sum())
}

/// Rank at which the cumulative singular-value mass exceeds `threshold`.
///
/// A threshold of 1 or more short-circuits to `min(rows, cols)`.
pub fn approx_rank(m: ArrayView2<f64>, threshold: f64) -> Result<usize> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "rank threshold must be positive, got {threshold}"
        )));
    }
    if threshold >= 1.0 {
        return Ok(m.nrows().min(m.ncols()));
    }
    let (_, sigma, _) = m.svd(false, false)?;
    let total = sigma.sum();
    if total == 0.0 {
        return Ok(0);
    }
    let mut cumulative = 0.0;
    for (i, &value) in sigma.iter().enumerate() {
        cumulative += value;
        if cumulative / total > threshold {
            return Ok(i + 1);
        }
    }
    Ok(sigma.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_soft_thresholding_zero_is_identity() {
        let m = arr2(&[[1.0, -2.0], [0.5, 3.0]]);
        let result = soft_thresholding(m.view(), 0.0).unwrap();
        assert_eq!(result, m);
    }

    #[test]
    fn test_soft_thresholding_shrinks_l1_norm() {
        let m = arr2(&[[1.0, -2.0], [0.5, 3.0]]);
        for lam in [0.1, 0.5, 1.0, 10.0] {
            let result = soft_thresholding(m.view(), lam).unwrap();
            assert!(l1_norm(result.view()) <= l1_norm(m.view()));
        }
    }

    #[test]
    fn test_soft_thresholding_values() {
        let m = arr2(&[[1.0, -2.0], [0.5, 3.0]]);
        let result = soft_thresholding(m.view(), 1.0).unwrap();
        let expected = arr2(&[[0.0, -1.0], [0.0, 2.0]]);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_soft_thresholding_negative_threshold() {
        let m = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        assert!(matches!(
            soft_thresholding(m.view(), -0.1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_svd_thresholding_collapses_to_zero() {
        let m = arr2(&[[1.0, 2.0], [3.0, 1.0]]);
        let (result, rank) = svd_thresholding(m.view(), 1e6).unwrap();
        assert_eq!(rank, 0);
        assert!(result.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_svd_thresholding_zero_reconstructs() {
        let m = arr2(&[[1.0, 2.0], [3.0, 1.0]]);
        let (result, rank) = svd_thresholding(m.view(), 0.0).unwrap();
        assert_eq!(rank, 2);
        for (a, b) in result.iter().zip(m.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_nuclear_norm_rank_one() {
        // outer product of [1,2] and [3,4]: single singular value = |u||v|
        let m = arr2(&[[3.0, 4.0], [6.0, 8.0]]);
        let expected = (5.0f64).sqrt() * 5.0; // ||[1,2]|| * ||[3,4]||
        let result = nuclear_norm(m.view()).unwrap();
        assert_abs_diff_eq!(result, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_approx_rank_full() {
        let m = arr2(&[[1.0, 2.0], [3.0, 1.0]]);
        assert_eq!(approx_rank(m.view(), 0.95).unwrap(), 2);
        assert_eq!(approx_rank(m.view(), 1.0).unwrap(), 2);
    }

    #[test]
    fn test_approx_rank_low_rank() {
        let m = arr2(&[[3.0, 4.0], [6.0, 8.0]]);
        assert_eq!(approx_rank(m.view(), 0.95).unwrap(), 1);
    }
}
