//! Benchmark metrics comparing an imputed matrix against a reference.
//!
//! Pointwise error metrics are columnwise and skip pairs where either side
//! is missing; an optional mask restricts them further, typically to the
//! entries that were hidden before imputation. Distributional metrics
//! compare empirical laws column by column or jointly under a Gaussian
//! approximation.

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Determinant, Eigh, Inverse, UPLO};

use crate::error::{Error, Result};

const EPS: f64 = f64::EPSILON;

fn check_shapes(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(Error::ShapeMismatch(format!(
            "{:?} against {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(())
}

fn check_mask(a: ArrayView2<f64>, mask: Option<&Array2<bool>>) -> Result<()> {
    if let Some(mask) = mask {
        if mask.dim() != a.dim() {
            return Err(Error::ShapeMismatch(format!(
                "mask {:?} against data {:?}",
                mask.dim(),
                a.dim()
            )));
        }
    }
    Ok(())
}

/// Columnwise aggregation over the pairs where both entries are present
/// and, when a mask is given, selected.
fn columnwise<F>(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    mask: Option<&Array2<bool>>,
    aggregate: F,
) -> Result<Array1<f64>>
where
    F: Fn(&[f64], &[f64]) -> f64,
{
    check_shapes(a, b)?;
    check_mask(a, mask)?;
    let mut out = Array1::zeros(a.ncols());
    for j in 0..a.ncols() {
        let mut lhs = Vec::new();
        let mut rhs = Vec::new();
        for i in 0..a.nrows() {
            let (x, y) = (a[[i, j]], b[[i, j]]);
            let selected = mask.map_or(true, |m| m[[i, j]]);
            if selected && !x.is_nan() && !y.is_nan() {
                lhs.push(x);
                rhs.push(y);
            }
        }
        out[j] = if lhs.is_empty() {
            f64::NAN
        } else {
            aggregate(&lhs, &rhs)
        };
    }
    Ok(out)
}

pub fn mean_squared_error(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    mask: Option<&Array2<bool>>,
) -> Result<Array1<f64>> {
    columnwise(a, b, mask, |lhs, rhs| {
        lhs.iter()
            .zip(rhs)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            / lhs.len() as f64
    })
}

pub fn root_mean_squared_error(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    mask: Option<&Array2<bool>>,
) -> Result<Array1<f64>> {
    Ok(mean_squared_error(a, b, mask)?.mapv(f64::sqrt))
}

pub fn mean_absolute_error(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    mask: Option<&Array2<bool>>,
) -> Result<Array1<f64>> {
    columnwise(a, b, mask, |lhs, rhs| {
        lhs.iter().zip(rhs).map(|(x, y)| (x - y).abs()).sum::<f64>() / lhs.len() as f64
    })
}

/// Mean absolute error relative to the mean magnitude of the reference.
pub fn weighted_mean_absolute_percentage_error(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    mask: Option<&Array2<bool>>,
) -> Result<Array1<f64>> {
    columnwise(a, b, mask, |lhs, rhs| {
        let absolute: f64 = lhs.iter().zip(rhs).map(|(x, y)| (x - y).abs()).sum();
        let reference: f64 = lhs.iter().map(|x| x.abs()).sum();
        absolute / reference
    })
}

fn sorted_column(column: ArrayView1<f64>) -> Vec<f64> {
    column
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .sorted_by(f64::total_cmp)
        .collect()
}

/// Two-sample Kolmogorov-Smirnov statistic per column: the supremum gap
/// between the two empirical distribution functions.
pub fn kolmogorov_smirnov_test(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
) -> Result<Array1<f64>> {
    check_shapes(a, b)?;
    let mut out = Array1::zeros(a.ncols());
    for j in 0..a.ncols() {
        let lhs = sorted_column(a.column(j));
        let rhs = sorted_column(b.column(j));
        if lhs.is_empty() || rhs.is_empty() {
            return Err(Error::InsufficientData(format!(
                "column {j} has no observed entry"
            )));
        }
        let (n, m) = (lhs.len() as f64, rhs.len() as f64);
        let mut statistic: f64 = 0.0;
        let (mut i, mut k) = (0usize, 0usize);
        while i < lhs.len() && k < rhs.len() {
            let value = lhs[i].min(rhs[k]);
            while i < lhs.len() && lhs[i] <= value {
                i += 1;
            }
            while k < rhs.len() && rhs[k] <= value {
                k += 1;
            }
            statistic = statistic.max((i as f64 / n - k as f64 / m).abs());
        }
        out[j] = statistic;
    }
    Ok(out)
}

/// Kullback-Leibler divergence per column over a 20-point shared binning.
///
/// The binning spans from the smaller of the two minima to the smaller of
/// the two maxima; a degenerate span yields zero.
pub fn kl_divergence_columnwise(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
) -> Result<Array1<f64>> {
    check_shapes(a, b)?;
    let mut out = Array1::zeros(a.ncols());
    for j in 0..a.ncols() {
        let lhs = sorted_column(a.column(j));
        let rhs = sorted_column(b.column(j));
        if lhs.is_empty() || rhs.is_empty() {
            return Err(Error::InsufficientData(format!(
                "column {j} has no observed entry"
            )));
        }
        let min_val = lhs[0].min(rhs[0]);
        let max_val = lhs[lhs.len() - 1].min(rhs[rhs.len() - 1]);
        if max_val <= min_val {
            out[j] = 0.0;
            continue;
        }
        let p = histogram_density(&lhs, min_val, max_val);
        let q = histogram_density(&rhs, min_val, max_val);
        out[j] = relative_entropy(&p, &q);
    }
    Ok(out)
}

const N_BIN_EDGES: usize = 20;

fn histogram_density(sorted: &[f64], min_val: f64, max_val: f64) -> Vec<f64> {
    let n_bins = N_BIN_EDGES - 1;
    let width = (max_val - min_val) / n_bins as f64;
    let mut counts = vec![0usize; n_bins];
    let mut total = 0usize;
    for &v in sorted {
        if v < min_val || v > max_val {
            continue;
        }
        let bin = (((v - min_val) / width) as usize).min(n_bins - 1);
        counts[bin] += 1;
        total += 1;
    }
    if total == 0 {
        return vec![0.0; n_bins];
    }
    counts
        .into_iter()
        .map(|c| c as f64 / (total as f64 * width))
        .collect()
}

fn relative_entropy(p: &[f64], q: &[f64]) -> f64 {
    let p: Vec<f64> = p.iter().map(|v| v + EPS).collect();
    let q: Vec<f64> = q.iter().map(|v| v + EPS).collect();
    let p_total: f64 = p.iter().sum();
    let q_total: f64 = q.iter().sum();
    p.iter()
        .zip(&q)
        .map(|(&pi, &qi)| {
            let pi = pi / p_total;
            let qi = qi / q_total;
            pi * (pi / qi).ln()
        })
        .sum()
}

fn nan_mean(column: ArrayView1<f64>) -> f64 {
    let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
    if observed.is_empty() {
        f64::NAN
    } else {
        observed.iter().sum::<f64>() / observed.len() as f64
    }
}

fn nan_std(column: ArrayView1<f64>) -> f64 {
    let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
    if observed.is_empty() {
        return f64::NAN;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let variance =
        observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / observed.len() as f64;
    variance.sqrt()
}

fn column_nan_means(x: ArrayView2<f64>) -> Array1<f64> {
    (0..x.ncols()).map(|j| nan_mean(x.column(j))).collect()
}

/// Pairwise-complete covariance: entry `(i, j)` uses the rows where both
/// columns are observed, normalized by the pair count minus one.
fn pairwise_covariance(x: ArrayView2<f64>) -> Array2<f64> {
    let d = x.ncols();
    let means = column_nan_means(x);
    let mut cov = Array2::zeros((d, d));
    for i in 0..d {
        for j in i..d {
            let mut sum = 0.0;
            let mut count = 0usize;
            for r in 0..x.nrows() {
                let (u, v) = (x[[r, i]], x[[r, j]]);
                if !u.is_nan() && !v.is_nan() {
                    sum += (u - means[i]) * (v - means[j]);
                    count += 1;
                }
            }
            let value = if count > 1 {
                sum / (count - 1) as f64
            } else {
                0.0
            };
            cov[[i, j]] = value;
            cov[[j, i]] = value;
        }
    }
    cov
}

fn standardize(x: ArrayView2<f64>) -> Array2<f64> {
    let mut out = x.to_owned();
    for j in 0..x.ncols() {
        let mean = nan_mean(x.column(j));
        let std = nan_std(x.column(j));
        let scale = if std > 0.0 { std } else { 1.0 };
        out.column_mut(j).mapv_inplace(|v| (v - mean) / scale);
    }
    out
}

/// Joint Kullback-Leibler divergence under a Gaussian fit of the two
/// standardized matrices.
pub fn kl_divergence_gaussian(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<f64> {
    check_shapes(a, b)?;
    let a = standardize(a);
    let b = standardize(b);
    let d = a.ncols() as f64;

    let mu_true = column_nan_means(a.view());
    let mu_pred = column_nan_means(b.view());
    let sigma_true = pairwise_covariance(a.view());
    let sigma_pred = pairwise_covariance(b.view());

    let inv_pred = sigma_pred.inv()?;
    let diff = &mu_true - &mu_pred;
    let quad_term = diff.dot(&inv_pred.dot(&diff));
    let trace_term = inv_pred.dot(&sigma_true).diag().sum();
    let det_term = (sigma_pred.det()? / sigma_true.det()?).ln();
    Ok(0.5 * (quad_term + trace_term + det_term - d))
}

/// 1-D empirical Wasserstein distance per column: the integral of the gap
/// between the two empirical distribution functions.
pub fn wasserstein_distance(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array1<f64>> {
    check_shapes(a, b)?;
    let mut out = Array1::zeros(a.ncols());
    for j in 0..a.ncols() {
        let lhs = sorted_column(a.column(j));
        let rhs = sorted_column(b.column(j));
        if lhs.is_empty() || rhs.is_empty() {
            return Err(Error::InsufficientData(format!(
                "column {j} has no observed entry"
            )));
        }
        let values: Vec<f64> = lhs
            .iter()
            .chain(rhs.iter())
            .copied()
            .sorted_by(f64::total_cmp)
            .dedup()
            .collect();
        let (n, m) = (lhs.len() as f64, rhs.len() as f64);
        let mut distance = 0.0;
        let (mut i, mut k) = (0usize, 0usize);
        for window in values.windows(2) {
            while i < lhs.len() && lhs[i] <= window[0] {
                i += 1;
            }
            while k < rhs.len() && rhs[k] <= window[0] {
                k += 1;
            }
            distance += (i as f64 / n - k as f64 / m).abs() * (window[1] - window[0]);
        }
        out[j] = distance;
    }
    Ok(out)
}

/// Symmetric positive semi-definite square root; negative eigenvalues from
/// roundoff are clamped to zero.
fn symmetric_sqrt(m: &Array2<f64>) -> Result<Array2<f64>> {
    let (eigenvalues, eigenvectors) = m.eigh(UPLO::Lower)?;
    let roots = eigenvalues.mapv(|v| v.max(0.0).sqrt());
    Ok(eigenvectors
        .dot(&Array2::from_diag(&roots))
        .dot(&eigenvectors.t()))
}

/// Fréchet distance between the Gaussian fits of the two matrices:
/// `||mu1 - mu2||^2 + tr(S1 + S2 - 2 (S1 S2)^(1/2))`.
///
/// In normalized mode both matrices are first centered and scaled by the
/// shared columnwise statistics, and the result is divided by the row
/// count.
pub fn frechet_distance(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    normalized: bool,
) -> Result<f64> {
    check_shapes(a, b)?;
    let mut a = a.to_owned();
    let mut b = b.to_owned();
    if normalized {
        for j in 0..a.ncols() {
            let std = (nan_std(a.column(j)) + nan_std(b.column(j)) + EPS) / 2.0;
            let mu = (nan_mean(a.column(j)) + nan_mean(b.column(j))) / 2.0;
            a.column_mut(j).mapv_inplace(|v| (v - mu) / std);
            b.column_mut(j).mapv_inplace(|v| (v - mu) / std);
        }
    }

    let mu_true = column_nan_means(a.view());
    let mu_pred = column_nan_means(b.view());
    let sigma_true = pairwise_covariance(a.view());
    let sigma_pred = pairwise_covariance(b.view());

    let ssdiff = (&mu_true - &mu_pred).mapv(|v| v * v).sum();
    // tr((S1 S2)^(1/2)) computed through the symmetric form
    // (S1^(1/2) S2 S1^(1/2))^(1/2), which shares its trace
    let half = symmetric_sqrt(&sigma_true)?;
    let inner = half.dot(&sigma_pred).dot(&half);
    let trace_mean = symmetric_sqrt(&inner)?.diag().sum();
    let distance =
        ssdiff + sigma_true.diag().sum() + sigma_pred.diag().sum() - 2.0 * trace_mean;

    if normalized {
        Ok(distance / a.nrows() as f64)
    } else {
        Ok(distance)
    }
}

fn cityblock_cross_sum(a: ArrayView2<f64>, b: ArrayView2<f64>) -> f64 {
    let mut total = 0.0;
    for row_a in a.rows() {
        for row_b in b.rows() {
            total += row_a
                .iter()
                .zip(row_b.iter())
                .map(|(x, y)| (x - y).abs())
                .sum::<f64>();
        }
    }
    total
}

/// Energy-distance style statistic on rows under the cityblock metric:
/// `2 sum d(a, b) - sum d(a, a) - sum d(b, b)`.
pub fn sum_energy_distances(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<f64> {
    check_shapes(a, b)?;
    Ok(2.0 * cityblock_cross_sum(a, b)
        - cityblock_cross_sum(a, a)
        - cityblock_cross_sum(b, b))
}
