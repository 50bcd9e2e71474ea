//! Principal component pursuit by the inexact augmented Lagrange method.
//!
//! Solves `min ||L||_* + lambda ||A||_1  s.t.  X = L + A` on the
//! interpolation-seeded input, with convergence measured on the observed
//! entries only.

use ndarray::{Array2, ArrayView2};

use crate::error::Result;
use crate::prepare::{impute_nans, linear_interpolation, ImputeMethod};
use crate::rpca::{Decomposition, RpcaConfig};
use crate::shrinkage::{frobenius_norm, l1_norm, soft_thresholding, svd_thresholding};

pub(crate) fn decompose(x: ArrayView2<f64>, config: &RpcaConfig) -> Result<Decomposition> {
    let omega = x.mapv(|v| !v.is_nan());
    let d = impute_nans(linear_interpolation(x).view(), ImputeMethod::Median);

    let (n_rows, n_cols) = d.dim();
    let d_fro = frobenius_norm(d.view());
    if d_fro == 0.0 {
        return Ok(Decomposition {
            low_rank: Array2::zeros((n_rows, n_cols)),
            anomalies: Array2::zeros((n_rows, n_cols)),
            converged: true,
            iterations: 0,
        });
    }

    let mu = (n_rows * n_cols) as f64 / (4.0 * l1_norm(d.view()));
    let lam = config
        .lam
        .unwrap_or(1.0 / (n_rows.max(n_cols) as f64).sqrt());

    let mut low_rank = Array2::zeros((n_rows, n_cols));
    let mut anomalies: Array2<f64> = Array2::zeros((n_rows, n_cols));
    let mut multiplier: Array2<f64> = Array2::zeros((n_rows, n_cols));

    let mut converged = false;
    let mut iterations = 0;
    for iteration in 1..=config.max_iterations {
        iterations = iteration;

        let target = &d - &anomalies + &multiplier / mu;
        let (l, _) = svd_thresholding(target.view(), 1.0 / mu)?;
        low_rank = l;

        // lambda 0 switches the sparse part off entirely instead of
        // absorbing the whole input into it
        if lam > 0.0 {
            let target = &d - &low_rank + &multiplier / mu;
            anomalies = soft_thresholding(target.view(), lam / mu)?;
        }

        let residual = &d - &low_rank - &anomalies;
        multiplier.zip_mut_with(&residual, |y, &r| *y += mu * r);

        let mut masked = residual;
        masked.zip_mut_with(&omega, |r, &observed| {
            if !observed {
                *r = 0.0;
            }
        });
        if frobenius_norm(masked.view()) / d_fro < config.tolerance {
            converged = true;
            break;
        }
    }

    Ok(Decomposition {
        low_rank,
        anomalies,
        converged,
        iterations,
    })
}
