//! Robust decomposition of a partially observed matrix into a low-rank
//! part and a sparse anomaly part.
//!
//! Two solvers share this front end: principal component pursuit for the
//! noise-free model `X = L + A`, and a regularized variant that tolerates
//! dense noise and optional periodicity penalties. Both accept NaN entries
//! as missing values.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::prepare::{fold_signal, unfold_signal};
use crate::temporal::BandModel;
use crate::{noisy, pcp, Imputer};

/// Solver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcaVariant {
    /// Principal component pursuit by augmented Lagrange multipliers.
    /// Exact model, no dense noise term.
    Pcp,
    /// Regularized decomposition with a Frobenius data-fit term, suited to
    /// noisy observations and temporal penalties.
    Noisy,
}

/// Norm applied to the lagged differences `L H_p` in the temporal penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalNorm {
    L1,
    L2,
}

/// Tuning knobs for [`decompose`].
///
/// `tau` and `lam` left at `None` are derived from the data shape as
/// `1 / sqrt(max(n_rows, n_cols))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcaConfig {
    pub variant: RpcaVariant,
    /// Nuclear-norm weight (unused by [`RpcaVariant::Pcp`]).
    pub tau: Option<f64>,
    /// Sparsity weight on the anomaly part.
    pub lam: Option<f64>,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Norm of the temporal penalty terms.
    pub norm: TemporalNorm,
    /// Periodicities penalized on the low-rank part, in columns.
    pub periods: Vec<usize>,
    /// One non-negative weight per entry of `periods`.
    pub period_weights: Vec<f64>,
    pub band_model: BandModel,
}

impl Default for RpcaConfig {
    fn default() -> Self {
        Self::noisy()
    }
}

impl RpcaConfig {
    pub fn pcp() -> Self {
        Self {
            variant: RpcaVariant::Pcp,
            ..Self::noisy()
        }
    }

    pub fn noisy() -> Self {
        Self {
            variant: RpcaVariant::Noisy,
            tau: None,
            lam: None,
            max_iterations: 10_000,
            tolerance: 1e-8,
            norm: TemporalNorm::L2,
            periods: Vec::new(),
            period_weights: Vec::new(),
            band_model: BandModel::Column,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(tau) = self.tau {
            if !tau.is_finite() || tau < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "tau must be non-negative, got {tau}"
                )));
            }
        }
        if let Some(lam) = self.lam {
            if !lam.is_finite() || lam < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "lambda must be non-negative, got {lam}"
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidArgument(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.periods.len() != self.period_weights.len() {
            return Err(Error::InvalidArgument(format!(
                "{} periods declared against {} weights",
                self.periods.len(),
                self.period_weights.len()
            )));
        }
        if self.variant == RpcaVariant::Pcp && !self.periods.is_empty() {
            return Err(Error::InvalidArgument(
                "temporal penalties require the noisy variant".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output of [`decompose`]: the input split as `X ~ low_rank + anomalies`.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub low_rank: Array2<f64>,
    pub anomalies: Array2<f64>,
    /// False when the iteration cap was hit before the tolerance.
    pub converged: bool,
    pub iterations: usize,
}

/// Decompose a matrix with NaN marking missing entries.
pub fn decompose(x: ArrayView2<f64>, config: &RpcaConfig) -> Result<Decomposition> {
    config.validate()?;
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(Error::InsufficientData("empty matrix".to_string()));
    }
    if !x.iter().any(|v| v.is_finite()) {
        return Err(Error::InsufficientData(
            "no observed entry in the input".to_string(),
        ));
    }
    match config.variant {
        RpcaVariant::Pcp => pcp::decompose(x, config),
        RpcaVariant::Noisy => noisy::decompose(x, config),
    }
}

/// Decompose a 1-D signal by folding it into `period` rows first.
///
/// Returns the low-rank and anomaly parts unfolded back to the signal
/// length; NaN padding introduced by the fold is dropped.
pub fn decompose_signal(
    x: ArrayView1<f64>,
    period: usize,
    config: &RpcaConfig,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let folded = fold_signal(x, period)?;
    let result = decompose(folded.view(), config)?;
    let low_rank = unfold_signal(result.low_rank.view(), x.len());
    let anomalies = unfold_signal(result.anomalies.view(), x.len());
    Ok((low_rank, anomalies))
}

/// Imputer backed by the robust decomposition: missing entries take the
/// value of the low-rank part, observed entries pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct RpcaImputer {
    pub config: RpcaConfig,
}

impl RpcaImputer {
    pub fn new(config: RpcaConfig) -> Self {
        Self { config }
    }
}

impl Imputer for RpcaImputer {
    /// The decomposition is recomputed per matrix, so there is nothing to
    /// fit ahead of time beyond validating the configuration.
    fn fit(&mut self, _x: ArrayView2<f64>) -> Result<()> {
        self.config.validate()
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let result = decompose(x, &self.config)?;
        let mut out = x.to_owned();
        for ((i, j), value) in out.indexed_iter_mut() {
            if value.is_nan() {
                *value = result.low_rank[[i, j]];
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_validate_rejects_negative_weights() {
        let mut config = RpcaConfig::noisy();
        config.tau = Some(-1.0);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
        config.tau = Some(1.0);
        config.lam = Some(f64::NAN);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_mismatched_periods() {
        let mut config = RpcaConfig::noisy();
        config.periods = vec![2, 7];
        config.period_weights = vec![0.5];
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_periods_on_pcp() {
        let mut config = RpcaConfig::pcp();
        config.periods = vec![2];
        config.period_weights = vec![0.5];
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decompose_rejects_all_missing() {
        let x = arr2(&[[f64::NAN, f64::NAN], [f64::NAN, f64::NAN]]);
        assert!(matches!(
            decompose(x.view(), &RpcaConfig::default()),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_decompose_signal_shapes() {
        let signal = arr1(&[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        let (low_rank, anomalies) =
            decompose_signal(signal.view(), 3, &RpcaConfig::default()).unwrap();
        assert_eq!(low_rank.len(), signal.len());
        assert_eq!(anomalies.len(), signal.len());
        assert!(low_rank.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_imputer_preserves_observed_entries() {
        let x = arr2(&[
            [1.0, 2.0, 1.0, 2.0],
            [2.0, 1.0, 2.0, f64::NAN],
            [1.0, 2.0, 1.0, 2.0],
        ]);
        let mut imputer = RpcaImputer::default();
        let filled = imputer.fit_transform(x.view()).unwrap();
        for ((i, j), &value) in x.indexed_iter() {
            if !value.is_nan() {
                assert_eq!(filled[[i, j]], value);
            }
        }
        assert!(filled.iter().all(|v| v.is_finite()));
    }
}
