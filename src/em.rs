//! Expectation-maximization imputation under a Gaussian model.
//!
//! Two generative models are supported: a joint multivariate normal over
//! the columns, and a first-order vector autoregression over the rows. Both
//! alternate parameter estimation on the filled matrix with re-imputation
//! of the missing entries until the parameters settle. Transformation can
//! either plug in the conditional expectation or draw from the conditional
//! distribution.

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Cholesky, Inverse, LeastSquaresSvd, UPLO};
use rand::rngs::ThreadRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::Imputer;

/// Generative model fitted by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmVariant {
    /// Columns jointly Gaussian, rows independent.
    MultiNormal,
    /// First-order vector autoregression: each row is a linear function of
    /// the previous row plus Gaussian noise.
    Var1,
}

/// Tuning knobs for [`EmSampler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmConfig {
    pub variant: EmVariant,
    /// Draw from the conditional distribution instead of plugging in its
    /// mean.
    pub stochastic: bool,
    /// Parameter-change threshold ending the EM loop.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            variant: EmVariant::MultiNormal,
            stochastic: false,
            tolerance: 1e-4,
            max_iterations: 50,
        }
    }
}

/// Fitted parameters, kept across [`Imputer::transform`] calls.
#[derive(Debug, Clone)]
enum ModelState {
    MultiNormal {
        mean: Array1<f64>,
        cov: Array2<f64>,
    },
    Var1 {
        coeff: Array2<f64>,
        noise_cov: Array2<f64>,
        mean: Array1<f64>,
    },
}

/// EM-based imputer; fit once, transform any matrix with the same columns.
#[derive(Debug, Clone, Default)]
pub struct EmSampler {
    pub config: EmConfig,
    state: Option<ModelState>,
}

impl EmSampler {
    pub fn new(config: EmConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Impute with an explicit random source, for reproducible stochastic
    /// draws.
    pub fn transform_with_rng<R: Rng>(
        &self,
        x: ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        let state = self.state.as_ref().ok_or_else(|| {
            Error::MissingConfiguration("transform called before fit".to_string())
        })?;
        fill_missing(state, x, self.config.stochastic, rng)
    }

    fn validate_input(&self, x: ArrayView2<f64>) -> Result<()> {
        if x.nrows() < 2 {
            return Err(Error::InsufficientData(
                "at least two rows are required to estimate a covariance".to_string(),
            ));
        }
        for (j, column) in x.columns().into_iter().enumerate() {
            if column.iter().all(|v| v.is_nan()) {
                return Err(Error::InsufficientData(format!(
                    "column {j} has no observed entry"
                )));
            }
        }
        Ok(())
    }
}

impl Imputer for EmSampler {
    fn fit(&mut self, x: ArrayView2<f64>) -> Result<()> {
        self.state = None;
        self.validate_input(x)?;

        let mut work = mean_filled(x);
        let mut state = estimate(self.config.variant, work.view())?;
        let mut rng = rand::thread_rng();
        for iteration in 0..self.config.max_iterations {
            // expectation step stays deterministic during fitting
            work = fill_missing(&state, x, false, &mut rng)?;
            let next = estimate(self.config.variant, work.view())?;
            let change = state_change(&state, &next);
            state = next;
            if change < self.config.tolerance {
                debug!("parameters settled after {} iterations", iteration + 1);
                break;
            }
        }
        self.state = Some(state);
        Ok(())
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut rng: ThreadRng = rand::thread_rng();
        self.transform_with_rng(x, &mut rng)
    }
}

fn mean_filled(x: ArrayView2<f64>) -> Array2<f64> {
    crate::prepare::impute_nans(x, crate::prepare::ImputeMethod::Mean)
}

fn estimate(variant: EmVariant, work: ArrayView2<f64>) -> Result<ModelState> {
    match variant {
        EmVariant::MultiNormal => {
            let mean = column_means(work);
            let cov = covariance(work, &mean);
            Ok(ModelState::MultiNormal { mean, cov })
        }
        EmVariant::Var1 => {
            let n = work.nrows();
            let previous = work.slice(ndarray::s![..n - 1, ..]).to_owned();
            let next = work.slice(ndarray::s![1.., ..]).to_owned();
            // rows of `next` are rows of `previous` times the transposed
            // coefficient matrix
            let solution = previous.least_squares(&next)?.solution;
            let residuals = &next - &previous.dot(&solution);
            let denominator = (n - 1).max(2) as f64 - 1.0;
            let noise_cov = residuals.t().dot(&residuals) / denominator;
            Ok(ModelState::Var1 {
                coeff: solution.t().to_owned(),
                noise_cov,
                mean: column_means(work),
            })
        }
    }
}

fn column_means(x: ArrayView2<f64>) -> Array1<f64> {
    x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()))
}

fn covariance(x: ArrayView2<f64>, mean: &Array1<f64>) -> Array2<f64> {
    let centered = &x.to_owned() - mean;
    centered.t().dot(&centered) / (x.nrows() - 1) as f64
}

fn state_change(current: &ModelState, next: &ModelState) -> f64 {
    fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }
    match (current, next) {
        (
            ModelState::MultiNormal { mean: m1, cov: c1 },
            ModelState::MultiNormal { mean: m2, cov: c2 },
        ) => {
            let mean_diff = m1
                .iter()
                .zip(m2.iter())
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max);
            mean_diff.max(max_abs_diff(c1, c2))
        }
        (
            ModelState::Var1 {
                coeff: b1,
                noise_cov: n1,
                ..
            },
            ModelState::Var1 {
                coeff: b2,
                noise_cov: n2,
                ..
            },
        ) => max_abs_diff(b1, b2).max(max_abs_diff(n1, n2)),
        _ => f64::INFINITY,
    }
}

fn fill_missing<R: Rng>(
    state: &ModelState,
    x: ArrayView2<f64>,
    stochastic: bool,
    rng: &mut R,
) -> Result<Array2<f64>> {
    match state {
        ModelState::MultiNormal { mean, cov } => {
            let mut out = x.to_owned();
            for mut row in out.rows_mut() {
                fill_row(&mut row, mean, cov, stochastic, rng)?;
            }
            Ok(out)
        }
        ModelState::Var1 {
            coeff,
            noise_cov,
            mean,
        } => {
            let n = x.nrows();
            // pre-fill with the marginal mean so rows ahead of the cursor
            // still provide a usable backward prior
            let mut work = x.to_owned();
            for mut row in work.rows_mut() {
                for (j, value) in row.iter_mut().enumerate() {
                    if value.is_nan() {
                        *value = mean[j];
                    }
                }
            }
            let mut out = x.to_owned();
            for t in 0..n {
                let forward = if t > 0 {
                    Some(coeff.dot(&work.row(t - 1)))
                } else {
                    None
                };
                let backward = if t + 1 < n {
                    Some(coeff.least_squares(&work.row(t + 1).to_owned())?.solution)
                } else {
                    None
                };
                let prior = match (forward, backward) {
                    (Some(f), Some(b)) => (&f + &b) / 2.0,
                    (Some(f), None) => f,
                    (None, Some(b)) => b,
                    (None, None) => mean.clone(),
                };
                let mut row = out.row_mut(t);
                fill_row(&mut row, &prior, noise_cov, stochastic, rng)?;
                work.row_mut(t).assign(&row);
            }
            Ok(out)
        }
    }
}

fn fill_row<R: Rng>(
    row: &mut ndarray::ArrayViewMut1<f64>,
    mean: &Array1<f64>,
    cov: &Array2<f64>,
    stochastic: bool,
    rng: &mut R,
) -> Result<()> {
    let conditioned = match condition_gaussian(mean, cov, row.view())? {
        Some(c) => c,
        None => return Ok(()),
    };
    let (missing, cond_mean, cond_cov) = conditioned;
    let values = if stochastic {
        let chol = spd_cholesky(&cond_cov)?;
        let noise: Array1<f64> = (0..missing.len())
            .map(|_| rng.sample(StandardNormal))
            .collect();
        &cond_mean + &chol.dot(&noise)
    } else {
        cond_mean
    };
    for (&j, &value) in missing.iter().zip(values.iter()) {
        row[j] = value;
    }
    Ok(())
}

/// Conditional law of the missing coordinates of one row under
/// `N(mean, cov)`, given its observed coordinates.
///
/// Returns `None` when the row is complete; a fully missing row falls back
/// to the marginal law.
fn condition_gaussian(
    mean: &Array1<f64>,
    cov: &Array2<f64>,
    row: ArrayView1<f64>,
) -> Result<Option<(Vec<usize>, Array1<f64>, Array2<f64>)>> {
    let missing: Vec<usize> = row
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_nan())
        .map(|(j, _)| j)
        .collect();
    if missing.is_empty() {
        return Ok(None);
    }
    let observed: Vec<usize> = (0..row.len()).filter(|j| !missing.contains(j)).collect();
    if observed.is_empty() {
        return Ok(Some((missing, mean.clone(), cov.clone())));
    }

    let cov_oo = cov.select(Axis(0), &observed).select(Axis(1), &observed);
    let cov_mo = cov.select(Axis(0), &missing).select(Axis(1), &observed);
    let cov_mm = cov.select(Axis(0), &missing).select(Axis(1), &missing);
    let gain = cov_mo.dot(&ridge_inverse(&cov_oo)?);

    let delta: Array1<f64> = observed.iter().map(|&j| row[j] - mean[j]).collect();
    let mean_m: Array1<f64> = missing.iter().map(|&j| mean[j]).collect();
    let cond_mean = &mean_m + &gain.dot(&delta);
    let cond_cov = &cov_mm - &gain.dot(&cov_mo.t());
    Ok(Some((missing, cond_mean, cond_cov)))
}

const JITTERS: [f64; 4] = [0.0, 1e-9, 1e-6, 1e-3];

/// Invert a covariance block, escalating a diagonal ridge until the
/// factorization succeeds.
fn ridge_inverse(m: &Array2<f64>) -> Result<Array2<f64>> {
    let scale = m
        .diag()
        .iter()
        .map(|v| v.abs())
        .fold(0.0, f64::max)
        .max(1.0);
    for &jitter in &JITTERS {
        let mut attempt = m.clone();
        for i in 0..attempt.nrows() {
            attempt[[i, i]] += jitter * scale;
        }
        if let Ok(inverse) = attempt.inv() {
            return Ok(inverse);
        }
    }
    Err(Error::InsufficientData(
        "covariance block stayed singular after regularization".to_string(),
    ))
}

/// Lower Cholesky factor with the same ridge escalation as
/// [`ridge_inverse`].
fn spd_cholesky(m: &Array2<f64>) -> Result<Array2<f64>> {
    let scale = m
        .diag()
        .iter()
        .map(|v| v.abs())
        .fold(0.0, f64::max)
        .max(1.0);
    for &jitter in &JITTERS {
        let mut attempt = m.clone();
        for i in 0..attempt.nrows() {
            attempt[[i, i]] += jitter * scale;
        }
        if let Ok(factor) = attempt.cholesky(UPLO::Lower) {
            return Ok(factor);
        }
    }
    Err(Error::InsufficientData(
        "conditional covariance is not positive definite".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_transform_before_fit_fails() {
        let sampler = EmSampler::default();
        let x = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        assert!(matches!(
            sampler.transform(x.view()),
            Err(Error::MissingConfiguration(_))
        ));
    }

    #[test]
    fn test_fit_rejects_all_missing_column() {
        let mut sampler = EmSampler::default();
        let x = arr2(&[[1.0, f64::NAN], [3.0, f64::NAN]]);
        assert!(matches!(
            sampler.fit(x.view()),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_var1_rejects_single_row() {
        let mut sampler = EmSampler::new(EmConfig {
            variant: EmVariant::Var1,
            ..EmConfig::default()
        });
        let x = arr2(&[[1.0, 2.0]]);
        assert!(matches!(
            sampler.fit(x.view()),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_multi_normal_uses_column_correlation() {
        // second column is twice the first; the missing entry should land
        // near 2 * 5 = 10 rather than near the column mean
        let x = arr2(&[
            [1.0, 2.0],
            [2.0, 4.0],
            [3.0, 6.0],
            [4.0, 8.0],
            [5.0, f64::NAN],
        ]);
        let mut sampler = EmSampler::default();
        let filled = sampler.fit_transform(x.view()).unwrap();
        assert!((filled[[4, 1]] - 10.0).abs() < 1.0, "got {}", filled[[4, 1]]);
        for ((i, j), &value) in x.indexed_iter() {
            if !value.is_nan() {
                assert_eq!(filled[[i, j]], value);
            }
        }
    }

    #[test]
    fn test_stochastic_draws_are_reproducible() {
        let x = arr2(&[
            [1.0, 2.1],
            [2.0, 3.9],
            [3.0, 6.2],
            [4.0, 7.8],
            [5.0, f64::NAN],
        ]);
        let mut sampler = EmSampler::new(EmConfig {
            stochastic: true,
            ..EmConfig::default()
        });
        sampler.fit(x.view()).unwrap();
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = sampler.transform_with_rng(x.view(), &mut rng_a).unwrap();
        let b = sampler.transform_with_rng(x.view(), &mut rng_b).unwrap();
        assert_eq!(a, b);
        assert!(a[[4, 1]].is_finite());
    }

    #[test]
    fn test_var1_constant_series() {
        let x = arr2(&[
            [3.0, 3.0],
            [3.0, 3.0],
            [f64::NAN, 3.0],
            [3.0, 3.0],
            [3.0, f64::NAN],
        ]);
        let mut sampler = EmSampler::new(EmConfig {
            variant: EmVariant::Var1,
            ..EmConfig::default()
        });
        let filled = sampler.fit_transform(x.view()).unwrap();
        assert!((filled[[2, 0]] - 3.0).abs() < 1e-6);
        assert!((filled[[4, 1]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_refit_replaces_state() {
        let x = arr2(&[[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]]);
        let mut sampler = EmSampler::default();
        sampler.fit(x.view()).unwrap();
        sampler.fit(x.view()).unwrap();
        let filled = sampler.transform(x.view()).unwrap();
        assert_eq!(filled, x);
    }
}
