//! k-fold cross-validation over the (alpha, lambda) hyperparameter grid.
//!
//! Every (alpha, lambda, fold) triple is an independent solve sharing only
//! the read-only kernel, signal, and operator set, so the sweep is a
//! parallel map over the Cartesian product of grid cells and folds. Each
//! work item writes its score into its own output slot; aggregation into
//! the score surface happens after the parallel region, with no shared
//! mutable state.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::augment::AugmentedSystem;
use crate::error::InversionError;
use crate::operators::DifferenceOperator;
use crate::solver::{LassoStatus, solve_lasso_column};
use crate::types::{Coefficients, CvOptions};

/// Disjoint partition of the observation rows into held-out groups.
///
/// The default layout is strided and deterministic: observation `i` lands
/// in fold `i mod k`, a pure function of the observation count. With
/// `shuffle` the index order is permuted by a seeded generator first, so a
/// given seed always reproduces the same partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPlan {
    held_out: Vec<Vec<usize>>,
    observations: usize,
}

impl FoldPlan {
    pub fn new(
        observations: usize,
        folds: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self, InversionError> {
        if folds < 2 || folds > observations {
            return Err(InversionError::EmptyFold {
                observations,
                folds,
            });
        }
        let mut index: Vec<usize> = (0..observations).collect();
        if shuffle {
            let mut rng = StdRng::seed_from_u64(seed);
            index.shuffle(&mut rng);
        }
        let mut held_out = vec![Vec::new(); folds];
        for (position, &observation) in index.iter().enumerate() {
            held_out[position % folds].push(observation);
        }
        Ok(Self {
            held_out,
            observations,
        })
    }

    pub fn from_options(observations: usize, options: &CvOptions) -> Result<Self, InversionError> {
        Self::new(observations, options.folds, options.shuffle, options.seed)
    }

    pub fn folds(&self) -> usize {
        self.held_out.len()
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Held-out observation indices for `fold`.
    pub fn held_out(&self, fold: usize) -> &[usize] {
        &self.held_out[fold]
    }

    /// Training observation indices for `fold`, in ascending order.
    pub fn train(&self, fold: usize) -> Vec<usize> {
        let mut excluded = vec![false; self.observations];
        for &i in &self.held_out[fold] {
            excluded[i] = true;
        }
        (0..self.observations).filter(|&i| !excluded[i]).collect()
    }
}

/// Mean and standard error of the held-out prediction error over the
/// (alpha, lambda) scan grid.
///
/// Cells whose folds all failed to converge are marked with NaN, never
/// defaulted; [`ScoreSurface::missing_cells`] reports them and the
/// selection rules skip them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSurface {
    pub alphas: Array1<f64>,
    pub lambdas: Array1<f64>,
    /// `(alphas.len(), lambdas.len())` mean scores; NaN marks a missing cell.
    pub mean: Array2<f64>,
    /// Standard error of the per-fold scores, same shape as `mean`.
    pub std_error: Array2<f64>,
}

impl ScoreSurface {
    pub fn is_missing(&self, alpha_idx: usize, lambda_idx: usize) -> bool {
        self.mean[[alpha_idx, lambda_idx]].is_nan()
    }

    pub fn missing_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for i in 0..self.alphas.len() {
            for j in 0..self.lambdas.len() {
                if self.is_missing(i, j) {
                    cells.push((i, j));
                }
            }
        }
        cells
    }

    pub fn is_complete(&self) -> bool {
        self.mean.iter().all(|v| !v.is_nan())
    }

    /// Indices of the minimum mean score, scanning the grid row-major
    /// (alpha-major) so ties resolve to the first pair in that fixed order.
    pub fn select_minimum(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        let mut best_score = f64::INFINITY;
        for i in 0..self.alphas.len() {
            for j in 0..self.lambdas.len() {
                let score = self.mean[[i, j]];
                if !score.is_nan() && score < best_score {
                    best_score = score;
                    best = Some((i, j));
                }
            }
        }
        best
    }

    /// One-standard-error variant: the most regularized pair (largest alpha,
    /// then largest lambda) whose mean score lies within one standard error
    /// of the minimum. Trades a small amount of fit for parsimony; selection
    /// can differ from [`ScoreSurface::select_minimum`].
    pub fn select_one_std_err(&self) -> Option<(usize, usize)> {
        let (min_i, min_j) = self.select_minimum()?;
        let threshold = self.mean[[min_i, min_j]] + self.std_error[[min_i, min_j]];
        for i in (0..self.alphas.len()).rev() {
            for j in (0..self.lambdas.len()).rev() {
                let score = self.mean[[i, j]];
                if !score.is_nan() && score <= threshold {
                    return Some((i, j));
                }
            }
        }
        Some((min_i, min_j))
    }
}

/// Result of a hyperparameter sweep. When the search is cancelled the
/// surface still holds every cell completed before the flag was observed;
/// the untouched cells stay marked missing.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub surface: ScoreSurface,
    /// Pairs whose every fold was actually evaluated (converged or not).
    pub evaluated_pairs: usize,
    pub cancelled: bool,
}

struct FoldData {
    kernel_train: Array2<f64>,
    signal_train: Array2<f64>,
    kernel_test: Array2<f64>,
    signal_test: Array2<f64>,
}

enum CellOutcome {
    Score(f64),
    Failed,
    Skipped,
}

/// Fit the training block at `(alpha, lambda)` and score the held-out
/// block, retrying non-convergent solves with an escalating budget.
fn evaluate_cell(
    fold: &FoldData,
    operators: &[DifferenceOperator],
    alpha: f64,
    lambda: f64,
    options: &CvOptions,
) -> CellOutcome {
    let system = match AugmentedSystem::build(
        fold.kernel_train.view(),
        fold.signal_train.view(),
        operators,
        alpha,
    ) {
        Ok(system) => system,
        Err(err) => {
            log::error!("[cv] augmentation failed at alpha={alpha:.3e}: {err}");
            return CellOutcome::Failed;
        }
    };

    let columns = system.signal_cols();
    let test_rows = fold.kernel_test.nrows();
    let mut rss = 0.0;
    for column in 0..columns {
        let mut solve_options = options.solve.clone();
        let mut warm: Option<Coefficients> = None;
        let mut converged = None;
        for attempt in 0..=options.retries {
            match solve_lasso_column(&system, column, lambda, &solve_options, warm.as_ref()) {
                Ok(fit) => {
                    if fit.status == LassoStatus::Converged {
                        converged = Some(fit.coefficients);
                        break;
                    }
                    log::warn!(
                        "[cv] cell (alpha={alpha:.3e}, lambda={lambda:.3e}) attempt {attempt} \
                         stopped after {} sweeps (max update {:.3e}); retrying with a relaxed budget",
                        fit.iterations,
                        fit.max_update
                    );
                    warm = Some(fit.coefficients);
                    solve_options.max_iterations = solve_options.max_iterations.saturating_mul(2);
                    solve_options.tolerance *= 10.0;
                }
                Err(err) => {
                    log::error!(
                        "[cv] solve failed at (alpha={alpha:.3e}, lambda={lambda:.3e}): {err}"
                    );
                    return CellOutcome::Failed;
                }
            }
        }
        let Some(f) = converged else {
            return CellOutcome::Failed;
        };

        let prediction = fold.kernel_test.dot(&f.0);
        for i in 0..test_rows {
            let diff = fold.signal_test[[i, column]] - prediction[i];
            rss += diff * diff;
        }
    }

    CellOutcome::Score(rss / (test_rows * columns) as f64)
}

fn validate_scan_axis(name: &str, values: ArrayView1<'_, f64>) -> Result<(), InversionError> {
    if values.is_empty() {
        return Err(InversionError::InvalidHyperparameter(format!(
            "{name} scan set is empty"
        )));
    }
    for &v in values {
        if !v.is_finite() || v < 0.0 {
            return Err(InversionError::InvalidHyperparameter(format!(
                "{name} scan set contains {v}, expected finite non-negative values"
            )));
        }
    }
    Ok(())
}

/// Sweep the (alpha, lambda) grid with k-fold cross-validation and produce
/// the full score surface.
///
/// The operator set is grid-derived and shared read-only across every
/// worker; per-fold kernel/signal slices are materialized once up front.
/// An optional cancellation flag is checked as each work item starts, so a
/// long sweep can be interrupted between cells with the partial surface
/// still retrievable from the outcome.
pub fn search(
    kernel: ArrayView2<'_, f64>,
    signal: ArrayView2<'_, f64>,
    operators: &[DifferenceOperator],
    alphas: ArrayView1<'_, f64>,
    lambdas: ArrayView1<'_, f64>,
    plan: &FoldPlan,
    options: &CvOptions,
    cancel: Option<&AtomicBool>,
) -> Result<SearchOutcome, InversionError> {
    validate_scan_axis("alpha", alphas)?;
    validate_scan_axis("lambda", lambdas)?;
    let (m, n) = kernel.dim();
    if signal.nrows() != m {
        return Err(InversionError::DimensionMismatch(format!(
            "kernel has {m} rows but the signal has {} rows",
            signal.nrows()
        )));
    }
    if signal.ncols() == 0 {
        return Err(InversionError::DimensionMismatch(
            "signal has no columns".into(),
        ));
    }
    if plan.observations() != m {
        return Err(InversionError::DimensionMismatch(format!(
            "fold plan covers {} observations but the kernel has {m} rows",
            plan.observations()
        )));
    }
    for op in operators {
        if op.ncols() != n {
            return Err(InversionError::DimensionMismatch(format!(
                "smoothness operator along axis {} acts on {} grid points but the kernel has {n} columns",
                op.axis(),
                op.ncols()
            )));
        }
    }

    let folds = plan.folds();
    let fold_data: Vec<FoldData> = (0..folds)
        .map(|fold| {
            let train = plan.train(fold);
            let test = plan.held_out(fold);
            FoldData {
                kernel_train: kernel.select(Axis(0), &train),
                signal_train: signal.select(Axis(0), &train),
                kernel_test: kernel.select(Axis(0), test),
                signal_test: signal.select(Axis(0), test),
            }
        })
        .collect();

    let p = alphas.len();
    let q = lambdas.len();
    let cells: Vec<(usize, usize)> = (0..p * q)
        .flat_map(|pair| (0..folds).map(move |fold| (pair, fold)))
        .collect();

    // Parallel map over (pair, fold); results land positionally, so every
    // worker owns a distinct output slot.
    let outcomes: Vec<CellOutcome> = cells
        .into_par_iter()
        .map(|(pair, fold)| {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return CellOutcome::Skipped;
            }
            let alpha = alphas[pair / q];
            let lambda = lambdas[pair % q];
            evaluate_cell(&fold_data[fold], operators, alpha, lambda, options)
        })
        .collect();

    let sigma_sq = options.sigma * options.sigma;
    let mut mean = Array2::from_elem((p, q), f64::NAN);
    let mut std_error = Array2::from_elem((p, q), f64::NAN);
    let mut evaluated_pairs = 0usize;
    let mut any_skipped = false;

    for pair in 0..p * q {
        let slots = &outcomes[pair * folds..(pair + 1) * folds];
        if slots
            .iter()
            .any(|o| matches!(o, CellOutcome::Skipped))
        {
            any_skipped = true;
            continue;
        }
        evaluated_pairs += 1;
        let scores: Vec<f64> = slots
            .iter()
            .filter_map(|o| match o {
                CellOutcome::Score(s) => Some(*s),
                _ => None,
            })
            .collect();
        let (i, j) = (pair / q, pair % q);
        if scores.is_empty() {
            log::warn!(
                "[cv] no fold converged at (alpha={:.3e}, lambda={:.3e}); cell marked missing",
                alphas[i],
                lambdas[j]
            );
            continue;
        }
        if scores.len() < folds {
            log::warn!(
                "[cv] {} of {folds} folds converged at (alpha={:.3e}, lambda={:.3e})",
                scores.len(),
                alphas[i],
                lambdas[j]
            );
        }
        let count = scores.len() as f64;
        let raw_mean = scores.iter().sum::<f64>() / count;
        let variance = if scores.len() > 1 {
            scores.iter().map(|s| (s - raw_mean).powi(2)).sum::<f64>() / (count - 1.0)
        } else {
            0.0
        };
        mean[[i, j]] = (raw_mean - sigma_sq).abs();
        std_error[[i, j]] = (variance / count).sqrt();
    }

    let cancelled =
        any_skipped || cancel.is_some_and(|flag| flag.load(Ordering::Relaxed));

    Ok(SearchOutcome {
        surface: ScoreSurface {
            alphas: alphas.to_owned(),
            lambdas: lambdas.to_owned(),
            mean,
            std_error,
        },
        evaluated_pairs,
        cancelled,
    })
}
