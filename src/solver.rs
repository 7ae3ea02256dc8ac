//! Cyclic coordinate-descent solver for the L1-penalized augmented system.
//!
//! The objective is
//!
//! ```text
//!   (1 / (2 M)) * ||K' f - s'||^2  +  lambda * ||f||_1
//! ```
//!
//! where `M` is the row count of the *augmented* matrix `K'`. This is the
//! elastic-net-family normalization with the L1 ratio fixed at one; because
//! the smoothness penalty is already absorbed into `K'` as extra rows, `M`
//! grows with the operator set and the effective `lambda` scale depends on
//! it. The convention is part of the public contract: any comparison of
//! `lambda` values across grids or kernels must account for it.
//!
//! Coordinates are visited in a fixed cyclic order from a zero (or caller
//! supplied) starting point, so the solve is deterministic and insensitive
//! to input ordering. Convergence is declared when the largest absolute
//! coefficient update in a full sweep drops below the tolerance.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::augment::AugmentedSystem;
use crate::error::InversionError;
use crate::linalg::{SymmetricFactor, fast_ata, fast_atb};
use crate::types::{Coefficients, SolveOptions};
use faer::Side;

/// Branchless soft thresholding: `sign(v) * max(|v| - t, 0)`.
#[inline]
pub fn soft_threshold(v: f64, t: f64) -> f64 {
    let shrunk = v.abs() - t;
    let positive = if shrunk > 0.0 { shrunk } else { 0.0 };
    v.signum() * positive
}

/// Termination state of a coordinate-descent run. Exhausting the iteration
/// budget is reported, not fatal: the caller decides whether to retry with a
/// relaxed tolerance or accept the last iterate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LassoStatus {
    Converged,
    MaxIterationsReached,
}

/// Result of a single-spectrum solve.
#[derive(Debug, Clone)]
pub struct LassoFit {
    pub coefficients: Coefficients,
    pub status: LassoStatus,
    /// Full coordinate sweeps performed.
    pub iterations: usize,
    /// Largest absolute coefficient update in the final sweep.
    pub max_update: f64,
}

/// Result of a multi-spectrum solve sharing one augmented matrix.
#[derive(Debug, Clone)]
pub struct MultiLassoFit {
    /// One coefficient column per signal column, shape `(n, r)`.
    pub coefficients: Array2<f64>,
    pub statuses: Vec<LassoStatus>,
    pub iterations: Vec<usize>,
}

impl MultiLassoFit {
    /// True when every column converged.
    pub fn all_converged(&self) -> bool {
        self.statuses.iter().all(|s| *s == LassoStatus::Converged)
    }
}

fn validate_lambda(lambda: f64) -> Result<(), InversionError> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(InversionError::InvalidHyperparameter(format!(
            "lambda must be finite and non-negative, got {lambda}"
        )));
    }
    Ok(())
}

/// Squared Euclidean norms of the design columns, shared across right-hand
/// sides when batching.
fn column_sq_norms(matrix: &Array2<f64>) -> Array1<f64> {
    let mut norms = Array1::zeros(matrix.ncols());
    for (j, col) in matrix.columns().into_iter().enumerate() {
        norms[j] = col.dot(&col);
    }
    norms
}

/// One cyclic coordinate-descent run over a single right-hand side.
fn descend(
    matrix: &Array2<f64>,
    rhs: ArrayView1<'_, f64>,
    col_sq_norms: &Array1<f64>,
    lambda: f64,
    options: &SolveOptions,
    warm_start: Option<ArrayView1<'_, f64>>,
) -> (Array1<f64>, LassoStatus, usize, f64) {
    let n = matrix.ncols();
    let m = matrix.nrows() as f64;

    let mut f = match warm_start {
        Some(start) => start.to_owned(),
        None => Array1::zeros(n),
    };
    // Residual r = s' - K' f, maintained incrementally.
    let mut residual = rhs.to_owned();
    if warm_start.is_some() {
        residual -= &matrix.dot(&f);
    }

    let mut status = LassoStatus::MaxIterationsReached;
    let mut sweeps = 0usize;
    let mut max_update = f64::INFINITY;

    for sweep in 0..options.max_iterations {
        sweeps = sweep + 1;
        max_update = 0.0;
        for j in 0..n {
            let norm_sq = col_sq_norms[j];
            let old = f[j];
            if norm_sq == 0.0 {
                // An all-zero column carries no information; its coefficient
                // stays at zero.
                if old != 0.0 {
                    f[j] = 0.0;
                }
                continue;
            }
            let col = matrix.column(j);
            let c_j = norm_sq / m;
            let rho = col.dot(&residual) / m + c_j * old;
            let new = if options.non_negative {
                let shrunk = rho - lambda;
                if shrunk > 0.0 { shrunk / c_j } else { 0.0 }
            } else {
                soft_threshold(rho, lambda) / c_j
            };
            let delta = new - old;
            if delta != 0.0 {
                ndarray::Zip::from(&mut residual)
                    .and(&col)
                    .for_each(|r, &k| *r -= delta * k);
                f[j] = new;
                let step = delta.abs();
                if step > max_update {
                    max_update = step;
                }
            }
        }
        if max_update < options.tolerance {
            status = LassoStatus::Converged;
            break;
        }
    }

    (f, status, sweeps, max_update)
}

/// Closed-form path for `lambda == 0`: the ridge-augmented ordinary
/// least-squares solution of the normal equations `K'^T K' f = K'^T s'`.
fn solve_unpenalized(system: &AugmentedSystem) -> Result<Array2<f64>, InversionError> {
    let gram = fast_ata(&system.matrix);
    let rhs = fast_atb(&system.matrix, &system.signal);
    let factor = SymmetricFactor::new(&gram, Side::Lower)?;
    Ok(factor.solve_mat(&rhs))
}

/// Solve the augmented system for a single spectrum.
///
/// `lambda == 0` without a non-negativity constraint takes the direct
/// normal-equations path; otherwise cyclic coordinate descent runs from a
/// zero start.
pub fn solve_lasso(
    system: &AugmentedSystem,
    lambda: f64,
    options: &SolveOptions,
) -> Result<LassoFit, InversionError> {
    solve_lasso_from(system, lambda, options, None)
}

/// Like [`solve_lasso`], resuming from a caller-supplied iterate. Used to
/// warm-start retries of non-convergent cross-validation cells.
pub fn solve_lasso_from(
    system: &AugmentedSystem,
    lambda: f64,
    options: &SolveOptions,
    warm_start: Option<&Coefficients>,
) -> Result<LassoFit, InversionError> {
    if system.signal_cols() != 1 {
        return Err(InversionError::DimensionMismatch(format!(
            "expected a single signal column, got {}; use solve_lasso_multi for batched spectra",
            system.signal_cols()
        )));
    }
    solve_lasso_column(system, 0, lambda, options, warm_start)
}

/// Solve for one signal column of a batched system, leaving the others
/// untouched.
pub fn solve_lasso_column(
    system: &AugmentedSystem,
    column: usize,
    lambda: f64,
    options: &SolveOptions,
    warm_start: Option<&Coefficients>,
) -> Result<LassoFit, InversionError> {
    validate_lambda(lambda)?;
    if column >= system.signal_cols() {
        return Err(InversionError::DimensionMismatch(format!(
            "signal column {column} out of range, system has {} columns",
            system.signal_cols()
        )));
    }

    if lambda == 0.0 && !options.non_negative {
        let solution = solve_unpenalized(system)?;
        log::debug!(
            "[lasso] unpenalized direct solve, {} coefficients",
            solution.nrows()
        );
        return Ok(LassoFit {
            coefficients: Coefficients::new(solution.column(column).to_owned()),
            status: LassoStatus::Converged,
            iterations: 0,
            max_update: 0.0,
        });
    }

    let col_sq_norms = column_sq_norms(&system.matrix);
    let (f, status, iterations, max_update) = descend(
        &system.matrix,
        system.signal.column(column),
        &col_sq_norms,
        lambda,
        options,
        warm_start.map(|w| w.view()),
    );
    log::debug!(
        "[lasso] lambda={lambda:.3e} finished after {iterations} sweeps, max update {max_update:.3e}, {:?}",
        status
    );
    Ok(LassoFit {
        coefficients: Coefficients::new(f),
        status,
        iterations,
        max_update,
    })
}

/// Solve the augmented system for every signal column, sharing the design
/// matrix and its column norms across the batch.
pub fn solve_lasso_multi(
    system: &AugmentedSystem,
    lambda: f64,
    options: &SolveOptions,
) -> Result<MultiLassoFit, InversionError> {
    validate_lambda(lambda)?;

    if lambda == 0.0 && !options.non_negative {
        let solution = solve_unpenalized(system)?;
        let cols = solution.ncols();
        return Ok(MultiLassoFit {
            coefficients: solution,
            statuses: vec![LassoStatus::Converged; cols],
            iterations: vec![0; cols],
        });
    }

    let n = system.cols();
    let r = system.signal_cols();
    let col_sq_norms = column_sq_norms(&system.matrix);

    let mut coefficients = Array2::zeros((n, r));
    let mut statuses = Vec::with_capacity(r);
    let mut iterations = Vec::with_capacity(r);
    for (col, rhs) in system.signal.columns().into_iter().enumerate() {
        let (f, status, sweeps, _) =
            descend(&system.matrix, rhs, &col_sq_norms, lambda, options, None);
        coefficients.column_mut(col).assign(&f);
        statuses.push(status);
        iterations.push(sweeps);
    }
    Ok(MultiLassoFit {
        coefficients,
        statuses,
        iterations,
    })
}
