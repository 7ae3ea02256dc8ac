//! Inversion facade: sequencing and shape bookkeeping around the operator
//! builder, system augmenter, solver, and cross-validation controller.
//!
//! The signal is normalized by its Euclidean norm before solving and the
//! coefficients rescaled afterwards, so solver tolerances and `lambda`
//! scales are comparable across datasets of different magnitude.

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

use crate::augment::AugmentedSystem;
use crate::cv::{self, FoldPlan, ScoreSurface};
use crate::error::InversionError;
use crate::linalg::fast_av;
use crate::operators::build_smoothness_operators;
use crate::solver::{LassoStatus, solve_lasso, solve_lasso_multi};
use crate::types::{Coefficients, CvOptions, Grid, HyperParams, SolveOptions};

/// A solved inversion: the flattened coefficient vector together with the
/// grid it lives on and the hyperparameters that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InversionFit {
    pub grid: Grid,
    pub coefficients: Coefficients,
    pub hyperparams: HyperParams,
    pub status: LassoStatus,
    pub iterations: usize,
}

impl InversionFit {
    /// The solution reshaped to the grid's d-dimensional shape, row-major,
    /// first grid dimension slowest.
    pub fn distribution(&self) -> ArrayD<f64> {
        let counts = self.grid.counts();
        ArrayD::from_shape_vec(IxDyn(&counts), self.coefficients.to_vec())
            .expect("grid shape matches coefficient length by construction")
    }

    /// Forward-model prediction `K f` for a kernel sharing this fit's
    /// column space.
    pub fn predict(&self, kernel: ArrayView2<'_, f64>) -> Result<Array1<f64>, InversionError> {
        if kernel.ncols() != self.coefficients.len() {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel has {} columns but the fit holds {} coefficients",
                kernel.ncols(),
                self.coefficients.len()
            )));
        }
        Ok(fast_av(&kernel, &self.coefficients.0))
    }

    /// Residual `s - K f` against a measured signal.
    pub fn residuals(
        &self,
        kernel: ArrayView2<'_, f64>,
        signal: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, InversionError> {
        if kernel.nrows() != signal.len() {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel has {} rows but the signal has {} entries",
                kernel.nrows(),
                signal.len()
            )));
        }
        let prediction = self.predict(kernel)?;
        Ok(&signal - &prediction)
    }
}

/// A batched inversion over several independent spectra sharing one kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiInversionFit {
    pub grid: Grid,
    /// One coefficient column per spectrum, shape `(n, r)`.
    pub coefficients: Array2<f64>,
    pub hyperparams: HyperParams,
    pub statuses: Vec<LassoStatus>,
}

impl MultiInversionFit {
    /// The reshaped distribution for spectrum `column`.
    pub fn distribution(&self, column: usize) -> ArrayD<f64> {
        let counts = self.grid.counts();
        ArrayD::from_shape_vec(IxDyn(&counts), self.coefficients.column(column).to_vec())
            .expect("grid shape matches coefficient length by construction")
    }

    /// Forward-model predictions `K F`, one column per spectrum.
    pub fn predict(&self, kernel: ArrayView2<'_, f64>) -> Result<Array2<f64>, InversionError> {
        if kernel.ncols() != self.coefficients.nrows() {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel has {} columns but the fit holds {} coefficients",
                kernel.ncols(),
                self.coefficients.nrows()
            )));
        }
        Ok(kernel.dot(&self.coefficients))
    }
}

/// Result of a cross-validated fit: the winning pair, the full score
/// surface, and a refit on the complete data at that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvFit {
    pub selected: HyperParams,
    /// Indices of the winner on the (alphas, lambdas) scan axes.
    pub selected_indices: (usize, usize),
    pub surface: ScoreSurface,
    pub fit: InversionFit,
}

/// Euclidean norm of the signal block, used to normalize before solving.
fn signal_scale(signal: ArrayView2<'_, f64>) -> f64 {
    signal.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn validate_inputs(
    kernel: ArrayView2<'_, f64>,
    signal_rows: usize,
    grid: &Grid,
) -> Result<(), InversionError> {
    grid.validate_flattened_len(kernel.ncols())?;
    if kernel.nrows() != signal_rows {
        return Err(InversionError::DimensionMismatch(format!(
            "kernel has {} rows but the signal has {signal_rows} rows",
            kernel.nrows()
        )));
    }
    Ok(())
}

/// Direct solve at a fixed hyperparameter pair.
pub fn fit(
    kernel: ArrayView2<'_, f64>,
    signal: ArrayView1<'_, f64>,
    grid: &Grid,
    params: HyperParams,
    options: &SolveOptions,
) -> Result<InversionFit, InversionError> {
    params.validate()?;
    validate_inputs(kernel, signal.len(), grid)?;

    let signal = signal.insert_axis(Axis(1));
    let scale = signal_scale(signal);
    let normalized = if scale > 0.0 {
        signal.to_owned() / scale
    } else {
        signal.to_owned()
    };
    let signal_view = normalized.view();

    let operators = build_smoothness_operators(grid);
    let system = AugmentedSystem::build(kernel, signal_view, &operators, params.alpha)?;
    let mut lasso = solve_lasso(&system, params.lambda, options)?;
    if lasso.status == LassoStatus::MaxIterationsReached {
        log::warn!(
            "[fit] solver stopped at the iteration budget ({} sweeps, max update {:.3e})",
            lasso.iterations,
            lasso.max_update
        );
    }
    if scale > 0.0 {
        lasso.coefficients.0 *= scale;
    }

    Ok(InversionFit {
        grid: grid.clone(),
        coefficients: lasso.coefficients,
        hyperparams: params,
        status: lasso.status,
        iterations: lasso.iterations,
    })
}

/// Direct solve for several independent spectra sharing one kernel.
pub fn fit_multi(
    kernel: ArrayView2<'_, f64>,
    signal: ArrayView2<'_, f64>,
    grid: &Grid,
    params: HyperParams,
    options: &SolveOptions,
) -> Result<MultiInversionFit, InversionError> {
    params.validate()?;
    validate_inputs(kernel, signal.nrows(), grid)?;
    if signal.ncols() == 0 {
        return Err(InversionError::DimensionMismatch(
            "signal has no columns".into(),
        ));
    }

    let scale = signal_scale(signal);
    let normalized = if scale > 0.0 {
        signal.to_owned() / scale
    } else {
        signal.to_owned()
    };
    let signal_view = normalized.view();

    let operators = build_smoothness_operators(grid);
    let system = AugmentedSystem::build(kernel, signal_view, &operators, params.alpha)?;
    let mut lasso = solve_lasso_multi(&system, params.lambda, options)?;
    if scale > 0.0 {
        lasso.coefficients *= scale;
    }

    Ok(MultiInversionFit {
        grid: grid.clone(),
        coefficients: lasso.coefficients,
        hyperparams: params,
        statuses: lasso.statuses,
    })
}

/// Cross-validated fit: sweep the scan grids, select the winning pair, and
/// refit on the full data at that pair.
///
/// The cancellation flag is checked between grid cells; an interrupted
/// search aborts with [`InversionError::Cancelled`]. Callers that need the
/// partial score surface of an interrupted sweep drive [`cv::search`]
/// directly.
pub fn fit_with_cv(
    kernel: ArrayView2<'_, f64>,
    signal: ArrayView1<'_, f64>,
    grid: &Grid,
    alphas: &[f64],
    lambdas: &[f64],
    options: &CvOptions,
    cancel: Option<&AtomicBool>,
) -> Result<CvFit, InversionError> {
    validate_inputs(kernel, signal.len(), grid)?;

    let signal_matrix = signal.insert_axis(Axis(1));
    let scale = signal_scale(signal_matrix);
    let normalized = if scale > 0.0 {
        signal_matrix.to_owned() / scale
    } else {
        signal_matrix.to_owned()
    };
    let signal_view = normalized.view();

    let alphas = Array1::from(alphas.to_vec());
    let lambdas = Array1::from(lambdas.to_vec());
    let plan = FoldPlan::from_options(kernel.nrows(), options)?;
    let operators = build_smoothness_operators(grid);

    let outcome = cv::search(
        kernel,
        signal_view,
        &operators,
        alphas.view(),
        lambdas.view(),
        &plan,
        options,
        cancel,
    )?;
    if outcome.cancelled {
        return Err(InversionError::Cancelled {
            completed: outcome.evaluated_pairs,
            total: alphas.len() * lambdas.len(),
        });
    }

    let selector: fn(&ScoreSurface) -> Option<(usize, usize)> = if options.one_std_err_rule {
        ScoreSurface::select_one_std_err
    } else {
        ScoreSurface::select_minimum
    };
    let Some((alpha_idx, lambda_idx)) = selector(&outcome.surface) else {
        return Err(InversionError::SolverDidNotConverge(format!(
            "every cell of the {}x{} score surface is missing; no hyperparameter pair can be selected",
            alphas.len(),
            lambdas.len()
        )));
    };
    let selected = HyperParams::new(alphas[alpha_idx], lambdas[lambda_idx])?;
    log::info!(
        "[cv] selected alpha={:.3e}, lambda={:.3e} ({} missing cells)",
        selected.alpha,
        selected.lambda,
        outcome.surface.missing_cells().len()
    );

    let refit = fit(kernel, signal, grid, selected, &options.solve)?;

    Ok(CvFit {
        selected,
        selected_indices: (alpha_idx, lambda_idx),
        surface: outcome.surface,
        fit: refit,
    })
}
