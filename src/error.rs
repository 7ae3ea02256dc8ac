use thiserror::Error;

use crate::linalg::LinalgError;

/// A comprehensive error type for the inversion pipeline.
///
/// Input-validation failures (`InvalidGrid`, `DimensionMismatch`,
/// `InvalidHyperparameter`, `EmptyFold`) are detected before any numeric work
/// begins and surface immediately. Solver non-convergence is recoverable at
/// the cross-validation level (retried, then the affected cell is marked
/// missing) and only becomes `SolverDidNotConverge` when no usable result
/// remains for the requested operation.
#[derive(Error)]
pub enum InversionError {
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("solver did not converge: {0}")]
    SolverDidNotConverge(String),

    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("cannot split {observations} observations into {folds} folds")]
    EmptyFold { observations: usize, folds: usize },

    #[error("hyperparameter search cancelled after {completed} of {total} grid cells")]
    Cancelled { completed: usize, total: usize },

    #[error("linear algebra failure: {0}")]
    Linalg(#[from] LinalgError),
}

// Ensure Debug prints with actual line breaks by delegating to Display
impl core::fmt::Debug for InversionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}
