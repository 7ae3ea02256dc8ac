//! # smoothlasso
//!
//! Regularized inversion engine recovering a smooth, sparse distribution of
//! physical tensor parameters from a measured spectrum. A kernel matrix and
//! signal supplied by an external forward simulator are combined with
//! Kronecker-structured first-difference operators over an n-dimensional
//! solution grid; the resulting augmented least-squares system carries the
//! data-fit, smoothness (L2), and sparsity (L1) penalties and is solved by
//! cyclic coordinate descent. k-fold cross-validation over a grid of
//! (smoothness, sparsity) weights selects the hyperparameters.
//!
//! The facade in [`model`] covers the common workflows:
//!
//! - [`model::fit`]: direct solve at a fixed `(alpha, lambda)` pair,
//! - [`model::fit_with_cv`]: hyperparameter search, then refit on the full
//!   data at the winning pair,
//! - [`InversionFit::predict`] and [`InversionFit::residuals`] for
//!   diagnostics.

pub mod augment;
pub mod cv;
pub mod error;
pub mod linalg;
pub mod model;
pub mod operators;
pub mod solver;
pub mod types;

pub use augment::AugmentedSystem;
pub use cv::{FoldPlan, ScoreSurface, SearchOutcome, search};
pub use error::InversionError;
pub use model::{CvFit, InversionFit, MultiInversionFit, fit, fit_multi, fit_with_cv};
pub use operators::{DifferenceOperator, build_smoothness_operators, first_difference};
pub use solver::{
    LassoFit, LassoStatus, MultiLassoFit, soft_threshold, solve_lasso, solve_lasso_from,
    solve_lasso_multi,
};
pub use types::{Coefficients, CvOptions, DimensionSpec, Grid, HyperParams, SolveOptions};
