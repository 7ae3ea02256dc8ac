use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use crate::error::InversionError;

/// One axis of the inversion grid: a uniformly spaced coordinate dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Number of grid points along this axis.
    pub count: usize,
    /// Distance between adjacent grid points.
    pub spacing: f64,
    /// Coordinate of the first grid point.
    pub origin: f64,
}

impl DimensionSpec {
    pub fn new(count: usize, spacing: f64, origin: f64) -> Self {
        Self {
            count,
            spacing,
            origin,
        }
    }

    /// Coordinate of grid point `index` along this axis.
    pub fn coordinate(&self, index: usize) -> f64 {
        self.origin + self.spacing * index as f64
    }
}

/// The ordered d-dimensional solution grid over which the unknown
/// distribution is represented as a flattened coefficient vector.
///
/// Flattening order is row-major (C order): the first dimension varies
/// slowest, the last dimension fastest. The columns of any kernel matrix
/// supplied to the engine, and the Kronecker expansion of the smoothness
/// operators, both follow this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    dims: Vec<DimensionSpec>,
}

impl Grid {
    /// Build a grid from dimension specs. Fails if the list is empty or any
    /// dimension has zero points.
    pub fn new(dims: Vec<DimensionSpec>) -> Result<Self, InversionError> {
        if dims.is_empty() {
            return Err(InversionError::InvalidGrid(
                "grid must have at least one dimension".into(),
            ));
        }
        for (axis, dim) in dims.iter().enumerate() {
            if dim.count < 1 {
                return Err(InversionError::InvalidGrid(format!(
                    "dimension {axis} has count {}, expected at least 1",
                    dim.count
                )));
            }
        }
        Ok(Self { dims })
    }

    /// Convenience constructor for a 1D grid.
    pub fn one_dimensional(count: usize, spacing: f64, origin: f64) -> Result<Self, InversionError> {
        Self::new(vec![DimensionSpec::new(count, spacing, origin)])
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[DimensionSpec] {
        &self.dims
    }

    /// Point counts per axis, slowest-varying first.
    pub fn counts(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.count).collect()
    }

    /// Total number of grid points, i.e. the flattened solution length.
    pub fn num_points(&self) -> usize {
        self.dims.iter().map(|d| d.count).product()
    }

    /// Check that a flattened vector of length `n` is compatible with this
    /// grid's declared point counts.
    pub fn validate_flattened_len(&self, n: usize) -> Result<(), InversionError> {
        let expected = self.num_points();
        if expected != n {
            return Err(InversionError::InvalidGrid(format!(
                "grid declares {expected} points (counts {:?}) but the flattened solution has length {n}",
                self.counts()
            )));
        }
        Ok(())
    }
}

/// Flattened solution vector produced by the solver.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coefficients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<Array1<f64>> for Coefficients {
    fn as_ref(&self) -> &Array1<f64> {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}

/// Smoothness weight `alpha` and sparsity weight `lambda`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    /// Scales the combined smoothness (L2) penalty.
    pub alpha: f64,
    /// Scales the sparsity (L1) penalty.
    pub lambda: f64,
}

impl HyperParams {
    pub fn new(alpha: f64, lambda: f64) -> Result<Self, InversionError> {
        let params = Self { alpha, lambda };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), InversionError> {
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(InversionError::InvalidHyperparameter(format!(
                "alpha must be finite and non-negative, got {}",
                self.alpha
            )));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(InversionError::InvalidHyperparameter(format!(
                "lambda must be finite and non-negative, got {}",
                self.lambda
            )));
        }
        Ok(())
    }
}

fn default_max_iterations() -> usize {
    10_000
}

fn default_tolerance() -> f64 {
    1e-5
}

/// Solver configuration for a single regularized solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Maximum number of full coordinate sweeps.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Convergence tolerance on the largest coefficient update per sweep.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Constrain the solution to non-negative amplitudes.
    #[serde(default)]
    pub non_negative: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            non_negative: false,
        }
    }
}

fn default_folds() -> usize {
    10
}

fn default_retries() -> usize {
    2
}

/// Cross-validation configuration for the hyperparameter search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvOptions {
    /// Number of folds the observations are partitioned into.
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Shuffle observations before assigning folds. Off by default, which
    /// keeps the fold layout a pure function of the observation count.
    #[serde(default)]
    pub shuffle: bool,
    /// Seed for the fold shuffle; ignored unless `shuffle` is set.
    #[serde(default)]
    pub seed: u64,
    /// Select the most regularized pair within one standard error of the
    /// minimum instead of the pure minimum.
    #[serde(default)]
    pub one_std_err_rule: bool,
    /// Known noise standard deviation. The prediction-error score is
    /// compensated as `|score - sigma^2|` before selection.
    #[serde(default)]
    pub sigma: f64,
    /// Retry budget for non-convergent cells, each retry doubling the
    /// iteration budget and relaxing the tolerance tenfold.
    #[serde(default = "default_retries")]
    pub retries: usize,
    /// Per-cell solver configuration.
    #[serde(default)]
    pub solve: SolveOptions,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            folds: default_folds(),
            shuffle: false,
            seed: 0,
            one_std_err_rule: false,
            sigma: 0.0,
            retries: default_retries(),
            solve: SolveOptions::default(),
        }
    }
}
