//! Smoothness operators over the flattened solution grid.
//!
//! Each grid axis gets a first-difference operator expanded to act on the
//! full flattened vector through the Kronecker product
//! `J_i = I_{n_1} ⊗ … ⊗ A_{n_i} ⊗ … ⊗ I_{n_d}`. With row-major flattening
//! the identity factors collapse to two block sizes, so the operator is kept
//! structurally as `(left, count, right)` and only materialized on demand.

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut2};

use crate::types::Grid;

/// Dense first-difference matrix `A` of shape `(count - 1, count)`.
///
/// Row `k` carries `+1` at column `k` and `-1` at column `k + 1`. A
/// single-point axis yields the empty `(0, 1)` operator, contributing no
/// penalty along that dimension.
pub fn first_difference(count: usize) -> Array2<f64> {
    let rows = count.saturating_sub(1);
    let mut a = Array2::zeros((rows, count));
    for k in 0..rows {
        a[[k, k]] = 1.0;
        a[[k, k + 1]] = -1.0;
    }
    a
}

/// Kronecker-expanded first difference along one grid axis.
///
/// `left` is the product of point counts of the slower axes, `right` of the
/// faster axes; `count` is the number of points along the differenced axis
/// itself. Rows therefore number `left * (count - 1) * right`, columns
/// `left * count * right`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifferenceOperator {
    axis: usize,
    left: usize,
    count: usize,
    right: usize,
}

impl DifferenceOperator {
    /// Grid axis this operator differences along.
    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn nrows(&self) -> usize {
        self.left * (self.count - 1) * self.right
    }

    pub fn ncols(&self) -> usize {
        self.left * self.count * self.right
    }

    /// Apply `J` to a flattened vector without materializing the operator.
    pub fn apply(&self, f: ArrayView1<'_, f64>) -> Array1<f64> {
        debug_assert_eq!(f.len(), self.ncols(), "flattened vector length");
        let mut out = Array1::zeros(self.nrows());
        let mut row = 0usize;
        for l in 0..self.left {
            for k in 0..self.count - 1 {
                let base = (l * self.count + k) * self.right;
                for r in 0..self.right {
                    out[row] = f[base + r] - f[base + self.right + r];
                    row += 1;
                }
            }
        }
        out
    }

    /// Write `scale * J` into `dest`, which must already be zeroed and shaped
    /// `(nrows, ncols)`.
    pub(crate) fn write_scaled_into(&self, mut dest: ArrayViewMut2<'_, f64>, scale: f64) {
        debug_assert_eq!(dest.nrows(), self.nrows());
        debug_assert_eq!(dest.ncols(), self.ncols());
        let mut row = 0usize;
        for l in 0..self.left {
            for k in 0..self.count - 1 {
                let base = (l * self.count + k) * self.right;
                for r in 0..self.right {
                    dest[[row, base + r]] = scale;
                    dest[[row, base + self.right + r]] = -scale;
                    row += 1;
                }
            }
        }
    }

    /// Materialize the dense operator.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows(), self.ncols()));
        self.write_scaled_into(dense.view_mut(), 1.0);
        dense
    }
}

/// Build the per-dimension smoothness operator set for `grid`.
///
/// Pure function of the grid: callers cache the result for the lifetime of
/// an inversion session and share it read-only across workers. The number of
/// dimensions is not bounded; the expansion is an iterative fold over the
/// axis counts.
pub fn build_smoothness_operators(grid: &Grid) -> Vec<DifferenceOperator> {
    let counts = grid.counts();
    (0..counts.len())
        .map(|axis| DifferenceOperator {
            axis,
            left: counts[..axis].iter().product(),
            count: counts[axis],
            right: counts[axis + 1..].iter().product(),
        })
        .collect()
}
