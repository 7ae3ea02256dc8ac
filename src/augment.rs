//! Assembly of the augmented least-squares system.
//!
//! Stacking the kernel on top of each `sqrt(alpha) * J_i` folds the summed
//! smoothness penalties into extra rows of an ordinary design matrix:
//! `Σ ‖√α J_i f‖² = ‖[√α J_1; …; √α J_d] f‖²`, so the combined objective
//! `‖Kf − s‖² + α Σ ‖J_i f‖² + λ‖f‖₁` reduces exactly to an L1-only
//! penalized least squares on the augmented pair.

use ndarray::{Array2, ArrayView2, s};

use crate::error::InversionError;
use crate::operators::DifferenceOperator;

/// The stacked design matrix and zero-padded signal. Solution equivalence
/// with the unstacked objective is exact.
#[derive(Debug, Clone)]
pub struct AugmentedSystem {
    /// `(m + Σ rows(J_i), n)` stacked design matrix.
    pub matrix: Array2<f64>,
    /// `(m + Σ rows(J_i), r)` signal with zero rows under the penalty block.
    pub signal: Array2<f64>,
    data_rows: usize,
}

impl AugmentedSystem {
    /// Stack `kernel` over each `sqrt(alpha) * J_i` and zero-pad `signal`.
    ///
    /// All shape agreements are validated before any allocation: the kernel
    /// and signal must share their row count, and every operator must act on
    /// exactly the kernel's column space.
    pub fn build(
        kernel: ArrayView2<'_, f64>,
        signal: ArrayView2<'_, f64>,
        operators: &[DifferenceOperator],
        alpha: f64,
    ) -> Result<Self, InversionError> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(InversionError::InvalidHyperparameter(format!(
                "alpha must be finite and non-negative, got {alpha}"
            )));
        }
        let (m, n) = kernel.dim();
        if signal.nrows() != m {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel has {m} rows but the signal has {} rows",
                signal.nrows()
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

        let penalty_rows: usize = operators.iter().map(DifferenceOperator::nrows).sum();
        let sqrt_alpha = alpha.sqrt();

        let mut matrix = Array2::zeros((m + penalty_rows, n));
        matrix.slice_mut(s![..m, ..]).assign(&kernel);
        let mut offset = m;
        for op in operators {
            let rows = op.nrows();
            op.write_scaled_into(matrix.slice_mut(s![offset..offset + rows, ..]), sqrt_alpha);
            offset += rows;
        }

        let mut padded = Array2::zeros((m + penalty_rows, signal.ncols()));
        padded.slice_mut(s![..m, ..]).assign(&signal);

        Ok(Self {
            matrix,
            signal: padded,
            data_rows: m,
        })
    }

    /// Number of measurement rows (the kernel's row count, before padding).
    pub fn data_rows(&self) -> usize {
        self.data_rows
    }

    /// Total row count of the augmented system.
    pub fn rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of grid points.
    pub fn cols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Number of independent right-hand sides.
    pub fn signal_cols(&self) -> usize {
        self.signal.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::build_smoothness_operators;
    use crate::types::{DimensionSpec, Grid};
    use ndarray::{Array1, Array2, Axis};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut out = Array2::zeros((rows, cols));
        for i in 0..rows {
            for j in 0..cols {
                out[[i, j]] = normal.sample(rng);
            }
        }
        out
    }

    #[test]
    fn augmentation_preserves_penalized_energy() {
        let mut rng = StdRng::seed_from_u64(7);
        let grid = Grid::new(vec![
            DimensionSpec::new(3, 1.0, 0.0),
            DimensionSpec::new(4, 1.0, 0.0),
        ])
        .unwrap();
        let n = grid.num_points();
        let m = 9;
        let alpha = 0.37;

        let kernel = random_matrix(&mut rng, m, n);
        let signal = random_matrix(&mut rng, m, 1);
        let f = random_matrix(&mut rng, n, 1).remove_axis(Axis(1));
        let operators = build_smoothness_operators(&grid);

        let system =
            AugmentedSystem::build(kernel.view(), signal.view(), &operators, alpha).unwrap();

        let s_col = signal.column(0);
        let residual = &kernel.dot(&f) - &s_col;
        let mut expected: f64 = residual.iter().map(|v| v * v).sum();
        for op in &operators {
            expected += alpha * op.apply(f.view()).iter().map(|v| v * v).sum::<f64>();
        }

        let aug_residual = &system.matrix.dot(&f) - &system.signal.column(0);
        let energy: f64 = aug_residual.iter().map(|v| v * v).sum();

        assert!(
            (energy - expected).abs() < 1e-10 * expected.max(1.0),
            "augmented energy {energy} differs from penalized energy {expected}"
        );
    }

    #[test]
    fn augmented_shapes_account_for_every_operator() {
        let grid = Grid::new(vec![
            DimensionSpec::new(3, 1.0, 0.0),
            DimensionSpec::new(3, 1.0, 0.0),
        ])
        .unwrap();
        let operators = build_smoothness_operators(&grid);
        let kernel = Array2::<f64>::zeros((5, 9));
        let signal = Array2::<f64>::zeros((5, 2));

        let system =
            AugmentedSystem::build(kernel.view(), signal.view(), &operators, 1.0).unwrap();
        // Each 3x3 operator contributes 2 * 3 = 6 rows.
        assert_eq!(system.rows(), 5 + 6 + 6);
        assert_eq!(system.cols(), 9);
        assert_eq!(system.signal_cols(), 2);
        assert_eq!(system.data_rows(), 5);

        // Padding rows are exactly zero.
        for i in 5..system.rows() {
            assert_eq!(system.signal[[i, 0]], 0.0);
            assert_eq!(system.signal[[i, 1]], 0.0);
        }
    }

    #[test]
    fn zero_alpha_keeps_penalty_rows_but_zeroes_them() {
        let grid = Grid::one_dimensional(4, 1.0, 0.0).unwrap();
        let operators = build_smoothness_operators(&grid);
        let kernel = Array2::<f64>::eye(4);
        let signal = Array1::<f64>::ones(4).insert_axis(Axis(1));

        let system =
            AugmentedSystem::build(kernel.view(), signal.view(), &operators, 0.0).unwrap();
        assert_eq!(system.rows(), 4 + 3);
        for i in 4..system.rows() {
            for j in 0..4 {
                assert_eq!(system.matrix[[i, j]], 0.0);
            }
        }
    }

    #[test]
    fn mismatched_shapes_are_rejected_before_allocation() {
        let grid = Grid::one_dimensional(4, 1.0, 0.0).unwrap();
        let operators = build_smoothness_operators(&grid);

        let kernel = Array2::<f64>::zeros((5, 4));
        let short_signal = Array2::<f64>::zeros((4, 1));
        assert!(matches!(
            AugmentedSystem::build(kernel.view(), short_signal.view(), &operators, 1.0),
            Err(InversionError::DimensionMismatch(_))
        ));

        let wide_kernel = Array2::<f64>::zeros((5, 6));
        let signal = Array2::<f64>::zeros((5, 1));
        assert!(matches!(
            AugmentedSystem::build(wide_kernel.view(), signal.view(), &operators, 1.0),
            Err(InversionError::DimensionMismatch(_))
        ));

        assert!(matches!(
            AugmentedSystem::build(kernel.view(), signal.view(), &operators, -0.5),
            Err(InversionError::InvalidHyperparameter(_))
        ));
    }
}
