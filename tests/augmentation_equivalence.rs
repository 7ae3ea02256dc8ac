use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use smoothlasso::{AugmentedSystem, DimensionSpec, Grid, build_smoothness_operators};

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

fn random_vector(rng: &mut StdRng, len: usize) -> Array1<f64> {
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array1::from_iter((0..len).map(|_| normal.sample(rng)))
}

/// For any coefficient vector the augmented residual energy must equal the
/// penalized objective exactly: `||K'f - s'||^2 = ||Kf - s||^2 + alpha *
/// sum_i ||J_i f||^2`.
#[test]
fn augmented_energy_equals_penalized_objective_across_grids() {
    let grids = [
        Grid::one_dimensional(6, 1.0, 0.0).unwrap(),
        Grid::new(vec![
            DimensionSpec::new(3, 1.0, 0.0),
            DimensionSpec::new(4, 0.5, -1.0),
        ])
        .unwrap(),
        Grid::new(vec![
            DimensionSpec::new(2, 1.0, 0.0),
            DimensionSpec::new(3, 1.0, 0.0),
            DimensionSpec::new(2, 1.0, 0.0),
        ])
        .unwrap(),
    ];

    for (seed, grid) in grids.iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(1000 + seed as u64);
        let n = grid.num_points();
        let m = n + 3;
        let kernel = random_matrix(&mut rng, m, n);
        let signal = random_matrix(&mut rng, m, 1);
        let f = random_vector(&mut rng, n);
        let alpha = 0.85;

        let operators = build_smoothness_operators(grid);
        let system =
            AugmentedSystem::build(kernel.view(), signal.view(), &operators, alpha).unwrap();

        let residual = &kernel.dot(&f) - &signal.column(0);
        let mut expected: f64 = residual.iter().map(|v| v * v).sum();
        for op in &operators {
            expected += alpha * op.apply(f.view()).iter().map(|v| v * v).sum::<f64>();
        }

        let augmented_residual = &system.matrix.dot(&f) - &system.signal.column(0);
        let energy: f64 = augmented_residual.iter().map(|v| v * v).sum();

        assert!(
            (energy - expected).abs() < 1e-9 * expected.max(1.0),
            "grid {:?}: augmented energy {energy} vs penalized objective {expected}",
            grid.counts()
        );
    }
}

/// The structural Kronecker operators must agree with an explicitly
/// materialized `I ⊗ A ⊗ I` product.
#[test]
fn structural_operators_match_explicit_kronecker_product() {
    fn kron(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
        let (ar, ac) = a.dim();
        let (br, bc) = b.dim();
        let mut out = Array2::zeros((ar * br, ac * bc));
        for i in 0..ar {
            for j in 0..ac {
                for k in 0..br {
                    for l in 0..bc {
                        out[[i * br + k, j * bc + l]] = a[[i, j]] * b[[k, l]];
                    }
                }
            }
        }
        out
    }

    let grid = Grid::new(vec![
        DimensionSpec::new(3, 1.0, 0.0),
        DimensionSpec::new(4, 1.0, 0.0),
    ])
    .unwrap();
    let operators = build_smoothness_operators(&grid);

    let eye3 = Array2::<f64>::eye(3);
    let eye4 = Array2::<f64>::eye(4);
    let expected_j0 = kron(&smoothlasso::first_difference(3), &eye4);
    let expected_j1 = kron(&eye3, &smoothlasso::first_difference(4));

    assert_eq!(operators[0].to_dense(), expected_j0);
    assert_eq!(operators[1].to_dense(), expected_j1);
}
