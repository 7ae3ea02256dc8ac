use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use smoothlasso::{CvOptions, Grid, fit_with_cv};

const SPIKES: [(usize, f64); 2] = [(3, 1.0), (8, 0.7)];

/// Two largest-magnitude entries of a coefficient vector, in index order.
fn top_two_support(coefficients: &Array1<f64>) -> [usize; 2] {
    let mut indexed: Vec<(usize, f64)> = coefficients
        .iter()
        .enumerate()
        .map(|(i, &v)| (i, v.abs()))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    let mut support = [indexed[0].0, indexed[1].0];
    support.sort_unstable();
    support
}

/// Synthetic sparse ground truth with two nonzero entries plus Gaussian
/// noise on the signal: the cross-validated fit must place its two largest
/// coefficients on the true support in the large majority of noise
/// realizations.
#[test]
fn cv_selected_fit_recovers_the_sparse_support_across_noise_seeds() {
    let n = 12;
    let m = 24;
    let grid = Grid::one_dimensional(n, 1.0, 0.0).unwrap();

    // One fixed, well-conditioned random kernel shared by every trial.
    let mut kernel_rng = StdRng::seed_from_u64(314159);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut kernel = Array2::zeros((m, n));
    for i in 0..m {
        for j in 0..n {
            kernel[[i, j]] = normal.sample(&mut kernel_rng);
        }
    }

    let mut truth = Array1::zeros(n);
    for (index, amplitude) in SPIKES {
        truth[index] = amplitude;
    }
    let clean = kernel.dot(&truth);

    let alphas = [1e-8, 1e-4];
    let lambdas = [1e-4, 1e-3, 1e-2];
    let options = CvOptions {
        folds: 6,
        ..CvOptions::default()
    };

    let trials = 5;
    let mut successes = 0;
    for seed in 0..trials {
        let mut noise_rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.02).unwrap();
        let signal = &clean + &Array1::from_iter((0..m).map(|_| noise.sample(&mut noise_rng)));

        let result = fit_with_cv(
            kernel.view(),
            signal.view(),
            &grid,
            &alphas,
            &lambdas,
            &options,
            None,
        )
        .unwrap();

        let support = top_two_support(&result.fit.coefficients);
        if support == [SPIKES[0].0, SPIKES[1].0] {
            successes += 1;
        }
    }

    assert!(
        successes >= trials - 1,
        "support recovered in only {successes} of {trials} noise realizations"
    );
}
