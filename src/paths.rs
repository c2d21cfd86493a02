use rand::rngs::StdRng;
use rand::Rng;
use rand_core::SeedableRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::params::AmericanPut;

/// Exact lognormal step of geometric Brownian motion over one grid interval:
/// `S[t] = S[t-1] * exp((r - sigma^2 / 2) dt + sigma sqrt(dt) Z)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbmStep {
    pub dt: f64,
    pub drift: f64,
    pub diffusion: f64,
}

impl GbmStep {
    pub fn new(option: &AmericanPut, num_steps: usize) -> Self {
        let dt = option.years_to_expiry / num_steps as f64;
        let volatility = option.volatility;
        Self {
            dt,
            drift: (option.risk_free_rate - 0.5 * volatility * volatility) * dt,
            diffusion: volatility * dt.sqrt(),
        }
    }

    #[inline(always)]
    pub fn advance(&self, price: f64, z: f64) -> f64 {
        price * (self.drift + self.diffusion * z).exp()
    }
}

/// Generator used by the sequential variants.
pub fn sequential_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Generator owned by parallel worker `worker`, seeded `seed + worker`.
pub fn worker_rng(seed: u64, worker: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(worker as u64))
}

/// Fills a path-major matrix (`num_steps + 1` contiguous prices per path),
/// drawing normals path by path, step by step.
pub fn simulate_path_major<R: Rng + ?Sized>(
    prices: &mut [f64],
    spot: f64,
    step: &GbmStep,
    num_steps: usize,
    rng: &mut R,
) {
    for path in prices.chunks_exact_mut(num_steps + 1) {
        path[0] = spot;
        for t in 1..=num_steps {
            let z: f64 = rng.sample(StandardNormal);
            path[t] = step.advance(path[t - 1], z);
        }
    }
}

/// Parallel version of [`simulate_path_major`].
///
/// Paths are split into one contiguous block per pool thread; block `k` is
/// simulated with [`worker_rng`]`(seed, k)`. Results are reproducible for a
/// fixed pool size.
pub fn simulate_path_major_parallel(
    prices: &mut [f64],
    spot: f64,
    step: &GbmStep,
    num_steps: usize,
    seed: u64,
) {
    let stride = num_steps + 1;
    let num_paths = prices.len() / stride;
    let workers = rayon::current_num_threads().max(1);
    let paths_per_worker = num_paths.div_ceil(workers).max(1);

    prices
        .par_chunks_mut(paths_per_worker * stride)
        .enumerate()
        .for_each(|(worker, block)| {
            let mut rng = worker_rng(seed, worker);
            simulate_path_major(block, spot, step, num_steps, &mut rng);
        });
}

#[cfg(test)]
fn test_log_return_moments(parallel: bool, samples: usize, diff_limit: f64) {
    let option = AmericanPut::new(100.0, 100.0, 1.0, 0.05, 0.25);
    let num_steps = 4;
    let step = GbmStep::new(&option, num_steps);
    let mut prices = vec![0.0; samples * (num_steps + 1)];

    if parallel {
        simulate_path_major_parallel(&mut prices, option.spot, &step, num_steps, 7);
    } else {
        simulate_path_major(&mut prices, option.spot, &step, num_steps, &mut sequential_rng(7));
    }

    let log_returns: Vec<f64> = prices
        .chunks_exact(num_steps + 1)
        .map(|path| (path[num_steps] / path[0]).ln())
        .collect();
    let mean = log_returns.iter().sum::<f64>() / samples as f64;
    let variance = log_returns.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples as f64;

    // ln(S_T / S_0) ~ N((r - sigma^2 / 2) T, sigma^2 T)
    let expected_mean = (0.05 - 0.5 * 0.25 * 0.25) * 1.0;
    let expected_variance = 0.25 * 0.25 * 1.0;
    let mean_difference = (mean - expected_mean).abs();
    let variance_difference = (variance - expected_variance).abs();

    assert!(
        mean_difference <= diff_limit,
        "Mean difference was more than {diff_limit:.5}: {mean_difference:.5}. \
         Expected mean: {expected_mean:.6}, actual mean: {mean:.6}"
    );
    assert!(
        variance_difference <= diff_limit,
        "Variance difference was more than {diff_limit:.5}: {variance_difference:.5}. \
         Expected variance: {expected_variance:.6}, actual variance: {variance:.6}"
    );
}

#[test]
fn log_returns_sequential_100000() {
    test_log_return_moments(false, 100_000, 0.005);
}

#[test]
fn log_returns_parallel_100000() {
    test_log_return_moments(true, 100_000, 0.005);
}

#[test]
fn first_column_is_spot() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let step = GbmStep::new(&option, 10);
    let mut prices = vec![0.0; 64 * 11];
    simulate_path_major_parallel(&mut prices, option.spot, &step, 10, 42);

    assert!(prices.chunks_exact(11).all(|path| path[0] == 36.0));
    assert!(prices.iter().all(|&s| s > 0.0 && s.is_finite()));
}

#[test]
fn same_seed_same_paths() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let step = GbmStep::new(&option, 5);
    let mut first = vec![0.0; 32 * 6];
    let mut second = vec![0.0; 32 * 6];
    simulate_path_major(&mut first, option.spot, &step, 5, &mut sequential_rng(3));
    simulate_path_major(&mut second, option.spot, &step, 5, &mut sequential_rng(3));
    assert_eq!(first, second);

    simulate_path_major_parallel(&mut first, option.spot, &step, 5, 3);
    simulate_path_major_parallel(&mut second, option.spot, &step, 5, 3);
    assert_eq!(first, second);
}
