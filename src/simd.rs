use std::mem::size_of;

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use wide::*;

use crate::error::{LsmError, Result};
use crate::paths::{worker_rng, GbmStep};

/// Vector type the vectorized pricers operate on. `wide` lowers it to AVX,
/// SSE2 pairs or NEON pairs depending on the target.
pub type Lane = f64x4;

/// Paths simulated per vector instruction.
pub const SIMD_WIDTH: usize = size_of::<Lane>() / size_of::<f64>();

/// Rejects path counts the vectorized pricers cannot split into whole lanes.
pub fn check_simd_width(num_paths: usize) -> Result<()> {
    if num_paths % SIMD_WIDTH != 0 {
        return Err(LsmError::InvalidArgument(format!(
            "num_paths ({num_paths}) must be a multiple of the SIMD width ({SIMD_WIDTH})"
        )));
    }
    Ok(())
}

#[inline(always)]
fn normal_lane<R: Rng + ?Sized>(rng: &mut R) -> Lane {
    let z: [f64; SIMD_WIDTH] = std::array::from_fn(|_| rng.sample(StandardNormal));
    Lane::from(z)
}

#[inline(always)]
fn advance_row<R: Rng + ?Sized>(
    prev: &[Lane],
    cur: &mut [Lane],
    drift: Lane,
    diffusion: Lane,
    rng: &mut R,
) {
    for (next, &price) in cur.iter_mut().zip(prev) {
        *next = price * (drift + diffusion * normal_lane(rng)).exp();
    }
}

/// Splits a time-major matrix into the row for `t - 1` and the row for `t`.
#[inline(always)]
fn row_pair(prices: &mut [Lane], lanes: usize, t: usize) -> (&[Lane], &mut [Lane]) {
    let (before, after) = prices.split_at_mut(t * lanes);
    (&before[(t - 1) * lanes..], &mut after[..lanes])
}

/// Fills a time-major matrix: row `t` holds every path's price at step `t`,
/// packed `SIMD_WIDTH` paths per lane. Normals are drawn row by row.
pub fn simulate_time_major<R: Rng + ?Sized>(
    prices: &mut [Lane],
    spot: f64,
    step: &GbmStep,
    num_steps: usize,
    rng: &mut R,
) {
    let lanes = prices.len() / (num_steps + 1);
    let drift = Lane::splat(step.drift);
    let diffusion = Lane::splat(step.diffusion);

    prices[..lanes].fill(Lane::splat(spot));
    for t in 1..=num_steps {
        let (prev, cur) = row_pair(prices, lanes, t);
        advance_row(prev, cur, drift, diffusion, rng);
    }
}

/// Parallel version of [`simulate_time_major`].
///
/// Each row is split into one block of lanes per pool thread. Block `k` is
/// always advanced by the generator seeded `seed + k`, which persists across
/// time steps, so every path keeps a single random stream.
pub fn simulate_time_major_parallel(
    prices: &mut [Lane],
    spot: f64,
    step: &GbmStep,
    num_steps: usize,
    seed: u64,
) {
    let lanes = prices.len() / (num_steps + 1);
    let drift = Lane::splat(step.drift);
    let diffusion = Lane::splat(step.diffusion);
    let workers = rayon::current_num_threads().max(1);
    let lanes_per_worker = lanes.div_ceil(workers).max(1);
    let mut rngs: Vec<_> = (0..lanes.div_ceil(lanes_per_worker))
        .map(|worker| worker_rng(seed, worker))
        .collect();

    prices[..lanes].fill(Lane::splat(spot));
    for t in 1..=num_steps {
        let (prev, cur) = row_pair(prices, lanes, t);
        cur.par_chunks_mut(lanes_per_worker)
            .zip(prev.par_chunks(lanes_per_worker))
            .zip(rngs.par_iter_mut())
            .for_each(|((cur, prev), rng)| advance_row(prev, cur, drift, diffusion, rng));
    }
}

#[test]
fn width_matches_lane_type() {
    assert_eq!(SIMD_WIDTH, 4);
    assert!(check_simd_width(4096).is_ok());
    assert!(check_simd_width(SIMD_WIDTH).is_ok());
    assert!(matches!(
        check_simd_width(SIMD_WIDTH + 1),
        Err(LsmError::InvalidArgument(_))
    ));
}

#[test]
fn time_major_rows_start_at_spot() {
    use crate::params::AmericanPut;
    use crate::paths::sequential_rng;

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let step = GbmStep::new(&option, 6);
    let lanes = 16 / SIMD_WIDTH;
    let mut sequential = vec![Lane::splat(0.0); lanes * 7];
    let mut parallel = vec![Lane::splat(0.0); lanes * 7];
    simulate_time_major(&mut sequential, option.spot, &step, 6, &mut sequential_rng(1));
    simulate_time_major_parallel(&mut parallel, option.spot, &step, 6, 1);

    for prices in [&sequential, &parallel] {
        let flat: &[f64] = bytemuck::cast_slice(prices);
        assert!(flat[..16].iter().all(|&s| s == 36.0));
        assert!(flat[16..].iter().all(|&s| s > 0.0 && s.is_finite() && s != 36.0));
    }
}

#[test]
fn lanes_follow_scalar_formula() {
    use crate::params::AmericanPut;
    use crate::paths::sequential_rng;

    // The same normals, consumed in the same order, give the same prices
    // whether advanced lane-wise or one path at a time.
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let step = GbmStep::new(&option, 3);
    let mut lanes = vec![Lane::splat(0.0); 2 * 4];
    simulate_time_major(&mut lanes, option.spot, &step, 3, &mut sequential_rng(11));
    let flat: &[f64] = bytemuck::cast_slice(&lanes);

    let mut rng = sequential_rng(11);
    let mut expected = [option.spot; 8];
    for t in 1..=3 {
        for (path, price) in expected.iter_mut().enumerate() {
            let z: f64 = rng.sample(StandardNormal);
            *price = step.advance(*price, z);
            approx::assert_relative_eq!(flat[t * 8 + path], *price, max_relative = 1e-9);
        }
    }
}
