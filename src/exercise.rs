//! Backward induction over the exercise dates and the final payoff average.
//!
//! Written once for every pricer variant. The variants only differ in how
//! the price and cash-flow matrices are laid out in memory, which the
//! [`Layout`] parameter abstracts away.

use rayon::prelude::*;
use tracing::trace;

use crate::arena::Arena;
use crate::error::Result;
use crate::params::AmericanPut;
use crate::regression::fit_quadratic;

/// Maps `(path, time step)` to an offset into a flattened matrix.
pub trait Layout: Copy + Send + Sync {
    fn new(num_paths: usize, num_steps: usize) -> Self;
    fn index(self, path: usize, t: usize) -> usize;
}

/// One row per path: every time step of a path is contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMajor {
    stride: usize,
}

impl Layout for PathMajor {
    fn new(_num_paths: usize, num_steps: usize) -> Self {
        Self {
            stride: num_steps + 1,
        }
    }

    #[inline(always)]
    fn index(self, path: usize, t: usize) -> usize {
        path * self.stride + t
    }
}

/// One row per time step: every path at a given step is contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMajor {
    stride: usize,
}

impl Layout for TimeMajor {
    fn new(num_paths: usize, _num_steps: usize) -> Self {
        Self { stride: num_paths }
    }

    #[inline(always)]
    fn index(self, path: usize, t: usize) -> usize {
        t * self.stride + path
    }
}

/// Dimensions of the simulation grid plus the discounting inputs.
#[derive(Debug, Clone, Copy)]
pub struct Grid<L> {
    pub layout: L,
    pub num_paths: usize,
    pub num_steps: usize,
    pub dt: f64,
    pub rate: f64,
}

impl<L: Layout> Grid<L> {
    pub fn new(num_paths: usize, num_steps: usize, dt: f64, rate: f64) -> Self {
        Self {
            layout: L::new(num_paths, num_steps),
            num_paths,
            num_steps,
            dt,
            rate,
        }
    }

    #[inline(always)]
    fn at(&self, path: usize, t: usize) -> usize {
        self.layout.index(path, t)
    }

    /// Discount factor over `steps` grid intervals.
    #[inline(always)]
    fn discount(&self, steps: usize) -> f64 {
        (-self.rate * steps as f64 * self.dt).exp()
    }

    /// First realized cash flow of `path` after step `t`, discounted back to
    /// `t`; zero when the path has none.
    #[inline]
    pub fn discounted_future(&self, cash_flows: &[f64], path: usize, t: usize) -> f64 {
        for j in t + 1..=self.num_steps {
            let cash_flow = cash_flows[self.at(path, j)];
            if cash_flow > 0.0 {
                return cash_flow * self.discount(j - t);
            }
        }
        0.0
    }

    /// Value of `path` at inception: its first realized cash flow discounted
    /// to time zero.
    #[inline]
    pub fn path_payoff(&self, cash_flows: &[f64], path: usize) -> f64 {
        for j in 1..=self.num_steps {
            let cash_flow = cash_flows[self.at(path, j)];
            if cash_flow > 0.0 {
                return cash_flow * self.discount(j);
            }
        }
        0.0
    }
}

/// Scratch vectors for the in-the-money set of one time step: path indices,
/// their prices and their discounted future cash flows. Sized for the worst
/// case (every path in the money) and refilled at every step.
#[derive(Debug)]
pub struct WorkingSet<'a> {
    pub paths: &'a mut [u32],
    pub prices: &'a mut [f64],
    pub future: &'a mut [f64],
}

impl<'a> WorkingSet<'a> {
    pub fn from_arena(arena: &'a Arena, num_paths: usize) -> Result<Self> {
        Ok(Self {
            paths: arena.alloc_slice(num_paths)?,
            prices: arena.alloc_slice(num_paths)?,
            future: arena.alloc_slice(num_paths)?,
        })
    }
}

/// Heap-backed storage for a [`WorkingSet`].
#[derive(Debug, Default)]
pub struct WorkingBuffers {
    paths: Vec<u32>,
    prices: Vec<f64>,
    future: Vec<f64>,
}

impl WorkingBuffers {
    pub fn new(num_paths: usize) -> Self {
        Self {
            paths: vec![0; num_paths],
            prices: vec![0.0; num_paths],
            future: vec![0.0; num_paths],
        }
    }

    pub fn working_set(&mut self) -> WorkingSet<'_> {
        WorkingSet {
            paths: &mut self.paths,
            prices: &mut self.prices,
            future: &mut self.future,
        }
    }
}

/// What backward induction did, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InductionStats {
    /// Steps at which a regression was fitted.
    pub regressions: usize,
    /// Early-exercise decisions taken. A path that exercises at several
    /// steps during the backward sweep is counted each time.
    pub early_exercises: usize,
}

/// Clears the cash-flow matrix and writes the terminal payoff
/// `max(0, K - S[N])` for every path.
pub fn init_terminal<L: Layout>(
    grid: &Grid<L>,
    option: &AmericanPut,
    prices: &[f64],
    cash_flows: &mut [f64],
) {
    cash_flows.fill(0.0);
    for path in 0..grid.num_paths {
        let idx = grid.at(path, grid.num_steps);
        cash_flows[idx] = option.intrinsic(prices[idx]);
    }
}

/// Walks from step `N - 1` down to step 1, regressing the discounted future
/// cash flows of in-the-money paths on their current price and exercising
/// wherever the intrinsic value beats the fitted continuation value.
///
/// `cash_flows` must already hold the terminal payoffs (see
/// [`init_terminal`]). On return every path has at most one non-zero entry.
pub fn backward_induction<L: Layout>(
    grid: &Grid<L>,
    option: &AmericanPut,
    prices: &[f64],
    cash_flows: &mut [f64],
    work: &mut WorkingSet<'_>,
) -> InductionStats {
    let mut stats = InductionStats::default();

    for t in (1..grid.num_steps).rev() {
        let mut itm = 0;
        for path in 0..grid.num_paths {
            let price = prices[grid.at(path, t)];
            if option.strike - price > 0.0 {
                work.paths[itm] = path as u32;
                work.prices[itm] = price;
                work.future[itm] = grid.discounted_future(cash_flows, path, t);
                itm += 1;
            }
        }

        if itm == 0 {
            continue;
        }

        let fit = fit_quadratic(&work.prices[..itm], &work.future[..itm]);
        stats.regressions += 1;

        let mut exercised = 0;
        for (&path, &price) in work.paths[..itm].iter().zip(&work.prices[..itm]) {
            let path = path as usize;
            let intrinsic = option.intrinsic(price);
            if intrinsic > fit.eval(price) {
                cash_flows[grid.at(path, t)] = intrinsic;
                for j in t + 1..=grid.num_steps {
                    cash_flows[grid.at(path, j)] = 0.0;
                }
                exercised += 1;
            }
        }
        stats.early_exercises += exercised;

        trace!(t, itm, exercised, degree = fit.degree, "exercise step");
    }

    stats
}

/// Monte Carlo estimate: mean over paths of the discounted realized payoff.
pub fn aggregate<L: Layout>(grid: &Grid<L>, cash_flows: &[f64]) -> f64 {
    let total: f64 = (0..grid.num_paths)
        .map(|path| grid.path_payoff(cash_flows, path))
        .sum();
    total / grid.num_paths as f64
}

/// Paths per partial sum in [`aggregate_parallel`].
const AGGREGATE_CHUNK: usize = 4096;

/// [`aggregate`] with the per-path work spread over the rayon pool.
///
/// Partial sums cover fixed blocks of paths and are added in block order,
/// so the result does not depend on scheduling or pool size.
pub fn aggregate_parallel<L: Layout>(grid: &Grid<L>, cash_flows: &[f64]) -> f64 {
    let partials: Vec<f64> = (0..grid.num_paths.div_ceil(AGGREGATE_CHUNK))
        .into_par_iter()
        .map(|block| {
            let start = block * AGGREGATE_CHUNK;
            let end = (start + AGGREGATE_CHUNK).min(grid.num_paths);
            (start..end).map(|path| grid.path_payoff(cash_flows, path)).sum::<f64>()
        })
        .collect();
    partials.iter().sum::<f64>() / grid.num_paths as f64
}

#[cfg(test)]
fn simulated_cash_flows(
    num_paths: usize,
    num_steps: usize,
) -> (Grid<PathMajor>, AmericanPut, Vec<f64>, Vec<f64>) {
    use crate::paths::{sequential_rng, simulate_path_major, GbmStep};

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let step = GbmStep::new(&option, num_steps);
    let grid = Grid::<PathMajor>::new(num_paths, num_steps, step.dt, option.risk_free_rate);

    let mut prices = vec![0.0; num_paths * (num_steps + 1)];
    simulate_path_major(&mut prices, option.spot, &step, num_steps, &mut sequential_rng(42));

    let mut cash_flows = vec![f64::NAN; prices.len()];
    init_terminal(&grid, &option, &prices, &mut cash_flows);
    let mut buffers = WorkingBuffers::new(num_paths);
    backward_induction(&grid, &option, &prices, &mut cash_flows, &mut buffers.working_set());

    (grid, option, prices, cash_flows)
}

#[test]
fn at_most_one_exercise_per_path() {
    let (grid, _, _, cash_flows) = simulated_cash_flows(2000, 25);
    for row in cash_flows.chunks_exact(grid.num_steps + 1) {
        assert_eq!(row[0], 0.0);
        assert!(row.iter().filter(|&&c| c != 0.0).count() <= 1);
    }
}

#[test]
fn terminal_payoff_survives_unless_exercised_early() {
    let (grid, option, prices, cash_flows) = simulated_cash_flows(2000, 25);
    let n = grid.num_steps;
    for (row, path) in cash_flows.chunks_exact(n + 1).zip(prices.chunks_exact(n + 1)) {
        let exercised_early = row[1..n].iter().any(|&c| c > 0.0);
        if exercised_early {
            assert_eq!(row[n], 0.0);
        } else {
            assert_eq!(row[n], option.intrinsic(path[n]));
        }
    }
}

#[test]
fn exercise_pays_exactly_intrinsic() {
    let (grid, option, prices, cash_flows) = simulated_cash_flows(2000, 25);
    let mut contributions = 0;
    for path in 0..grid.num_paths {
        for t in 1..=grid.num_steps {
            let idx = grid.at(path, t);
            if cash_flows[idx] > 0.0 {
                assert_eq!(cash_flows[idx], option.intrinsic(prices[idx]));
                let payoff = grid.path_payoff(&cash_flows, path);
                assert!(payoff > 0.0 && payoff <= cash_flows[idx]);
                contributions += 1;
            }
        }
    }
    assert!(contributions > 0);
}

#[test]
fn early_exercise_happens_for_deep_puts() {
    let (grid, _, _, cash_flows) = simulated_cash_flows(2000, 25);
    let early = cash_flows
        .chunks_exact(grid.num_steps + 1)
        .filter(|row| row[1..grid.num_steps].iter().any(|&c| c > 0.0))
        .count();
    assert!(early > 0);
}

#[test]
fn discounted_future_picks_first_cash_flow() {
    let grid = Grid::<PathMajor>::new(1, 4, 0.25, 0.08);
    let cash_flows = [0.0, 0.0, 0.0, 3.0, 5.0];
    let expected = 3.0 * (-0.08_f64 * 2.0 * 0.25).exp();
    assert_eq!(grid.discounted_future(&cash_flows, 0, 1), expected);
    assert_eq!(grid.discounted_future(&cash_flows, 0, 3), 5.0 * (-0.08_f64 * 1.0 * 0.25).exp());
    assert_eq!(grid.discounted_future(&[0.0; 5], 0, 1), 0.0);
}

#[test]
fn layouts_address_the_same_cells() {
    let path_major = PathMajor::new(8, 3);
    let time_major = TimeMajor::new(8, 3);
    assert_eq!(path_major.index(2, 3), 11);
    assert_eq!(time_major.index(2, 3), 26);
}

#[test]
fn parallel_aggregate_matches_sequential() {
    let (grid, _, _, cash_flows) = simulated_cash_flows(4000, 10);
    let sequential = aggregate(&grid, &cash_flows);
    let parallel = aggregate_parallel(&grid, &cash_flows);
    approx::assert_relative_eq!(sequential, parallel, max_relative = 1e-12);
}

#[test]
fn time_major_layout_matches_path_major() {
    use crate::paths::{sequential_rng, GbmStep};
    use crate::simd::{simulate_time_major, Lane, SIMD_WIDTH};

    let (num_paths, num_steps) = (1000, 20);
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let step = GbmStep::new(&option, num_steps);

    let mut lanes = vec![Lane::splat(0.0); num_paths * (num_steps + 1) / SIMD_WIDTH];
    simulate_time_major(&mut lanes, option.spot, &step, num_steps, &mut sequential_rng(42));
    let by_time: &[f64] = bytemuck::cast_slice(&lanes);

    // The same prices, one row per path.
    let mut by_path = vec![0.0; by_time.len()];
    for t in 0..=num_steps {
        for path in 0..num_paths {
            by_path[path * (num_steps + 1) + t] = by_time[t * num_paths + path];
        }
    }

    let time_grid = Grid::<TimeMajor>::new(num_paths, num_steps, step.dt, option.risk_free_rate);
    let path_grid = Grid::<PathMajor>::new(num_paths, num_steps, step.dt, option.risk_free_rate);

    let mut time_flows = vec![f64::NAN; by_time.len()];
    init_terminal(&time_grid, &option, by_time, &mut time_flows);
    let time_stats = backward_induction(
        &time_grid,
        &option,
        by_time,
        &mut time_flows,
        &mut WorkingBuffers::new(num_paths).working_set(),
    );

    let mut path_flows = vec![f64::NAN; by_path.len()];
    init_terminal(&path_grid, &option, &by_path, &mut path_flows);
    let path_stats = backward_induction(
        &path_grid,
        &option,
        &by_path,
        &mut path_flows,
        &mut WorkingBuffers::new(num_paths).working_set(),
    );

    assert_eq!(time_stats, path_stats);
    assert!(time_stats.early_exercises > 0);
    for path in 0..num_paths {
        let mut exercises = 0;
        for t in 0..=num_steps {
            let idx = time_grid.at(path, t);
            let cash_flow = time_flows[idx];
            assert_eq!(cash_flow.to_bits(), path_flows[path_grid.at(path, t)].to_bits());
            if cash_flow != 0.0 {
                assert!(t > 0);
                assert_eq!(cash_flow, option.intrinsic(by_time[idx]));
                exercises += 1;
            }
        }
        assert!(exercises <= 1);
    }
    assert_eq!(
        aggregate(&time_grid, &time_flows).to_bits(),
        aggregate(&path_grid, &path_flows).to_bits()
    );
}
