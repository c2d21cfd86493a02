use tracing::debug;

use crate::arena::Arena;
use crate::error::Result;
use crate::exercise::{
    aggregate_parallel, backward_induction, init_terminal, Grid, PathMajor, WorkingSet,
};
use crate::params::{AmericanPut, Simulation};
use crate::paths::{simulate_path_major_parallel, GbmStep};

/// Arena-backed LSM with paths simulated and payoffs summed on the rayon
/// pool. Backward induction stays sequential.
///
/// Worker `k` draws from a generator seeded `seed + k`, so the result is
/// reproducible for a fixed pool size only.
pub fn put_price(arena: &mut Arena, option: &AmericanPut, sim: &Simulation) -> Result<f64> {
    option.validate()?;
    sim.validate()?;

    arena.reset();
    let arena = &*arena;

    let step = GbmStep::new(option, sim.num_steps);
    let grid =
        Grid::<PathMajor>::new(sim.num_paths, sim.num_steps, step.dt, option.risk_free_rate);

    let prices = arena.alloc_slice::<f64>(sim.grid_len())?;
    let cash_flows = arena.alloc_slice::<f64>(sim.grid_len())?;
    let mut work = WorkingSet::from_arena(arena, sim.num_paths)?;

    simulate_path_major_parallel(prices, option.spot, &step, sim.num_steps, sim.seed);
    init_terminal(&grid, option, prices, cash_flows);
    let stats = backward_induction(&grid, option, prices, cash_flows, &mut work);

    let price = aggregate_parallel(&grid, cash_flows);
    debug!(
        variant = "mt",
        price,
        threads = rayon::current_num_threads(),
        regressions = stats.regressions,
        early_exercises = stats.early_exercises,
        "priced american put"
    );
    Ok(price)
}

#[test]
fn valid_price1() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(10_000, 50);
    let price = put_price(&mut Arena::for_simulation(&sim).unwrap(), &option, &sim).unwrap();
    println!("mt 1 {}", price);
    assert!((4.35..=4.60).contains(&price));
}

#[test]
fn same_pool_same_price() {
    let option = AmericanPut::new(40.0, 40.0, 1.0, 0.06, 0.3);
    let sim = Simulation::new(5_000, 25).with_seed(77);
    let mut arena = Arena::for_simulation(&sim).unwrap();
    let first = put_price(&mut arena, &option, &sim).unwrap();
    let second = put_price(&mut arena, &option, &sim).unwrap();
    assert_eq!(first.to_bits(), second.to_bits());
}

#[test]
fn fixed_pool_size_is_reproducible() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(4_000, 20);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();

    let price_once = || put_price(&mut Arena::for_simulation(&sim).unwrap(), &option, &sim);
    let first = pool.install(price_once).unwrap();
    let second = pool.install(price_once).unwrap();
    assert_eq!(first, second);
}

#[test]
fn single_worker_matches_arena_paths() {
    // With one worker the only generator is seeded `seed + 0`, the same
    // stream the sequential pricers consume.
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(3_000, 20);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

    let parallel = pool
        .install(|| put_price(&mut Arena::for_simulation(&sim).unwrap(), &option, &sim))
        .unwrap();
    let mut arena = Arena::for_simulation(&sim).unwrap();
    let sequential = crate::lsm_arena::put_price(&mut arena, &option, &sim).unwrap();
    approx::assert_relative_eq!(parallel, sequential, max_relative = 1e-12);
}
