use tracing::debug;

use crate::arena::Arena;
use crate::error::Result;
use crate::exercise::{
    aggregate, backward_induction, init_terminal, Grid, PathMajor, WorkingSet,
};
use crate::params::{AmericanPut, Simulation};
use crate::paths::{sequential_rng, simulate_path_major, GbmStep};

/// Baseline algorithm with every buffer carved out of `arena`. The arena is
/// reset on entry; it must hold at least [`Simulation::arena_bytes`] plus
/// alignment padding.
///
/// Consumes the random stream exactly like [`crate::lsm::put_price`], so the
/// two agree bit for bit.
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

    simulate_path_major(prices, option.spot, &step, sim.num_steps, &mut sequential_rng(sim.seed));
    init_terminal(&grid, option, prices, cash_flows);
    let stats = backward_induction(&grid, option, prices, cash_flows, &mut work);

    let price = aggregate(&grid, cash_flows);
    debug!(
        variant = "arena",
        price,
        arena_used = arena.used(),
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
    let mut arena = Arena::for_simulation(&sim).unwrap();
    let price = put_price(&mut arena, &option, &sim).unwrap();
    println!("arena 1 {}", price);
    assert!((4.35..=4.60).contains(&price));
}

#[test]
fn matches_baseline_bit_for_bit() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(3_000, 30).with_seed(5);
    let mut arena = Arena::for_simulation(&sim).unwrap();

    let arena_price = put_price(&mut arena, &option, &sim).unwrap();
    let baseline_price = crate::lsm::put_price(&option, &sim).unwrap();
    assert_eq!(arena_price.to_bits(), baseline_price.to_bits());
}

#[test]
fn reused_arena_matches_fresh_arenas() {
    let first_option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let second_option = AmericanPut::new(44.0, 40.0, 2.0, 0.06, 0.4);
    let sim = Simulation::new(2_000, 40);

    let mut shared = Arena::for_simulation(&sim).unwrap();
    let first = put_price(&mut shared, &first_option, &sim).unwrap();
    let second = put_price(&mut shared, &second_option, &sim).unwrap();
    let again = put_price(&mut shared, &first_option, &sim).unwrap();

    let fresh = |option: &AmericanPut| {
        put_price(&mut Arena::for_simulation(&sim).unwrap(), option, &sim).unwrap()
    };
    let fresh_first = fresh(&first_option);
    let fresh_second = fresh(&second_option);
    assert_eq!(first, fresh_first);
    assert_eq!(second, fresh_second);
    assert_eq!(again, first);
}

#[test]
fn minimum_arena_is_enough_with_padding() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(1_001, 7);
    // Five allocations need at most seven bytes of padding each.
    let mut arena = Arena::new(sim.arena_bytes() + 5 * 8).unwrap();
    assert!(put_price(&mut arena, &option, &sim).is_ok());
}

#[test]
fn undersized_arena_is_out_of_memory() {
    use crate::error::LsmError;

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(1_000, 10);
    let mut arena = Arena::new(sim.arena_bytes() / 2).unwrap();
    let err = put_price(&mut arena, &option, &sim).unwrap_err();
    println!("{}", err);
    assert!(matches!(err, LsmError::OutOfMemory { .. }));

    // A failed call leaves the arena usable once it is large enough.
    let mut arena = Arena::for_simulation(&sim).unwrap();
    assert!(put_price(&mut arena, &option, &sim).is_ok());
}
