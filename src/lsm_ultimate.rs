use tracing::debug;

use crate::arena::Arena;
use crate::error::Result;
use crate::exercise::{
    aggregate_parallel, backward_induction, init_terminal, Grid, TimeMajor, WorkingSet,
};
use crate::params::{AmericanPut, Simulation};
use crate::paths::GbmStep;
use crate::simd::{check_simd_width, simulate_time_major_parallel, Lane, SIMD_WIDTH};

/// Every optimization at once: arena storage, a time-major matrix of SIMD
/// lanes filled in parallel, then a parallel payoff sum.
pub fn put_price(arena: &mut Arena, option: &AmericanPut, sim: &Simulation) -> Result<f64> {
    option.validate()?;
    sim.validate()?;
    check_simd_width(sim.num_paths)?;

    arena.reset();
    let arena = &*arena;

    let step = GbmStep::new(option, sim.num_steps);
    let grid =
        Grid::<TimeMajor>::new(sim.num_paths, sim.num_steps, step.dt, option.risk_free_rate);

    let lanes = arena.alloc_slice::<Lane>(sim.grid_len() / SIMD_WIDTH)?;
    let cash_flows = arena.alloc_slice::<f64>(sim.grid_len())?;
    let mut work = WorkingSet::from_arena(arena, sim.num_paths)?;

    simulate_time_major_parallel(lanes, option.spot, &step, sim.num_steps, sim.seed);
    let prices: &[f64] = bytemuck::cast_slice(&*lanes);

    init_terminal(&grid, option, prices, cash_flows);
    let stats = backward_induction(&grid, option, prices, cash_flows, &mut work);

    let price = aggregate_parallel(&grid, cash_flows);
    debug!(
        variant = "ultimate",
        price,
        threads = rayon::current_num_threads(),
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
    let price = put_price(&mut Arena::for_simulation(&sim).unwrap(), &option, &sim).unwrap();
    println!("ultimate 1 {}", price);
    assert!((4.35..=4.60).contains(&price));
}

#[test]
fn recommended_arena_fits_lane_alignment() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(4_096, 64);
    let mut arena = Arena::for_simulation(&sim).unwrap();
    put_price(&mut arena, &option, &sim).unwrap();
    assert!(arena.used() >= sim.arena_bytes());
    assert!(arena.used() <= arena.capacity());
}

#[test]
fn reused_arena_matches_fresh_arena() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(2_048, 30);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();

    let (reused, fresh) = pool.install(|| {
        let mut arena = Arena::for_simulation(&sim).unwrap();
        put_price(&mut arena, &AmericanPut::new(50.0, 40.0, 0.5, 0.02, 0.5), &sim).unwrap();
        let reused = put_price(&mut arena, &option, &sim).unwrap();
        let fresh = put_price(&mut Arena::for_simulation(&sim).unwrap(), &option, &sim).unwrap();
        (reused, fresh)
    });
    assert_eq!(reused, fresh);
}

#[test]
fn rejects_partial_lanes_before_touching_arena() {
    use crate::error::LsmError;

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(1_002, 10);
    let mut arena = Arena::new(16).unwrap();
    let err = put_price(&mut arena, &option, &sim).unwrap_err();
    assert!(matches!(err, LsmError::InvalidArgument(_)));
    assert_eq!(arena.used(), 0);
}
