use tracing::debug;

use crate::error::Result;
use crate::exercise::{
    aggregate, backward_induction, init_terminal, Grid, TimeMajor, WorkingBuffers,
};
use crate::params::{AmericanPut, Simulation};
use crate::paths::{sequential_rng, GbmStep};
use crate::simd::{check_simd_width, simulate_time_major, Lane, SIMD_WIDTH};

/// LSM with vectorized path simulation over a time-major matrix.
///
/// `num_paths` must be a multiple of [`SIMD_WIDTH`]; anything else is
/// rejected before any simulation work.
pub fn put_price(option: &AmericanPut, sim: &Simulation) -> Result<f64> {
    option.validate()?;
    sim.validate()?;
    check_simd_width(sim.num_paths)?;

    let step = GbmStep::new(option, sim.num_steps);
    let grid =
        Grid::<TimeMajor>::new(sim.num_paths, sim.num_steps, step.dt, option.risk_free_rate);

    let mut lanes = vec![Lane::splat(0.0); sim.grid_len() / SIMD_WIDTH];
    let mut rng = sequential_rng(sim.seed);
    simulate_time_major(&mut lanes, option.spot, &step, sim.num_steps, &mut rng);
    let prices: &[f64] = bytemuck::cast_slice(&lanes);

    let mut cash_flows = vec![0.0; sim.grid_len()];
    init_terminal(&grid, option, prices, &mut cash_flows);

    let mut buffers = WorkingBuffers::new(sim.num_paths);
    let mut work = buffers.working_set();
    let stats = backward_induction(&grid, option, prices, &mut cash_flows, &mut work);

    let price = aggregate(&grid, &cash_flows);
    debug!(
        variant = "simd",
        price,
        regressions = stats.regressions,
        early_exercises = stats.early_exercises,
        "priced american put"
    );
    Ok(price)
}

#[test]
fn valid_price1() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let price = put_price(&option, &Simulation::new(10_000, 50)).unwrap();
    println!("simd 1 {}", price);
    assert!((4.35..=4.60).contains(&price));
}

#[test]
fn close_to_baseline() {
    let option = AmericanPut::new(100.0, 105.0, 1.0, 0.05, 0.2);
    let sim = Simulation::new(20_000, 50);
    let baseline = crate::lsm::put_price(&option, &sim).unwrap();
    let price = put_price(&option, &sim).unwrap();
    println!("simd {} vs baseline {}", price, baseline);
    assert!((price - baseline).abs() <= 0.03 * baseline);
}

#[test]
fn rejects_partial_lanes() {
    use crate::error::LsmError;

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let err = put_price(&option, &Simulation::new(10_001, 50)).unwrap_err();
    assert!(matches!(err, LsmError::InvalidArgument(_)));
    assert!(put_price(&option, &Simulation::new(SIMD_WIDTH, 3)).is_ok());
}

#[test]
fn single_step_has_no_early_exercise() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(4_000, 1);
    let european = crate::bs::black_scholes_put_price(36.0, 40.0, 0.2, 0.06, 1.0);
    let price = put_price(&option, &sim).unwrap();
    println!("simd single step {} vs {}", price, european);
    assert!((price - european).abs() <= 0.25);
}
