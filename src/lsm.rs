use tracing::debug;

use crate::error::Result;
use crate::exercise::{
    aggregate, backward_induction, init_terminal, Grid, PathMajor, WorkingBuffers,
};
use crate::params::{AmericanPut, Simulation};
use crate::paths::{sequential_rng, simulate_path_major, GbmStep};

/// Baseline LSM pricer: heap matrices allocated per call, scalar path
/// simulation, one sequential random stream.
pub fn put_price(option: &AmericanPut, sim: &Simulation) -> Result<f64> {
    option.validate()?;
    sim.validate()?;

    let step = GbmStep::new(option, sim.num_steps);
    let grid =
        Grid::<PathMajor>::new(sim.num_paths, sim.num_steps, step.dt, option.risk_free_rate);

    let mut prices = vec![0.0; sim.grid_len()];
    let mut rng = sequential_rng(sim.seed);
    simulate_path_major(&mut prices, option.spot, &step, sim.num_steps, &mut rng);

    let mut cash_flows = vec![0.0; sim.grid_len()];
    init_terminal(&grid, option, &prices, &mut cash_flows);

    let mut buffers = WorkingBuffers::new(sim.num_paths);
    let mut work = buffers.working_set();
    let stats = backward_induction(&grid, option, &prices, &mut cash_flows, &mut work);

    let price = aggregate(&grid, &cash_flows);
    debug!(
        variant = "baseline",
        price,
        regressions = stats.regressions,
        early_exercises = stats.early_exercises,
        "priced american put"
    );
    Ok(price)
}

#[test]
fn valid_price1() {
    use crate::bs::binomial_american_put_price;

    let actual_price = binomial_american_put_price(36.0, 40.0, 0.2, 0.06, 1.0, 2000);
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let price = put_price(&option, &Simulation::new(10_000, 50).with_seed(42)).unwrap();
    println!("lsm 1 {} vs {}", price, actual_price);
    assert!((4.35..=4.60).contains(&price));
    assert!((actual_price - price).abs() <= 0.15);
}

#[test]
fn valid_price2() {
    use crate::bs::binomial_american_put_price;

    let actual_price = binomial_american_put_price(100.0, 105.0, 0.2, 0.05, 1.0, 2000);
    let option = AmericanPut::new(100.0, 105.0, 1.0, 0.05, 0.2);
    let price = put_price(&option, &Simulation::new(20_000, 100)).unwrap();
    println!("lsm 2 {} vs {}", price, actual_price);
    assert!((actual_price - price).abs() <= 0.02 * actual_price);
}

#[test]
fn same_seed_is_reproducible() {
    let option = AmericanPut::new(40.0, 40.0, 0.5, 0.04, 0.3);
    let sim = Simulation::new(2_000, 20).with_seed(9);
    assert_eq!(put_price(&option, &sim).unwrap(), put_price(&option, &sim).unwrap());
    assert_ne!(
        put_price(&option, &sim).unwrap(),
        put_price(&option, &sim.with_seed(10)).unwrap()
    );
}

#[test]
fn single_step_is_discounted_european_payoff() {
    use rand::Rng;
    use rand_distr::StandardNormal;

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(5_000, 1).with_seed(3);
    let step = GbmStep::new(&option, 1);

    let mut rng = sequential_rng(3);
    let total: f64 = (0..sim.num_paths)
        .map(|_| {
            let z: f64 = rng.sample(StandardNormal);
            option.intrinsic(step.advance(option.spot, z))
        })
        .filter(|&payoff| payoff > 0.0)
        .map(|payoff| payoff * (-option.risk_free_rate * 1.0 * step.dt).exp())
        .sum();
    let expected = total / sim.num_paths as f64;

    let price = put_price(&option, &sim).unwrap();
    approx::assert_relative_eq!(price, expected, max_relative = 1e-12);
}

#[test]
fn rejects_invalid_input() {
    use crate::error::LsmError;

    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    assert!(matches!(
        put_price(&option, &Simulation::new(0, 10)),
        Err(LsmError::InvalidArgument(_))
    ));
    assert!(matches!(
        put_price(&AmericanPut { volatility: 0.0, ..option }, &Simulation::new(8, 10)),
        Err(LsmError::InvalidArgument(_))
    ));
}
