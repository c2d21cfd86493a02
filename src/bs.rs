//! Reference prices the Monte Carlo estimates are checked against.

use statrs::function::erf::erf;

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Black-Scholes price of a European put on a non-dividend-paying stock.
/// At or past expiry this is the intrinsic value.
pub fn black_scholes_put_price(
    spot: f64,
    strike: f64,
    volatility: f64,
    risk_free_rate: f64,
    years_to_expiry: f64
) -> f64 {
    if years_to_expiry <= 0.0 {
        return (strike - spot).max(0.0);
    }
    let sqrt_t = years_to_expiry.sqrt();
    let drift = (risk_free_rate + (volatility * volatility) / 2.0) * years_to_expiry;
    let d1: f64 = ((spot / strike).ln() + drift) / (volatility * sqrt_t);
    let d2: f64 = d1 - volatility * sqrt_t;

    strike * (-risk_free_rate * years_to_expiry).exp() * normal_cdf(-d2) - spot * normal_cdf(-d1)
}

/// American put on a Cox-Ross-Rubinstein tree with `steps` levels.
/// Converges to the true price as `steps` grows; 2000 levels are good to
/// about three decimals.
pub fn binomial_american_put_price(
    spot: f64,
    strike: f64,
    volatility: f64,
    risk_free_rate: f64,
    years_to_expiry: f64,
    steps: usize
) -> f64 {
    let steps = steps.max(1);
    let dt = years_to_expiry / steps as f64;
    let up = (volatility * dt.sqrt()).exp();
    let down = 1.0 / up;
    let p_up = ((risk_free_rate * dt).exp() - down) / (up - down);
    let discount = (-risk_free_rate * dt).exp();

    let node_price = |level: usize, ups: usize| {
        spot * up.powi(ups as i32) * down.powi((level - ups) as i32)
    };

    let mut values: Vec<f64> = (0..=steps)
        .map(|ups| (strike - node_price(steps, ups)).max(0.0))
        .collect();

    for level in (0..steps).rev() {
        for ups in 0..=level {
            let continuation = discount * (p_up * values[ups + 1] + (1.0 - p_up) * values[ups]);
            let exercise = (strike - node_price(level, ups)).max(0.0);
            values[ups] = continuation.max(exercise);
        }
    }

    values[0]
}

#[test]
fn bs_put_matches_reference() {
    let price = black_scholes_put_price(100.0, 105.0, 0.2, 0.05, 1.0);
    println!("bs put {}", price);
    assert!((price - 7.9004).abs() < 1e-4);
}

#[test]
fn bs_put_at_expiry_is_intrinsic() {
    assert_eq!(black_scholes_put_price(90.0, 100.0, 0.2, 0.05, 0.0), 10.0);
    assert_eq!(black_scholes_put_price(110.0, 100.0, 0.2, 0.05, 0.0), 0.0);
}

#[test]
fn binomial_put_matches_reference() {
    let price = binomial_american_put_price(100.0, 105.0, 0.2, 0.05, 1.0, 2000);
    println!("binomial american put {}", price);
    assert!((price - 8.7408).abs() < 1e-3);
}

#[test]
fn american_put_is_worth_at_least_european() {
    let american = binomial_american_put_price(36.0, 40.0, 0.2, 0.06, 1.0, 1000);
    let european = black_scholes_put_price(36.0, 40.0, 0.2, 0.06, 1.0);
    println!("american {} vs european {}", american, european);
    assert!(american > european);
    assert!(american >= 4.0);
}
