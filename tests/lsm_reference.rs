use lsm_pricer::bs::{binomial_american_put_price, black_scholes_put_price};
use lsm_pricer::{AmericanPut, Arena, Simulation, Variant};

#[test]
fn every_variant_within_two_percent_of_binomial() {
    let option = AmericanPut::new(100.0, 105.0, 1.0, 0.05, 0.2);
    let sim = Simulation::new(20_000, 100);
    let expected = binomial_american_put_price(100.0, 105.0, 0.2, 0.05, 1.0, 2000);

    for variant in Variant::ALL {
        let price = variant.price(&option, &sim).unwrap();
        println!("{} {} vs {}", variant, price, expected);
        assert!(
            (price - expected).abs() <= 0.02 * expected,
            "{variant}: {price} vs binomial {expected}"
        );
    }
}

#[test]
fn variants_agree_statistically() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(40_000, 50);
    let baseline = Variant::Baseline.price(&option, &sim).unwrap();

    for variant in Variant::ALL {
        let price = variant.price(&option, &sim).unwrap();
        println!("{} {} vs baseline {}", variant, price, baseline);
        assert!((price - baseline).abs() <= 0.03 * baseline, "{variant}");
    }
}

#[test]
fn american_price_bounds() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(20_000, 50);
    let european = black_scholes_put_price(36.0, 40.0, 0.2, 0.06, 1.0);

    for variant in Variant::ALL {
        let price = variant.price(&option, &sim).unwrap();
        // LSM is biased low but the early-exercise premium here is ~0.6.
        assert!(price > european, "{variant}: {price} <= {european}");
        assert!(price >= option.intrinsic(option.spot));
        assert!(price < option.strike);
    }
}

#[test]
fn single_step_converges_to_black_scholes() {
    let option = AmericanPut::new(100.0, 105.0, 1.0, 0.05, 0.2);
    let sim = Simulation::new(100_000, 1);
    let european = black_scholes_put_price(100.0, 105.0, 0.2, 0.05, 1.0);

    for variant in Variant::ALL {
        let price = variant.price(&option, &sim).unwrap();
        println!("{} single step {} vs {}", variant, price, european);
        assert!((price - european).abs() <= 0.015 * european, "{variant}");
    }
}

#[test]
fn deep_out_of_the_money_is_nearly_worthless() {
    let option = AmericanPut::new(200.0, 100.0, 0.25, 0.05, 0.2);
    let sim = Simulation::new(8_192, 25);
    for variant in Variant::ALL {
        let price = variant.price(&option, &sim).unwrap();
        assert!((0.0..1e-3).contains(&price), "{variant}: {price}");
    }
}

#[test]
fn one_arena_serves_every_arena_variant_in_turn() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(4_096, 32);
    let mut arena = Arena::for_simulation(&sim).unwrap();

    for variant in Variant::ALL.into_iter().filter(|v| v.uses_arena()) {
        let reused = variant.price_in(&mut arena, &option, &sim).unwrap();
        let fresh = variant.price(&option, &sim).unwrap();
        assert_eq!(reused, fresh, "{variant}");
    }
}
