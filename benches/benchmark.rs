use lsm_pricer::{
    lsm, lsm_arena, lsm_mt, lsm_simd, lsm_ultimate, AmericanPut, Arena, Simulation, Variant,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const SPOT : f64 = 100.0;
const STRIKE : f64 = 105.0;
const YEARS_TO_EXPIRY : f64 = 1.0;
const RISK_FREE_RATE : f64 = 0.05;
const VOLATILITY : f64 = 0.2;

fn option() -> AmericanPut {
    AmericanPut::new(SPOT, STRIKE, YEARS_TO_EXPIRY, RISK_FREE_RATE, VOLATILITY)
}

fn criterion_benchmark_10240x50(c: &mut Criterion) {
    let option = option();
    let sim = Simulation::new(10_240, 50);
    let mut arena = Arena::for_simulation(&sim).unwrap();

    c.bench_function("lsm baseline 10240 x 50", |b| b.iter(|| {
        lsm::put_price(&option, &sim).unwrap()
    }));

    c.bench_function("lsm arena 10240 x 50", |b| b.iter(|| {
        lsm_arena::put_price(&mut arena, &option, &sim).unwrap()
    }));

    c.bench_function("lsm simd 10240 x 50", |b| b.iter(|| {
        lsm_simd::put_price(&option, &sim).unwrap()
    }));

    c.bench_function("lsm mt 10240 x 50", |b| b.iter(|| {
        lsm_mt::put_price(&mut arena, &option, &sim).unwrap()
    }));

    c.bench_function("lsm ultimate 10240 x 50", |b| b.iter(|| {
        lsm_ultimate::put_price(&mut arena, &option, &sim).unwrap()
    }));
}

fn criterion_benchmark_paths(c: &mut Criterion) {
    let option = option();
    let mut group = c.benchmark_group("lsm paths x 100");
    group.sample_size(10);

    for num_paths in [16_384, 65_536] {
        let sim = Simulation::new(num_paths, 100);
        for variant in Variant::ALL {
            group.bench_with_input(BenchmarkId::new(variant.name(), num_paths), &sim, |b, sim| {
                b.iter(|| variant.price(&option, sim).unwrap())
            });
        }
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark_10240x50, criterion_benchmark_paths);
criterion_main!(benches);
