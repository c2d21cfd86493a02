//! Named registry of the pricer variants, used by the CLI and the
//! experiment runner to pick a backend by name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::error::{LsmError, Result};
use crate::params::{AmericanPut, Simulation};
use crate::simd::check_simd_width;
use crate::{lsm, lsm_arena, lsm_mt, lsm_simd, lsm_ultimate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Baseline,
    Arena,
    Simd,
    #[serde(rename = "mt")]
    Multithreaded,
    Ultimate,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Baseline,
        Variant::Arena,
        Variant::Simd,
        Variant::Multithreaded,
        Variant::Ultimate,
    ];

    /// Stable name used on the command line and in result files.
    pub fn name(self) -> &'static str {
        match self {
            Variant::Baseline => "baseline",
            Variant::Arena => "arena",
            Variant::Simd => "simd",
            Variant::Multithreaded => "mt",
            Variant::Ultimate => "ultimate",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Variant::Baseline => "scalar baseline",
            Variant::Arena => "arena allocated",
            Variant::Simd => "SIMD vectorized",
            Variant::Multithreaded => "multithreaded",
            Variant::Ultimate => "arena + SIMD + multithreaded",
        }
    }

    pub fn uses_arena(self) -> bool {
        matches!(
            self,
            Variant::Arena | Variant::Multithreaded | Variant::Ultimate
        )
    }

    pub fn requires_simd_width(self) -> bool {
        matches!(self, Variant::Simd | Variant::Ultimate)
    }

    /// Prices `option` with this variant, building an arena of the
    /// recommended size when the variant needs one.
    ///
    /// Every input check runs before the arena is reserved, and a buffer
    /// that cannot be reserved is reported as `OutOfMemory`.
    pub fn price(self, option: &AmericanPut, sim: &Simulation) -> Result<f64> {
        option.validate()?;
        sim.validate()?;
        if self.requires_simd_width() {
            check_simd_width(sim.num_paths)?;
        }

        let mut arena = if self.uses_arena() {
            Arena::for_simulation(sim)?
        } else {
            Arena::new(0)?
        };
        self.price_in(&mut arena, option, sim)
    }

    /// Prices `option` with this variant, reusing `arena` when the variant
    /// needs one. Dynamic variants leave the arena untouched.
    pub fn price_in(
        self,
        arena: &mut Arena,
        option: &AmericanPut,
        sim: &Simulation,
    ) -> Result<f64> {
        match self {
            Variant::Baseline => lsm::put_price(option, sim),
            Variant::Arena => lsm_arena::put_price(arena, option, sim),
            Variant::Simd => lsm_simd::put_price(option, sim),
            Variant::Multithreaded => lsm_mt::put_price(arena, option, sim),
            Variant::Ultimate => lsm_ultimate::put_price(arena, option, sim),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = LsmError;

    fn from_str(s: &str) -> Result<Self> {
        Variant::ALL
            .into_iter()
            .find(|variant| variant.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<_> = Variant::ALL.iter().map(|v| v.name()).collect();
                LsmError::InvalidArgument(format!(
                    "unknown variant '{s}', expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}

#[test]
fn names_round_trip() {
    for variant in Variant::ALL {
        assert_eq!(variant.to_string().parse::<Variant>().unwrap(), variant);
        let json = serde_json::to_string(&variant).unwrap();
        assert_eq!(json, format!("\"{}\"", variant.name()));
        assert_eq!(serde_json::from_str::<Variant>(&json).unwrap(), variant);
    }
    assert_eq!("ULTIMATE".parse::<Variant>().unwrap(), Variant::Ultimate);
    assert!("cpp".parse::<Variant>().is_err());
}

#[test]
fn capabilities() {
    let arena: Vec<_> = Variant::ALL.into_iter().filter(|v| v.uses_arena()).collect();
    assert_eq!(arena, [Variant::Arena, Variant::Multithreaded, Variant::Ultimate]);
    let simd: Vec<_> = Variant::ALL.into_iter().filter(|v| v.requires_simd_width()).collect();
    assert_eq!(simd, [Variant::Simd, Variant::Ultimate]);
}

#[test]
fn dispatch_reaches_the_right_pricer() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(2_000, 20).with_seed(8);

    assert_eq!(
        Variant::Baseline.price(&option, &sim).unwrap(),
        lsm::put_price(&option, &sim).unwrap()
    );
    assert_eq!(
        Variant::Arena.price(&option, &sim).unwrap(),
        lsm_arena::put_price(&mut Arena::for_simulation(&sim).unwrap(), &option, &sim)
            .unwrap()
    );
    assert_eq!(
        Variant::Simd.price(&option, &sim).unwrap(),
        lsm_simd::put_price(&option, &sim).unwrap()
    );
}

#[test]
fn simd_variants_reject_odd_path_counts() {
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(1_001, 10);
    for variant in Variant::ALL {
        let result = variant.price(&option, &sim);
        assert_eq!(result.is_err(), variant.requires_simd_width(), "{variant}");
    }
}

#[test]
fn odd_path_counts_fail_before_the_arena_is_built() {
    use crate::error::LsmError;

    // Sized for the arena this would need, the grid is hundreds of gigabytes.
    let option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let sim = Simulation::new(1_001, 20_000_000);
    for variant in [Variant::Simd, Variant::Ultimate] {
        let err = variant.price(&option, &sim).unwrap_err();
        assert_eq!(
            err,
            LsmError::InvalidArgument(
                "num_paths (1001) must be a multiple of the SIMD width (4)".to_string()
            ),
            "{variant}"
        );
    }

    let bad_option = AmericanPut { volatility: -0.2, ..option };
    let huge = Simulation::new(1_000, 20_000_000);
    for variant in Variant::ALL {
        assert!(
            matches!(variant.price(&bad_option, &huge), Err(LsmError::InvalidArgument(_))),
            "{variant}"
        );
    }
}
