//! Contract and simulation parameters shared by every pricer variant.

use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};

/// Seed used when a caller does not pick one.
pub const DEFAULT_SEED: u64 = 42;

/// Number of arena allocations a single pricing call makes: the two
/// matrices plus the three in-the-money working vectors.
const ARENA_ALLOCATIONS: usize = 5;

/// Worst-case padding one allocation can need.
const ARENA_ALIGN_SLACK: usize = 64;

/// An American put on a non-dividend-paying underlying following GBM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmericanPut {
    pub spot: f64,
    pub strike: f64,
    pub years_to_expiry: f64,
    pub risk_free_rate: f64,
    pub volatility: f64,
}

impl AmericanPut {
    pub fn new(
        spot: f64,
        strike: f64,
        years_to_expiry: f64,
        risk_free_rate: f64,
        volatility: f64,
    ) -> Self {
        Self {
            spot,
            strike,
            years_to_expiry,
            risk_free_rate,
            volatility,
        }
    }

    /// Immediate exercise value at `price`.
    #[inline(always)]
    pub fn intrinsic(&self, price: f64) -> f64 {
        (self.strike - price).max(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("spot", self.spot),
            ("strike", self.strike),
            ("years_to_expiry", self.years_to_expiry),
            ("volatility", self.volatility),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(LsmError::InvalidArgument(format!(
                    "{name} must be finite and > 0, got {value}"
                )));
            }
        }
        if !self.risk_free_rate.is_finite() {
            return Err(LsmError::InvalidArgument(format!(
                "risk_free_rate must be finite, got {}",
                self.risk_free_rate
            )));
        }
        Ok(())
    }
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// Monte Carlo dimensions and RNG seed of one pricing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulation {
    pub num_paths: usize,
    /// Number of exercise dates after inception; the grid has
    /// `num_steps + 1` columns.
    pub num_steps: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Simulation {
    pub fn new(num_paths: usize, num_steps: usize) -> Self {
        Self {
            num_paths,
            num_steps,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Entries in one `(num_paths) x (num_steps + 1)` matrix.
    pub fn grid_len(&self) -> usize {
        self.num_paths.saturating_mul(self.num_steps.saturating_add(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_paths == 0 {
            return Err(LsmError::InvalidArgument(
                "num_paths must be > 0".to_string(),
            ));
        }
        if self.num_steps == 0 {
            return Err(LsmError::InvalidArgument(
                "num_steps must be > 0".to_string(),
            ));
        }
        if u32::try_from(self.num_paths).is_err() {
            return Err(LsmError::InvalidArgument(format!(
                "num_paths must fit in 32 bits, got {}",
                self.num_paths
            )));
        }
        self.num_paths
            .checked_mul(self.num_steps + 1)
            .and_then(|cells| cells.checked_mul(2 * std::mem::size_of::<f64>()))
            .ok_or_else(|| {
                LsmError::InvalidArgument(format!(
                    "simulation grid {} x {} is too large",
                    self.num_paths,
                    self.num_steps + 1
                ))
            })?;
        Ok(())
    }

    /// Minimum arena size for one call: two `f64` matrices plus, per path,
    /// a `u32` index and two `f64` regression observations.
    pub fn arena_bytes(&self) -> usize {
        let matrices = self.grid_len().saturating_mul(16);
        let working = self.num_paths.saturating_mul(8 + 4 + 8);
        matrices.saturating_add(working)
    }

    /// `arena_bytes` plus a 10% margin and room for alignment padding.
    pub fn recommended_arena_bytes(&self) -> usize {
        let minimum = self.arena_bytes();
        minimum
            .saturating_add(minimum / 10)
            .saturating_add(ARENA_ALLOCATIONS * ARENA_ALIGN_SLACK)
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(10_000, 50)
    }
}

#[test]
fn arena_size_matches_layout() {
    let sim = Simulation::new(1000, 9);
    assert_eq!(sim.grid_len(), 10_000);
    assert_eq!(sim.arena_bytes(), 10_000 * 16 + 1000 * 20);
    assert!(sim.recommended_arena_bytes() >= sim.arena_bytes() * 11 / 10);
}

#[test]
fn rejects_bad_contracts() {
    let good = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    assert!(good.validate().is_ok());
    assert!(AmericanPut { spot: 0.0, ..good }.validate().is_err());
    assert!(AmericanPut { volatility: -0.1, ..good }.validate().is_err());
    assert!(AmericanPut { strike: f64::NAN, ..good }.validate().is_err());
    assert!(AmericanPut { risk_free_rate: f64::INFINITY, ..good }.validate().is_err());
    assert!(AmericanPut { risk_free_rate: -0.01, ..good }.validate().is_ok());
}

#[test]
fn rejects_empty_simulations() {
    assert!(Simulation::new(0, 10).validate().is_err());
    assert!(Simulation::new(10, 0).validate().is_err());
    assert!(Simulation::new(usize::MAX, 10).validate().is_err());
    assert!(Simulation::new(8, 1).validate().is_ok());
}

#[test]
fn seed_defaults_when_missing() {
    let sim: Simulation = toml::from_str("num_paths = 16\nnum_steps = 4").unwrap();
    assert_eq!(sim.seed, DEFAULT_SEED);
}
