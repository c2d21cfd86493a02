//! American put pricing with the Longstaff-Schwartz least-squares Monte
//! Carlo method, in five variants that trade allocation, vectorization and
//! threading strategies against each other while sharing one algorithm.

pub mod arena;
pub mod bs;
pub mod error;
pub mod exercise;
pub mod experiment;
pub mod lsm;
pub mod lsm_arena;
pub mod lsm_mt;
pub mod lsm_simd;
pub mod lsm_ultimate;
pub mod params;
pub mod paths;
pub mod regression;
pub mod simd;
pub mod variant;

pub use arena::Arena;
pub use error::{LsmError, Result};
pub use params::{AmericanPut, Simulation, DEFAULT_SEED};
pub use simd::SIMD_WIDTH;
pub use variant::Variant;
