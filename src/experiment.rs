//! Batch runner: prices a list of TOML-configured cases with several
//! variants, optionally sweeping one input, and writes one JSON line per
//! pricing call.

use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::params::{AmericanPut, Simulation};
use crate::variant::Variant;

/// Upper bound on the points one sweep may expand to.
pub const MAX_SWEEP_POINTS: usize = 10_000;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("invalid experiment config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid experiment config: {0}")]
    Invalid(String),
    #[error("failed to write results: {0}")]
    Write(#[from] io::Error),
    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentConfig {
    pub cases: Vec<Case>,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, ExperimentError> {
        let text = std::fs::read_to_string(path).map_err(|source| ExperimentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ExperimentError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ExperimentError> {
        if self.cases.is_empty() {
            return Err(ExperimentError::Invalid("no cases defined".to_string()));
        }
        for case in &self.cases {
            if case.variants.is_empty() {
                return Err(ExperimentError::Invalid(format!(
                    "case '{}' lists no variants",
                    case.name
                )));
            }
            if let Some(sweep) = &case.sweep {
                if !sweep.start.is_finite() || !sweep.end.is_finite() {
                    return Err(ExperimentError::Invalid(format!(
                        "case '{}' has a non-finite sweep range",
                        case.name
                    )));
                }
                if sweep.steps > MAX_SWEEP_POINTS {
                    return Err(ExperimentError::Invalid(format!(
                        "case '{}' sweeps {} points, at most {MAX_SWEEP_POINTS} are allowed",
                        case.name, sweep.steps
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Case {
    pub name: String,
    pub variants: Vec<Variant>,
    pub option: AmericanPut,
    #[serde(default)]
    pub simulation: Simulation,
    #[serde(default)]
    pub sweep: Option<Sweep>,
}

impl Case {
    /// Every `(option, simulation)` pair this case prices: one without a
    /// sweep, one per sweep point otherwise.
    pub fn points(&self) -> Vec<(AmericanPut, Simulation)> {
        match &self.sweep {
            None => vec![(self.option, self.simulation)],
            Some(sweep) => sweep
                .values()
                .into_iter()
                .map(|value| {
                    let mut option = self.option;
                    let mut simulation = self.simulation;
                    sweep.parameter.apply(value, &mut option, &mut simulation);
                    (option, simulation)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    Spot,
    Strike,
    YearsToExpiry,
    RiskFreeRate,
    Volatility,
    NumPaths,
    NumSteps,
}

impl SweepParameter {
    /// Overwrites one input. Counts are rounded to the nearest integer;
    /// negative counts become zero and fail validation when priced.
    pub fn apply(self, value: f64, option: &mut AmericanPut, sim: &mut Simulation) {
        let count = || value.round().max(0.0) as usize;
        match self {
            SweepParameter::Spot => option.spot = value,
            SweepParameter::Strike => option.strike = value,
            SweepParameter::YearsToExpiry => option.years_to_expiry = value,
            SweepParameter::RiskFreeRate => option.risk_free_rate = value,
            SweepParameter::Volatility => option.volatility = value,
            SweepParameter::NumPaths => sim.num_paths = count(),
            SweepParameter::NumSteps => sim.num_steps = count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Sweep {
    pub parameter: SweepParameter,
    pub start: f64,
    pub end: f64,
    pub steps: usize,
}

impl Sweep {
    /// `steps` evenly spaced points from `start` to `end` inclusive. Fewer
    /// than two points are widened to two.
    pub fn values(&self) -> Vec<f64> {
        let steps = self.steps.max(2);
        let width = (self.end - self.start) / (steps - 1) as f64;
        (0..steps)
            .map(|i| if i == steps - 1 { self.end } else { self.start + i as f64 * width })
            .collect()
    }
}

/// Where the results were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub threads: usize,
    pub crate_version: &'static str,
    /// `HEAD` of the working directory's git checkout, or `"N/A"`.
    pub git_commit: String,
}

impl HostInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            threads: rayon::current_num_threads(),
            crate_version: env!("CARGO_PKG_VERSION"),
            git_commit: git_commit().unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

fn git_commit() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inputs {
    #[serde(flatten)]
    pub option: AmericanPut,
    #[serde(flatten)]
    pub simulation: Simulation,
}

/// One JSON line of output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub case_name: String,
    pub variant: Variant,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub inputs: Inputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: f64,
    pub host: HostInfo,
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Runs every case, writing each record to `out` as soon as it is produced.
/// A variant that fails is recorded with its error and the run carries on;
/// only I/O and encoding failures abort.
pub fn run<W: Write>(
    config: &ExperimentConfig,
    out: &mut W,
) -> Result<Vec<RunRecord>, ExperimentError> {
    let host = HostInfo::current();
    let mut records = Vec::new();

    for case in &config.cases {
        let points = case.points();
        info!(
            case = %case.name,
            points = points.len(),
            variants = case.variants.len(),
            "running case"
        );

        for (option, simulation) in points {
            for &variant in &case.variants {
                let timestamp = unix_timestamp();
                let start = Instant::now();
                let result = variant.price(&option, &simulation);
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

                let (price, error) = match result {
                    Ok(price) => {
                        info!(case = %case.name, %variant, price, elapsed_ms, "priced");
                        (Some(price), None)
                    }
                    Err(err) => {
                        warn!(case = %case.name, %variant, error = %err, "variant failed");
                        (None, Some(err.to_string()))
                    }
                };

                let record = RunRecord {
                    case_name: case.name.clone(),
                    variant,
                    timestamp,
                    inputs: Inputs { option, simulation },
                    price,
                    error,
                    elapsed_ms,
                    host: host.clone(),
                };
                serde_json::to_writer(&mut *out, &record)?;
                out.write_all(b"\n")?;
                records.push(record);
            }
        }
    }

    out.flush()?;
    Ok(records)
}

#[cfg(test)]
const SAMPLE: &str = r#"
[[cases]]
name = "atm"
variants = ["baseline", "arena"]
[cases.option]
spot = 36.0
strike = 40.0
years_to_expiry = 1.0
risk_free_rate = 0.06
volatility = 0.2
[cases.simulation]
num_paths = 1000
num_steps = 10
seed = 7

[[cases]]
name = "spot sweep"
variants = ["simd"]
[cases.option]
spot = 30.0
strike = 40.0
years_to_expiry = 1.0
risk_free_rate = 0.06
volatility = 0.2
[cases.sweep]
parameter = "spot"
start = 30.0
end = 40.0
steps = 3
"#;

#[test]
fn parses_cases() {
    let config = ExperimentConfig::from_toml_str(SAMPLE).unwrap();
    assert_eq!(config.cases.len(), 2);

    let atm = &config.cases[0];
    assert_eq!(atm.variants, [Variant::Baseline, Variant::Arena]);
    assert_eq!(atm.simulation, Simulation::new(1000, 10).with_seed(7));
    assert!(atm.sweep.is_none());
    assert_eq!(atm.points().len(), 1);

    let sweep = &config.cases[1];
    assert_eq!(sweep.simulation, Simulation::default());
    let spots: Vec<f64> = sweep.points().iter().map(|(option, _)| option.spot).collect();
    assert_eq!(spots, [30.0, 35.0, 40.0]);
}

#[test]
fn count_sweeps_round_and_clamp() {
    let sweep = Sweep {
        parameter: SweepParameter::NumPaths,
        start: 1000.0,
        end: 2001.0,
        steps: 3,
    };
    let mut option = AmericanPut::new(36.0, 40.0, 1.0, 0.06, 0.2);
    let mut sim = Simulation::default();
    let counts: Vec<usize> = sweep
        .values()
        .into_iter()
        .map(|value| {
            sweep.parameter.apply(value, &mut option, &mut sim);
            sim.num_paths
        })
        .collect();
    assert_eq!(counts, [1000, 1501, 2001]);

    let single = Sweep { steps: 1, ..sweep };
    assert_eq!(single.values(), [1000.0, 2001.0]);

    SweepParameter::NumSteps.apply(-3.0, &mut option, &mut sim);
    assert_eq!(sim.num_steps, 0);
}

#[test]
fn rejects_bad_configs() {
    assert!(matches!(
        ExperimentConfig::from_toml_str("cases = []"),
        Err(ExperimentError::Invalid(_))
    ));
    let unknown = SAMPLE.replace("\"simd\"", "\"cpp\"");
    assert!(matches!(
        ExperimentConfig::from_toml_str(&unknown),
        Err(ExperimentError::Parse(_))
    ));
    let no_variants = SAMPLE.replace("[\"simd\"]", "[]");
    assert!(matches!(
        ExperimentConfig::from_toml_str(&no_variants),
        Err(ExperimentError::Invalid(_))
    ));
    let endless = SAMPLE.replace("steps = 3", "steps = 1000000000000");
    assert!(matches!(
        ExperimentConfig::from_toml_str(&endless),
        Err(ExperimentError::Invalid(_))
    ));
    let widest = SAMPLE.replace("steps = 3", &format!("steps = {MAX_SWEEP_POINTS}"));
    assert!(ExperimentConfig::from_toml_str(&widest).is_ok());
}

#[test]
fn run_writes_one_line_per_call_and_survives_failures() {
    let mut config = ExperimentConfig::from_toml_str(SAMPLE).unwrap();
    config.cases[1].simulation = Simulation::new(1001, 5);

    let mut out = Vec::new();
    let records = run(&config, &mut out).unwrap();
    assert_eq!(records.len(), 2 + 3);

    let lines: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), records.len());

    assert_eq!(lines[0]["case_name"], "atm");
    assert_eq!(lines[0]["variant"], "baseline");
    assert_eq!(lines[0]["inputs"]["num_paths"], 1000);
    assert_eq!(lines[0]["inputs"]["spot"], 36.0);
    assert!(lines[0]["price"].as_f64().unwrap() > 0.0);
    assert_eq!(lines[0]["price"], lines[1]["price"]);

    // 1001 paths do not split into SIMD lanes.
    for line in &lines[2..] {
        assert_eq!(line["variant"], "simd");
        assert!(line.get("price").is_none());
        assert!(line["error"].as_str().unwrap().contains("SIMD width"));
    }
}

#[test]
fn oversized_failing_point_is_recorded_not_fatal() {
    let mut config = ExperimentConfig::from_toml_str(SAMPLE).unwrap();
    config.cases.truncate(1);
    let mut huge = config.cases[0].clone();
    huge.name = "huge".to_string();
    huge.variants = vec![Variant::Ultimate, Variant::Simd];
    huge.simulation = Simulation::new(1001, 20_000_000);
    config.cases.insert(0, huge);

    let mut out = Vec::new();
    let records = run(&config, &mut out).unwrap();
    assert_eq!(records.len(), 4);

    // The huge grid is rejected for its width before any allocation.
    for record in &records[..2] {
        assert!(record.price.is_none());
        assert!(record.error.as_deref().unwrap().contains("SIMD width"));
    }
    assert_eq!(records[2].case_name, "atm");
    assert!(records[2].price.unwrap() > 0.0);
    assert!(!records[2].host.git_commit.is_empty());

    let first: serde_json::Value =
        serde_json::from_str(String::from_utf8(out).unwrap().lines().next().unwrap()).unwrap();
    assert!(first["host"]["git_commit"].is_string());
}
