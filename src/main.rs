//! `lsm-pricer`: price American puts with any LSM variant from the command
//! line, compare variants against the lattice oracle, or run a batch of
//! TOML-configured experiments.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lsm_pricer::bs::{binomial_american_put_price, black_scholes_put_price};
use lsm_pricer::experiment::{self, ExperimentConfig};
use lsm_pricer::{AmericanPut, Simulation, Variant, DEFAULT_SEED};

/// Lattice depth for the binomial reference price.
const BINOMIAL_STEPS: usize = 2000;

#[derive(Parser)]
#[command(name = "lsm-pricer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Size of the worker pool used by the multithreaded variants
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price one option with one or more variants
    Price {
        #[command(flatten)]
        option: OptionArgs,

        #[command(flatten)]
        simulation: SimulationArgs,

        /// Variants to run (baseline, arena, simd, mt, ultimate)
        #[arg(long = "variant", value_delimiter = ',', default_value = "ultimate")]
        variants: Vec<Variant>,
    },

    /// Price with every variant next to the Black-Scholes and binomial prices
    Compare {
        #[command(flatten)]
        option: OptionArgs,

        #[command(flatten)]
        simulation: SimulationArgs,
    },

    /// Run the experiments described in a TOML file
    Run {
        /// Experiment config
        #[arg(short, long)]
        config: PathBuf,

        /// JSON-lines output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct OptionArgs {
    #[arg(long, default_value_t = 100.0)]
    spot: f64,

    #[arg(long, default_value_t = 105.0)]
    strike: f64,

    /// Time to expiry in years
    #[arg(long = "expiry", default_value_t = 1.0)]
    years_to_expiry: f64,

    #[arg(long = "rate", default_value_t = 0.05)]
    risk_free_rate: f64,

    #[arg(long = "vol", default_value_t = 0.2)]
    volatility: f64,
}

impl From<&OptionArgs> for AmericanPut {
    fn from(args: &OptionArgs) -> Self {
        AmericanPut::new(
            args.spot,
            args.strike,
            args.years_to_expiry,
            args.risk_free_rate,
            args.volatility,
        )
    }
}

#[derive(Args)]
struct SimulationArgs {
    #[arg(short = 'n', long = "paths", default_value_t = 102_400)]
    num_paths: usize,

    #[arg(short = 's', long = "steps", default_value_t = 100)]
    num_steps: usize,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

impl From<&SimulationArgs> for Simulation {
    fn from(args: &SimulationArgs) -> Self {
        Simulation::new(args.num_paths, args.num_steps).with_seed(args.seed)
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn timed_price(
    variant: Variant,
    option: &AmericanPut,
    sim: &Simulation,
) -> (lsm_pricer::Result<f64>, f64) {
    let start = Instant::now();
    let result = variant.price(option, sim);
    (result, start.elapsed().as_secs_f64() * 1000.0)
}

fn price(option: &AmericanPut, sim: &Simulation, variants: &[Variant]) -> anyhow::Result<()> {
    for &variant in variants {
        let (result, elapsed_ms) = timed_price(variant, option, sim);
        let price = result.with_context(|| format!("variant {variant} failed"))?;
        println!("{:<10} price {:>10.6}  time {:>10.3} ms", variant, price, elapsed_ms);
    }
    Ok(())
}

fn compare(option: &AmericanPut, sim: &Simulation) -> anyhow::Result<()> {
    option.validate()?;
    let european = black_scholes_put_price(
        option.spot,
        option.strike,
        option.volatility,
        option.risk_free_rate,
        option.years_to_expiry,
    );
    let american = binomial_american_put_price(
        option.spot,
        option.strike,
        option.volatility,
        option.risk_free_rate,
        option.years_to_expiry,
        BINOMIAL_STEPS,
    );
    println!("{:<10} price {:>10.6}", "european", european);
    println!("{:<10} price {:>10.6}", "binomial", american);

    for variant in Variant::ALL {
        match timed_price(variant, option, sim) {
            (Ok(price), elapsed_ms) => println!(
                "{:<10} price {:>10.6}  time {:>10.3} ms  vs binomial {:>+9.6}",
                variant,
                price,
                elapsed_ms,
                price - american
            ),
            (Err(err), _) => println!("{:<10} error {}", variant, err),
        }
    }
    Ok(())
}

fn run(config_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    info!(config = %config_path.display(), cases = config.cases.len(), "loaded experiments");

    let records = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            experiment::run(&config, &mut BufWriter::new(file))?
        }
        None => experiment::run(&config, &mut io::stdout().lock())?,
    };

    let failures = records.iter().filter(|record| record.error.is_some()).count();
    info!(records = records.len(), failures, "experiments finished");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure the worker pool")?;
    }
    debug!(threads = rayon::current_num_threads(), "worker pool ready");

    match &cli.command {
        Commands::Price {
            option,
            simulation,
            variants,
        } => price(&AmericanPut::from(option), &Simulation::from(simulation), variants),
        Commands::Compare { option, simulation } => {
            compare(&AmericanPut::from(option), &Simulation::from(simulation))
        }
        Commands::Run { config, output } => run(config, output.as_deref()),
    }
}
