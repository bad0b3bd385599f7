#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate trackable;

use clap::{App, Arg, ArgMatches};
use prometrics::metrics::MetricBuilder;
use ringelect::comparator::ComparatorMode;
use ringelect::ident::{IdSource, RandomIds};
use ringelect::ring::{self, RingConfig, RingReport, Transport};
use ringelect::{Error, ErrorKind, Result};
use std::str::FromStr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trackable::error::ErrorKindExt;

/// Simulator settings, loadable from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SimulatorConfig {
    ring_size: usize,
    seed: Option<u64>,
    mode: String,
    transport: String,
    runs: u64,
}
impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            ring_size: 5,
            seed: None,
            mode: ComparatorMode::default().to_string(),
            transport: Transport::default().to_string(),
            runs: 1,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = App::new("ringelect_simu")
        .about("Runs Itai-Rodeh leader elections over simulated rings")
        .arg(
            Arg::with_name("CONFIG")
                .long("config")
                .takes_value(true)
                .help("TOML file with simulator settings"),
        )
        .arg(
            Arg::with_name("RING_SIZE")
                .long("ring-size")
                .takes_value(true)
                .help("Number of processes in the ring"),
        )
        .arg(
            Arg::with_name("SEED")
                .long("seed")
                .takes_value(true)
                .help("Base seed of the identifier sources"),
        )
        .arg(
            Arg::with_name("MODE")
                .long("mode")
                .takes_value(true)
                .possible_values(&["legacy", "total-order"])
                .help("Dominance rule"),
        )
        .arg(
            Arg::with_name("TRANSPORT")
                .long("transport")
                .takes_value(true)
                .possible_values(&["typed", "wire"])
                .help("Kind of frames carried by the links"),
        )
        .arg(
            Arg::with_name("RUNS")
                .long("runs")
                .takes_value(true)
                .help("Number of elections to run"),
        )
        .get_matches();

    if let Err(e) = track!(load_config(&matches)).and_then(|c| track!(simulate(&c))) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(matches: &ArgMatches) -> Result<SimulatorConfig> {
    let mut config = if let Some(path) = matches.value_of("CONFIG") {
        track!(serdeconv::from_toml_file(path)
            .map_err(|e| Error::from(ErrorKind::InvalidInput.takes_over(e))))?
    } else {
        SimulatorConfig::default()
    };
    if let Some(v) = track!(parse_arg(matches, "RING_SIZE"))? {
        config.ring_size = v;
    }
    if let Some(v) = track!(parse_arg(matches, "SEED"))? {
        config.seed = Some(v);
    }
    if let Some(v) = matches.value_of("MODE") {
        config.mode = v.to_owned();
    }
    if let Some(v) = matches.value_of("TRANSPORT") {
        config.transport = v.to_owned();
    }
    if let Some(v) = track!(parse_arg(matches, "RUNS"))? {
        config.runs = v;
    }
    Ok(config)
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    match matches.value_of(name) {
        None => Ok(None),
        Some(s) => match s.parse() {
            Ok(v) => Ok(Some(v)),
            Err(_) => track_panic!(ErrorKind::InvalidInput, "Invalid {}: {:?}", name, s),
        },
    }
}

fn simulate(config: &SimulatorConfig) -> Result<()> {
    let ring_config = RingConfig {
        ring_size: config.ring_size,
        mode: track!(config.mode.parse::<ComparatorMode>())?,
        transport: track!(config.transport.parse::<Transport>())?,
    };
    let base_seed = config.seed.unwrap_or_else(rand::random);
    info!(
        ring_size = config.ring_size,
        seed = base_seed,
        runs = config.runs,
        "simulation started"
    );
    if ring_config.mode == ComparatorMode::Legacy {
        warn!(
            "legacy comparator is only safe when level 1 draws no duplicate ids; \
             random draws may hang or elect more than one leader"
        );
    }

    // Nothing gathers per-run collectors, so keep them out of the default registry
    let metric_builder = MetricBuilder::without_registry();
    for run in 0..config.runs {
        let seed = base_seed.wrapping_add(run);
        let report = track!(ring::run(&ring_config, &metric_builder, |position| {
            let seed = seed
                .wrapping_mul(1_000_003)
                .wrapping_add(position.as_usize() as u64);
            Box::new(RandomIds::seeded(seed)) as Box<dyn IdSource>
        }))?;
        print_report(run, seed, &report);
    }
    Ok(())
}

fn print_report(run: u64, seed: u64, report: &RingReport) {
    println!("# run {} (seed {})", run, seed);
    for o in &report.outcomes {
        println!(
            "position {}: level {}, id {}, {}",
            o.position,
            o.level.as_u64(),
            o.id.as_u64(),
            o.status
        );
    }
    let rounds = report.leaders().map(|o| o.rounds).max().unwrap_or(0);
    println!(
        "leaders {}, leader rounds {}, tokens sent {}",
        report.leaders().count(),
        rounds,
        report.tokens_sent
    );
}
