//! Threshold signing benchmark CLI

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{path::PathBuf, sync::Arc};
use threshold_bench::{
    client::{http, Client},
    config::{self, parse_duration, Config, Operation},
    counters::Report,
    crate_version, driver,
    endpoint::Endpoint,
    mocks,
    pool::Pool,
    Error,
};
use threshold_random::Sampler;
use tracing::{error, info};

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

const OPERATION: &str = "operation";
const ECDSA_CLIENTS: &str = "ecdsa-clients";
const ED25519_CLIENTS: &str = "ed25519-clients";
const THRESHOLD: &str = "threshold";
const SIGNERS: &str = "signers";
const DURATION: &str = "duration";
const DELAY: &str = "delay";
const SHOW_PROGRESS: &str = "show-progress";
const PRESIG_COUNT: &str = "presig-count";
const PRESIG_BATCH_SIZE: &str = "presig-batch-size";
const PRESIG_DIR: &str = "presig-dir";
const NODE: &str = "node";
const SIMULATE: &str = "simulate";

/// Entrypoint for the threshold signing benchmark
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("threshold-bench")
        .version(crate_version())
        .about("Measure the throughput of a threshold signing service under concurrent load.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(OPERATION)
                .long(OPERATION)
                .default_value("sign")
                .help("Operation to benchmark: sign, presigGen, onlineSign or getpub"),
        )
        .arg(
            Arg::new(ECDSA_CLIENTS)
                .long(ECDSA_CLIENTS)
                .default_value("0")
                .help("Number of concurrent clients using ECDSA keys")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ED25519_CLIENTS)
                .long(ED25519_CLIENTS)
                .default_value("0")
                .help("Number of concurrent clients using Ed25519 keys")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(THRESHOLD)
                .long(THRESHOLD)
                .default_value("0")
                .help("Security threshold of generated keys (0 means number of nodes - 1)")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(SIGNERS)
                .long(SIGNERS)
                .default_value("0")
                .help("Number of nodes taking part in each signature (0 means threshold + 1)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(DURATION)
                .long(DURATION)
                .default_value("30s")
                .help("Duration of the benchmark (e.g. 30s, 1m30s)"),
        )
        .arg(
            Arg::new(DELAY)
                .long(DELAY)
                .default_value("0")
                .help("Upper bound of the random pause after each completed operation"),
        )
        .arg(
            Arg::new(SHOW_PROGRESS)
                .long(SHOW_PROGRESS)
                .help("Log every completed operation")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(PRESIG_COUNT)
                .long(PRESIG_COUNT)
                .default_value("100")
                .help("Number of presignatures each client generates (presigGen)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(PRESIG_BATCH_SIZE)
                .long(PRESIG_BATCH_SIZE)
                .default_value("5")
                .help("Number of presignatures generated per operation (must be >= 1)")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(PRESIG_DIR)
                .long(PRESIG_DIR)
                .default_value(config::DEFAULT_PRESIG_DIR)
                .help("Directory holding presignature files")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(NODE)
                .long(NODE)
                .help("Node endpoint as scheme://[api-key@]host[:port][/path] (repeat for every node)")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new(SIMULATE)
                .long(SIMULATE)
                .help("Run against an in-process simulation of the given nodes")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse configuration
    let config = match parse_config(&matches).and_then(Config::validate) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return std::process::ExitCode::from(2);
        }
    };
    log_parameters(&config);

    // Run benchmark
    let config = Arc::new(config);
    let sampler = Arc::new(Sampler::new());
    let result = if matches.get_flag(SIMULATE) {
        let cluster = mocks::Cluster::new(mocks::Config::default());
        let pool = Pool::connect(&config.nodes, |player, _| Ok(cluster.client(player)));
        execute(config, pool, sampler).await
    } else {
        let pool = Pool::connect(&config.nodes, |_, endpoint| http::Client::new(endpoint));
        execute(config, pool, sampler).await
    };
    match result {
        Ok(report) => {
            print!("{report}");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "benchmark failed");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn execute<C: Client>(
    config: Arc<Config>,
    pool: Result<Pool<C>, Error>,
    sampler: Arc<Sampler>,
) -> Result<Report, Error> {
    let pool = Arc::new(pool?);
    driver::run(config, pool, sampler).await
}

fn parse_config(matches: &ArgMatches) -> Result<Config, Error> {
    let operation: Operation = matches.get_one::<String>(OPERATION).unwrap().parse()?;
    let nodes = matches
        .get_many::<String>(NODE)
        .into_iter()
        .flatten()
        .map(|node| node.parse::<Endpoint>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut config = Config::new(operation, nodes);
    config.ecdsa_clients = *matches.get_one::<usize>(ECDSA_CLIENTS).unwrap();
    config.ed25519_clients = *matches.get_one::<usize>(ED25519_CLIENTS).unwrap();
    config.threshold = *matches.get_one::<u32>(THRESHOLD).unwrap();
    config.signers = *matches.get_one::<usize>(SIGNERS).unwrap();
    config.duration = parse_duration(matches.get_one::<String>(DURATION).unwrap())?;
    config.delay = parse_duration(matches.get_one::<String>(DELAY).unwrap())?;
    config.show_progress = matches.get_flag(SHOW_PROGRESS);
    config.presig_count = *matches.get_one::<usize>(PRESIG_COUNT).unwrap();
    config.presig_batch_size = *matches.get_one::<u64>(PRESIG_BATCH_SIZE).unwrap();
    config.presig_dir = matches.get_one::<PathBuf>(PRESIG_DIR).unwrap().clone();
    Ok(config)
}

fn log_parameters(config: &Config) {
    info!(
        operation = %config.operation,
        nodes = config.nodes.len(),
        ecdsa_clients = config.ecdsa_clients,
        ed25519_clients = config.ed25519_clients,
        threshold = config.threshold,
        signers = config.signers,
        delay = ?config.delay,
        duration = ?config.duration,
        "benchmark parameters"
    );
    for (player, node) in config.nodes.iter().enumerate() {
        info!(player, %node, "node");
    }
    if config.operation == Operation::PresigGen {
        info!(
            count = config.presig_count,
            batch_size = config.presig_batch_size,
            dir = %config.presig_dir.display(),
            "presignature parameters"
        );
    }
}
