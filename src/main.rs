//! Controller entry point: CLI wiring and a config-driven round loop.

mod cli;

use std::error::Error;
use std::path::Path;
use std::process;
use std::sync::Arc;

use ec_controller::config::ControllerConfig;
use ec_controller::io::export::{SetPointRecord, export_set_points_csv};
use ec_controller::round::{Outbound, RoundDriver, RoundIo, SensorLimitsMessage};
use ec_controller::sct::UniformRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(opts: &cli::CliOptions) -> ControllerConfig {
    let loaded = match (&opts.scenario, &opts.preset) {
        (Some(path), _) => ControllerConfig::from_toml_file(path),
        (None, Some(name)) => ControllerConfig::from_preset(name),
        (None, None) => Ok(ControllerConfig::demo()),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    if let Some(seed) = opts.seed {
        config.controller.seed = Some(seed);
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    config
}

/// The limit update scheduled before `round`, as the grid operator would
/// send it.
fn limits_message(config: &ControllerConfig, round: usize) -> Option<SensorLimitsMessage> {
    config
        .limits_for_round(round)
        .map(|limits| SensorLimitsMessage {
            sensor_limits: limits.clone(),
        })
}

/// Grants leadership right away, runs the configured number of rounds and
/// prints every published message as JSON on stdout.
async fn run(config: ControllerConfig, set_points_out: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let io = RoundIo {
        demands: Arc::new(config.clone()),
        sink: Arc::new(tx),
    };
    let tie_break = config
        .controller
        .seed
        .map_or_else(UniformRandom::default, UniformRandom::seeded);
    let driver = RoundDriver::from_config(&config, io, tie_break)?;
    let handle = driver.handle();

    let cancel = CancellationToken::new();
    let (leader_tx, leader_rx) = mpsc::channel(1);
    let task = driver.start(leader_rx, cancel.clone());

    if let Some(limits) = limits_message(&config, 0) {
        handle.sensor_limits_received(&limits).await?;
    }
    handle.request_flow_proposal().await?;
    leader_tx.send(true).await?;

    let mut records = Vec::new();
    let mut completed = 0usize;
    while completed < config.controller.rounds {
        let Some(message) = rx.recv().await else {
            break;
        };
        match message {
            Outbound::FlowProposals(proposals) => {
                println!("{}", serde_json::to_string(&proposals)?);
            }
            Outbound::SetPoints(set_points, rows) => {
                println!("{}", serde_json::to_string(&set_points)?);
                records.extend(SetPointRecord::from_rows(set_points.round, &rows));
                completed += 1;
                if let Some(limits) = limits_message(&config, set_points.round as usize + 1) {
                    handle.sensor_limits_received(&limits).await?;
                }
            }
        }
    }

    cancel.cancel();
    task.await?;
    info!(rounds = completed, "controller stopped");

    if let Some(path) = set_points_out {
        export_set_points_csv(&records, path)?;
        info!(path = %path.display(), rows = records.len(), "setpoints exported");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();

    let opts = cli::parse_args().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        cli::print_usage();
        process::exit(2);
    });
    let config = load_config(&opts);
    info!(
        algorithm = %config.controller.algorithm,
        sensors = config.sensors.len(),
        rounds = config.controller.rounds,
        "starting controller"
    );

    if let Err(err) = run(config, opts.set_points_out.as_deref()).await {
        error!(%err, "controller failed");
        process::exit(1);
    }
}
