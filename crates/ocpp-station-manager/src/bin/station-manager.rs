//! Station manager binary
//!
//! Command-line interface for running the OCPP station manager

use clap::{Arg, Command};
use ocpp_station_manager::auth::TagListAuthorizer;
use ocpp_station_manager::config::{self, Config, LoggingConfig};
use ocpp_station_manager::registry::InboundOnlyConnector;
use ocpp_station_manager::smart_charging::StrategyRegistry;
use ocpp_station_manager::store::MemoryStore;
use ocpp_station_manager::vendor::VendorRegistry;
use ocpp_station_manager::{CsmsResult, StationManager};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_arg = Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file path")
        .default_value("config/station-manager.toml");

    let matches = Command::new("station-manager")
        .version(env!("CARGO_PKG_VERSION"))
        .about("OCPP station manager")
        .subcommand(
            Command::new("start")
                .about("Start the station manager")
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration file")
                .arg(config_arg),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("start", sub_matches)) => {
            let config = load_or_exit(sub_matches.get_one::<String>("config"));
            if let Err(e) = init_tracing(&config.logging) {
                eprintln!("Failed to initialize tracing: {}", e);
                process::exit(1);
            }
            if let Err(e) = run(config).await {
                error!("Station manager failed: {}", e);
                process::exit(1);
            }
        }
        Some(("check-config", sub_matches)) => {
            let config = load_or_exit(sub_matches.get_one::<String>("config"));
            println!(
                "Configuration valid: strategy={}, command timeout={}s, debounce={}ms",
                config.smart_charging.default_strategy,
                config.ocpp.command_timeout_secs,
                config.smart_charging.debounce_ms
            );
        }
        _ => {
            eprintln!("No subcommand provided. Use --help for usage information.");
            process::exit(1);
        }
    }
}

fn load_or_exit(path: Option<&String>) -> Config {
    let config = match path {
        Some(path) => config::load_from_file(path),
        None => Ok(config::load_from_env()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = config::validate_config(&config) {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    }
    config
}

async fn run(config: Config) -> CsmsResult<()> {
    info!("Starting station manager");
    let stats_interval = config.ocpp.heartbeat_interval();
    let strategies = StrategyRegistry::from_config(&config.smart_charging)?;
    let oracle = Arc::new(TagListAuthorizer::new(config.auth.clone()));

    let manager = StationManager::new(
        config,
        Arc::new(MemoryStore::new()),
        oracle,
        Arc::new(InboundOnlyConnector),
        VendorRegistry::with_defaults(),
        strategies,
    )?;

    let mut ticker = tokio::time::interval(stats_interval);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Unable to listen for shutdown signal: {}", e);
                }
                info!("Received shutdown signal, draining background tasks...");
                break;
            }
            _ = ticker.tick() => {
                let stats = manager.get_stats();
                info!(
                    "sessions={} pending_tasks={} metric_families={}",
                    stats.connected_sessions, stats.pending_tasks, stats.metrics_collected
                );
            }
        }
    }

    manager.drain().await;
    info!("Station manager shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
