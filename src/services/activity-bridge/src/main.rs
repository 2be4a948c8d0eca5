//! Main binary for the activity bridge
//!
//! Two ways to run:
//! - config-file mode: `-c bridge.yml` or `ACTIVITY_BRIDGE_CONFIG`, any number of pipelines
//! - deployment mode: `TOKEN` + `PORT` (+ `TARGET`) in the environment, one firehose pipeline

use activity_bridge::{
    config::{BridgeConfig, SecretSource},
    routes, ActivityBridge, ConfigError, EnvSecrets,
};

use clap::{Arg, ArgMatches, Command};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const USAGE_HINT: &str = "No pipelines configured.

Either pass a configuration file:
    activity-bridge --config bridge.yml

or set TOKEN and PORT (and optionally TARGET) to forward every resource
to http://<TARGET>:<PORT>.";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let matches = create_cli().get_matches();

    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("text");
    if let Err(e) = init_tracing(log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let config = match load_config(&matches, &EnvSecrets) {
        Ok(Some(config)) => config,
        Ok(None) => {
            eprintln!("{}\n", USAGE_HINT);
            if let Err(e) = create_cli().print_help() {
                error!("Failed to print usage: {}", e);
            }
            return ExitCode::from(2);
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: BridgeConfig) -> Result<(), BoxError> {
    let config = config.validate(&EnvSecrets).map_err(|e| {
        error!("Configuration validation failed");
        e
    })?;

    info!(
        "Starting {} v{} with {} pipeline(s)",
        activity_bridge::SERVICE_NAME,
        activity_bridge::VERSION,
        config.pipelines.len()
    );

    let bridge = ActivityBridge::new(&config.settings)?;
    let cancellation_token = CancellationToken::new();

    let server_task = match &config.settings.metrics_addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| format!("Invalid metrics address '{}': {}", addr, e))?;
            let router = routes::create_router(bridge.http_state());
            let cancel = cancellation_token.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = routes::serve(addr, router, cancel).await {
                    error!("{}", e);
                }
            }))
        }
        None => None,
    };

    if let Err(e) = bridge.start(&config).await {
        cancellation_token.cancel();
        return Err(e.into());
    }

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, stopping pipelines...");

    cancellation_token.cancel();

    if let Err(e) = bridge.shutdown().await {
        warn!("{}", e);
    }

    let grace = Duration::from_secs(config.settings.shutdown_grace_seconds);
    if bridge.drain(grace).await {
        info!("All in-flight deliveries finished");
    }

    if let Some(server_task) = server_task {
        if let Err(e) = server_task.await {
            error!("Server task error during shutdown: {}", e);
        }
    }

    info!("Activity bridge stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(format: &str) -> Result<(), BoxError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "activity_bridge=info,tower_http=info".into());

    let (text, json) = match format {
        "json" => (None, Some(fmt::layer().json().with_target(true))),
        _ => (Some(fmt::layer().with_target(true)), None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .try_init()?;

    Ok(())
}

/// Create CLI argument parser
fn create_cli() -> Command {
    Command::new("activity-bridge")
        .version(activity_bridge::VERSION)
        .about("Forward a real-time activity feed to HTTP webhooks")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .env("ACTIVITY_BRIDGE_CONFIG")
                .help("Pipeline configuration file (YAML, JSON or TOML)"),
        )
        .arg(
            Arg::new("metrics-addr")
                .long("metrics-addr")
                .value_name("ADDR")
                .help("Serve /health and /metrics on this address"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .env("ACTIVITY_BRIDGE_LOG_FORMAT")
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log output format"),
        )
}

/// Pick the run mode. `None` means neither a config file nor deployment variables.
fn load_config(
    matches: &ArgMatches,
    env: &dyn SecretSource,
) -> Result<Option<BridgeConfig>, ConfigError> {
    let mut config = if let Some(config_file) = matches.get_one::<String>("config") {
        info!("Loading configuration from file: {}", config_file);
        BridgeConfig::load(config_file)?
    } else if let Some(pipeline) = BridgeConfig::deployment_pipeline(env)? {
        info!("No configuration file, running a single pipeline from TOKEN and PORT");
        let mut config = BridgeConfig::from_env()?;
        config.pipelines = vec![pipeline];
        config
    } else {
        return Ok(None);
    };

    if let Some(addr) = matches.get_one::<String>("metrics-addr") {
        config.settings.metrics_addr = Some(addr.clone());
    }

    Ok(Some(config))
}

/// Wait for shutdown signals
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
