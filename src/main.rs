use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use balancer_core::AppConfig;

mod app;
mod shutdown;

use app::{AppMode, Application, SubmitRequest};
use shutdown::ShutdownManager;

fn cli() -> Command {
    Command::new("balancer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Prediction-driven task balancer")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level, overrides the configured one")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log format, overrides the configured one")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("worker").about("Run a worker node"))
        .subcommand(
            Command::new("submit")
                .about("Schedule one task on the configured workers and print its result")
                .arg(
                    Arg::new("task")
                        .value_name("TASK")
                        .help("Name of the handler to run")
                        .required(true),
                )
                .arg(
                    Arg::new("payload")
                        .short('p')
                        .long("payload")
                        .value_name("JSON")
                        .help("Task payload")
                        .default_value("null"),
                )
                .arg(
                    Arg::new("features")
                        .short('f')
                        .long("features")
                        .value_name("X,Y,...")
                        .help("Feature vector handed to the predictor")
                        .value_parser(value_parser!(f64))
                        .value_delimiter(',')
                        .action(ArgAction::Append),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config");
    let config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("failed to load configuration from {config_path:?}"))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or(config.logging.format.as_str());
    init_logging(&log_level, log_format)?;

    let mode = parse_app_mode(&matches)?;
    info!(mode = ?mode, workers = config.workers.len(), "starting balancer");

    let shutdown_manager = ShutdownManager::new();
    let mut app_handle = {
        let app = Application::new(config, mode);
        let shutdown = shutdown_manager.clone();
        tokio::spawn(async move { app.run(shutdown).await })
    };

    let outcome = tokio::select! {
        finished = &mut app_handle => finished,
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
            shutdown_manager.shutdown().await;

            match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
                Ok(finished) => finished,
                Err(_) => {
                    warn!("graceful shutdown timed out");
                    return Ok(());
                }
            }
        }
    };

    shutdown_manager.shutdown().await;
    match outcome {
        Ok(Ok(())) => {
            info!("balancer stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "balancer failed");
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("application task panicked: {e}")),
    }
}

fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize JSON logging")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty logging")?,
        other => return Err(anyhow::anyhow!("unsupported log format: {other}")),
    }

    Ok(())
}

fn parse_app_mode(matches: &ArgMatches) -> Result<AppMode> {
    match matches.subcommand() {
        Some(("worker", _)) => Ok(AppMode::Worker),
        Some(("submit", args)) => {
            let task = args
                .get_one::<String>("task")
                .context("missing task name")?
                .clone();
            let raw_payload = args
                .get_one::<String>("payload")
                .map(String::as_str)
                .unwrap_or("null");
            let payload = serde_json::from_str(raw_payload)
                .with_context(|| format!("payload is not valid JSON: {raw_payload}"))?;
            let features = args
                .get_many::<f64>("features")
                .map(|values| values.copied().collect())
                .unwrap_or_default();

            Ok(AppMode::Submit(SubmitRequest {
                task,
                payload,
                features,
            }))
        }
        Some((other, _)) => Err(anyhow::anyhow!("unsupported command: {other}")),
        None => Err(anyhow::anyhow!("no command given")),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
