//! mqtt-publisher - Main Entry Point

use clap::{Parser, Subcommand};
use mqtt_publisher::config::{ConfigStore, RunConfig, ServiceConfig};
use mqtt_publisher::control::{ApiState, ControlServer, RunDispatcher, RunRequest};
use mqtt_publisher::observability::{init_default_logging, PublisherMetrics};
use mqtt_publisher::payload::load_document;
use mqtt_publisher::publisher::RunCoordinator;
use mqtt_publisher::transport::MqttConnectionFactory;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

/// Multi-client MQTT publisher with an HTTP control API
#[derive(Parser)]
#[command(name = "mqtt-publisher")]
#[command(about = "Publish JSON-derived messages from many simulated MQTT clients")]
#[command(version)]
struct Cli {
    /// Service configuration file (TOML)
    #[arg(short, long, value_name = "FILE", env = "MQTT_PUBLISHER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control API and the run workers
    Serve,
    /// Execute one run with the persisted config and print its summary
    Run,
    /// Inspect configuration
    Config {
        /// Show the effective service configuration and the persisted run config
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    info!("Starting mqtt-publisher v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_service_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Run => run_once(config).await,
        Commands::Config { show } => handle_config_command(config, show).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_service_config(
    config_path: Option<&Path>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ServiceConfig::load_from_file(path)?);
    }

    for candidate in ["publisher.toml", "config/publisher.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ServiceConfig::load_from_file(path)?);
        }
    }

    info!("No service configuration file found, using defaults");
    Ok(ServiceConfig::default())
}

fn build_coordinator(config: &ServiceConfig) -> RunCoordinator<MqttConnectionFactory> {
    RunCoordinator::new(MqttConnectionFactory::new(), config.mqtt.clone())
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(ConfigStore::new(config.files.config_path.clone()));
    let persisted = match store.load().await {
        Ok(run_config) => Some(run_config),
        Err(e) => {
            warn!(
                path = %store.path().display(),
                "No usable persisted run config: {}", e
            );
            None
        }
    };

    let metrics = Arc::new(PublisherMetrics::new());
    let dispatcher = RunDispatcher::start(
        Arc::new(build_coordinator(&config)),
        config.runs.max_concurrent_runs,
        config.runs.queue_capacity,
        Arc::clone(&metrics),
    );

    if config.runs.run_on_startup {
        if let Some(run_config) = persisted.clone() {
            let request = RunRequest::new(run_config, config.files.data_path.clone());
            match dispatcher.submit(request) {
                Ok(run_id) => info!(run_id = %run_id, "Startup run queued"),
                Err(e) => warn!("Startup run not queued: {}", e),
            }
        }
    }

    let state = ApiState {
        store,
        dispatcher: Arc::clone(&dispatcher),
        metrics,
        data_path: config.files.data_path.clone(),
    };
    let addr = config.listen_addr(persisted.as_ref());
    let server = ControlServer::new(addr, state);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    let _ = stop_tx.send(());
    dispatcher.shutdown().await;

    match server_task.await {
        Ok(result) => result?,
        Err(e) => error!("Control API task failed: {}", e),
    }
    Ok(())
}

async fn run_once(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = ConfigStore::new(config.files.config_path.clone());
    let run_config: RunConfig = store.load().await?;
    let document = load_document(&config.files.data_path).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, cancelling run...");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = build_coordinator(&config)
        .execute_run(&run_config, &document, cancel_rx)
        .await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn handle_config_command(
    config: ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !show {
        info!("Service configuration is valid");
        return Ok(());
    }

    println!("{}", config.to_toml()?);

    let store = ConfigStore::new(config.files.config_path.clone());
    match store.load().await {
        Ok(run_config) => {
            run_config.validate()?;
            println!("{}", serde_json::to_string_pretty(&run_config)?);
        }
        Err(e) => warn!(
            path = %store.path().display(),
            "Persisted run config unavailable: {}", e
        ),
    }
    Ok(())
}
