//! Log Relay CLI
//!
//! A TCP relay that normalizes newline-delimited log records, runs each
//! one through an external rule-processing service, and forwards the
//! result to a downstream log sink.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use log_relay_core::config::{LoggingConfig, RelayConfig};
use log_relay_core::network::RelayListener;
use log_relay_core::sink::SinkConnector;
use log_relay_core::transform::RemoteTransformClient;

/// Log relay fronted by a rule-processing transform service.
#[derive(Parser)]
#[command(name = "log-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Override listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Override sink address.
    #[arg(long)]
    sink: Option<String>,

    /// Override transform service address.
    #[arg(long)]
    transform_server: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration; a missing file means defaults
    let mut config = if std::path::Path::new(&args.config).exists() {
        RelayConfig::from_file(&args.config)?
    } else {
        RelayConfig::default()
    };

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.listen.address = listen;
    }
    if let Some(sink) = args.sink {
        config.sink.address = sink;
    }
    if let Some(transform_server) = args.transform_server {
        config.transform.address = transform_server;
    }
    config.validate()?;

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    // Setup tracing
    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen.address,
        sink = %config.sink.address,
        transform_server = %config.transform.address,
        "starting log relay"
    );

    // Run the async runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_relay(config).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_relay(config: RelayConfig) -> anyhow::Result<()> {
    // Connect to the transform service; failure here is fatal
    info!(address = %config.transform.address, "connecting to transform service");
    let transform = Arc::new(RemoteTransformClient::connect(config.transform.clone()).await?);
    info!("connected to transform service");

    // Establish the sink connection with retry; exhaustion is fatal
    info!(address = %config.sink.address, "connecting to sink");
    let sink = Arc::new(SinkConnector::new(config.sink.clone()));
    sink.connect().await?;

    // Start the relay listener
    let listener = RelayListener::new(config, transform, Arc::clone(&sink));
    let shutdown_handle = listener.shutdown_handle();

    // Handle shutdown signals
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping relay");
        let _ = shutdown_handle.send(());
    });

    // Run the relay
    listener.run().await?;

    sink.close().await;

    info!("relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
