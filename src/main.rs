//! Dark detector - main entry point
//!
//! Measures ambient light from a camera snapshot on a fixed interval and
//! publishes it to MQTT until interrupted or until measurements keep failing.

use clap::Parser;
use dark_detector::{
    config::Cli,
    logging::{init_logging, LogConfig},
    DiscoveryPublisher, ImageAcquirer, Poller,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let log_config = LogConfig::from_env()
        .with_level(level)
        .with_file(cli.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.to_config()?;
    let policy = cli.failure_policy()?;

    info!(
        "Starting dark detector v{} (image: {}, interval: {:?}, broker: {}:{})",
        env!("CARGO_PKG_VERSION"),
        config.image.url,
        config.image.interval,
        config.mqtt.host,
        config.mqtt.port
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let acquirer = ImageAcquirer::new(&config.image)?;
    let publisher = match DiscoveryPublisher::connect(&config.mqtt, &config.hass, &cancel).await {
        Ok(publisher) => Arc::new(publisher),
        Err(e) if e.is_cancelled() => {
            info!("Interrupted before the broker connection was established");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let poller = Poller::new(acquirer, publisher.clone(), config.image.interval, policy);
    let result = poller.run(&cancel).await;

    publisher.disconnect().await;
    info!("Shutting down...");

    Ok(result?)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
