//! device-agent - SD-WAN edge device agent.
//!
//! Sends a heartbeat and a host metrics report to the controller every
//! `metrics_interval` seconds and exposes its own counters for Prometheus.
//!
//! # Configuration
//!
//! Defaults, then the YAML file at `CONFIG_FILE` (default
//! `/app/config/config.yml`), then the environment variables `SITE_ID`,
//! `CONTROLLER_ENDPOINT`, `LOG_LEVEL`, `METRICS_INTERVAL`, `PROMETHEUS_PORT`,
//! then command-line flags. `RUST_LOG` replaces the filter derived from
//! `LOG_LEVEL` when set.
//!
//! Exits 0 on SIGINT/SIGTERM and 1 on any unrecovered error.

mod agent;
mod cli;
mod config;
mod error;
mod exporter;
mod reporter;
mod stats;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::AgentLoop;
use cli::Cli;
use config::{ConfigResolver, EffectiveConfig};
use error::Result;
use exporter::Telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The log filter depends on the resolved config, so warnings raised while
    // resolving go to a temporary stderr subscriber.
    let config = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        let mut config = ConfigResolver::from_env()
            .with_config_path(cli.config.clone())
            .resolve();
        cli.apply(&mut config);
        config
    });

    if let Err(e) = init_tracing(&config) {
        tracing::subscriber::with_default(bootstrap_subscriber(), || {
            tracing::error!("Device agent failed: {}", e);
        });
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Device agent failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .finish()
}

fn init_tracing(config: &EffectiveConfig) -> Result<()> {
    let level = config.level_filter()?.to_string().to_lowercase();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("device_agent={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn run(config: EffectiveConfig) -> Result<()> {
    tracing::debug!("Effective configuration: {:?}", config);

    let telemetry = Arc::new(Telemetry::new()?);
    let listener = exporter::bind(config.exporter_port()?).await?;

    let exporter_telemetry = telemetry.clone();
    tokio::spawn(async move {
        if let Err(e) = exporter::serve(listener, exporter_telemetry).await {
            tracing::error!("Metrics exporter stopped: {}", e);
        }
    });

    let agent = AgentLoop::new(config, telemetry)?;

    tokio::select! {
        result = agent.start() => result,
        _ = shutdown_signal() => {
            tracing::info!("Device agent stopped by user");
            agent.stop();
            Ok(())
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
