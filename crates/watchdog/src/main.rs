//! Memory watchdog - restarts a deployment on memory pressure
//!
//! Periodically sums the memory usage of every pod in a namespace and
//! triggers a rollout restart of one deployment once the total reaches
//! the configured threshold.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchdog_lib::{
    CancellationToken, ClusterClient, HealthRegistry, KubeApiClient, KubectlClient,
    StructuredLogger, Watchdog, WatchdogMetrics,
};

mod api;
mod config;

use config::{Cli, ClientKind, LogFormat};

const WATCHDOG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = cli.watchdog_config().context("Invalid configuration")?;
    info!(
        namespace = %config.namespace(),
        deployment = %config.deployment(),
        client = ?cli.client,
        "Watchdog configured"
    );

    let client: Arc<dyn ClusterClient> = match cli.client {
        ClientKind::Kubectl => Arc::new(
            KubectlClient::new(&cli.kubectl, config.namespace(), config.deployment())
                .with_timeout(cli.command_timeout),
        ),
        ClientKind::Api => Arc::new(
            KubeApiClient::connect(
                cli.kubeconfig.clone(),
                config.namespace(),
                config.deployment(),
            )
            .await
            .context("Failed to create Kubernetes client")?
            .with_timeout(cli.command_timeout),
        ),
    };

    let health_registry = HealthRegistry::new();
    health_registry.register_watchdog_components().await;
    let metrics = WatchdogMetrics::new();

    let logger = StructuredLogger::new(config.namespace(), config.deployment());
    logger.log_startup(
        WATCHDOG_VERSION,
        config.memory_threshold_mi(),
        config.check_interval(),
    );

    let cancel = CancellationToken::new();

    if let Some(port) = cli.api_port {
        let app_state = Arc::new(api::AppState::new(health_registry.clone()));
        let api_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state, api_cancel).await {
                error!(error = %e, "API server failed");
            }
        });
    }

    tokio::spawn(cancel_on_signal(cancel.clone()));

    let watchdog = Watchdog::new(client, config)
        .with_health(health_registry)
        .with_metrics(metrics);

    match watchdog.run(cancel).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => Err(e).context("Error during execution"),
    }
}

/// Install the global subscriber. File and line are only shown when verbose.
fn init_tracing(verbose: bool, format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(verbose)
                    .with_line_number(verbose),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_file(verbose)
                    .with_line_number(verbose),
            )
            .init(),
    }
}

/// Cancel the watchdog on SIGINT or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal. Shutting down...");
    cancel.cancel();
}
