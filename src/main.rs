//! Service Ingress Operator
//!
//! Main entry point for the operator. Loads configuration, sets up the
//! Kubernetes client and runs the Service controller until a shutdown
//! signal arrives.

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use service_ingress_operator::{controllers, metrics, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_from_env()?;
    init_tracing(config.log_format.as_deref());

    info!("Starting Service Ingress Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let shutdown = CancellationToken::new();

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port, shutdown.clone()));
    info!("Metrics server starting on port {}", config.metrics_port);

    let controller = controllers::run(client, config, shutdown.clone());
    tokio::pin!(controller);

    // Handle graceful shutdown
    let result = tokio::select! {
        result = &mut controller => {
            error!("Service controller exited unexpectedly");
            result
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            shutdown.cancel();
            controller.await
        }
    };
    shutdown.cancel();

    match metrics_handle.await {
        Ok(Err(e)) => warn!(error = %e, "Metrics server failed"),
        Err(e) => warn!(error = %e, "Metrics server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Service Ingress Operator stopped");
    result.map_err(Into::into)
}

/// Initialize tracing subscriber
fn init_tracing(format: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        Some("text") => registry.with(tracing_subscriber::fmt::layer()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
