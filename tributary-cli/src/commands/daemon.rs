//! Daemon command: poll until shutdown

use crate::config::Config;
use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

pub async fn execute(config: &Config, metrics_addr: Option<SocketAddr>) -> Result<()> {
    let storage = super::connect(config).await?;
    let orchestrator = super::build_orchestrator(&storage, config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = metrics_addr.map(|addr| {
        let storage = storage.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::server::serve(addr, storage, wait_for(rx)).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    orchestrator
        .run_forever(config.poll_interval, wait_for(shutdown_rx))
        .await;

    if let Some(handle) = server {
        let _ = handle.await;
    }
    info!("Daemon stopped");
    Ok(())
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    // A dropped sender also means shut down.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Waits for SIGTERM or Ctrl-C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
