//! Server lifecycle management
//!
//! Owns the signaling store and the HTTP/WebSocket server, and shuts both
//! down on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use dimztube_api::{create_router, AppState};
use dimztube_core::service::webrtc::IceServerConfig;
use dimztube_core::service::SessionNegotiator;
use dimztube_core::store::MemoryStore;
use dimztube_core::Config;

/// `DimzTube` server - manages all server components
pub struct DimzTubeServer {
    config: Config,
    store: MemoryStore,
}

impl DimzTubeServer {
    pub fn new(config: Config) -> Self {
        let store = MemoryStore::from_config(&config.signaling);
        Self { config, store }
    }

    /// Start all servers and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cleanup_handle = self.store.start_cleanup_task(
            Duration::from_secs(self.config.signaling.cleanup_interval_seconds),
            Duration::from_secs(self.config.signaling.session_ttl_seconds),
        );
        info!(
            ttl_secs = self.config.signaling.session_ttl_seconds,
            "Session cleanup task started"
        );

        let http_handle = self.start_http_server(shutdown_rx).await?;

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);
        cleanup_handle.abort();

        let stats = self.store.stats();
        info!(sessions = stats.sessions, "DimzTube server stopped");
        Ok(())
    }

    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let state = AppState::new(
            SessionNegotiator::new(Arc::new(self.store.clone())),
            IceServerConfig::from(&self.config.webrtc),
        );
        let router = create_router(state, &self.config.server.cors_origins);

        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
