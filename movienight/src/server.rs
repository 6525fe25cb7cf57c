//! Server lifecycle
//!
//! Starts the HTTP/WebSocket server and the room scheduler, then waits for a
//! shutdown signal and stops both.

use std::time::Duration;

use anyhow::Result;
use movienight_api::{create_router, AppState};
use movienight_core::{bootstrap::Services, Config};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct MovieNightServer {
    config: Config,
    services: Services,
    pool: Option<PgPool>,
}

impl MovieNightServer {
    pub const fn new(config: Config, services: Services, pool: Option<PgPool>) -> Self {
        Self {
            config,
            services,
            pool,
        }
    }

    /// Start all components and wait for shutdown signal
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler_handle = if self.config.scheduler.enabled {
            Some(
                self.services
                    .scheduler
                    .clone()
                    .spawn(shutdown_rx.clone()),
            )
        } else {
            info!("Room scheduler disabled");
            None
        };

        let http_handle = self.start_http_server(shutdown_rx).await?;

        info!("All servers started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);

        if let Some(handle) = scheduler_handle {
            if let Err(e) = handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down MovieNight server...");

        // Signaling sockets are long-lived; give them a moment to close
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        loop {
            let remaining = self.services.relay.connection_count();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Drain timeout reached with {} signaling connection(s) still open",
                    remaining
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        if let Some(pool) = &self.pool {
            info!("Closing database connection pool...");
            pool.close().await;
        }

        info!("MovieNight server shut down complete");
    }

    async fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let http_addr: std::net::SocketAddr = self
            .config
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address()))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let state = AppState::new(&self.services, self.config.signaling.clone());
        let router = create_router(state);

        info!("HTTP server listening on {}", http_addr);

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
