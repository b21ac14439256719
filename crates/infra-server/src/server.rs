//! Server lifecycle.

use crate::error::ServerError;
use crate::routes;
use crate::state::AppState;
use infra_core::ServerConfig;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct AgentServer {
    config: ServerConfig,
    state: AppState,
}

impl AgentServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Resume unfinished plans, then serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::StartupFailed(format!("failed to bind {addr}: {e}")))?;
        tracing::info!(address = %addr, "infra-agent listening");

        let agent = Arc::clone(self.state.agent());
        tokio::spawn(async move {
            match agent.resume_incomplete().await {
                Ok(reports) if !reports.is_empty() => {
                    tracing::info!(resumed = reports.len(), "Resumed unfinished plans");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to resume unfinished plans"),
            }
        });

        let app = routes::create_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::StartupFailed(e.to_string()))?;

        tracing::info!("infra-agent shut down");
        Ok(())
    }
}

/// Wait for SIGINT (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
