//! Application startup and lifecycle management.
//!
//! Builds the HTTP server for the CRUD surface and the periodic file
//! transfer controller, and runs both until shutdown.

use crate::config::Config;
use crate::error::AppError;
use crate::filetransfer::{FileTransferController, FileTransferRepository};
use crate::handlers;
use crate::services::metrics::get_metrics;
use crate::services::{AchClient, Database, DepositoryRepository, TransferRepository};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub transfer_repo: TransferRepository,
    pub dep_repo: DepositoryRepository,
}

/// Health check endpoint for liveness probes.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "ach-gateway",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded" })),
        ),
    }
}

/// Prometheus metrics endpoint.
async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    controller: FileTransferController,
}

impl Application {
    /// Build the application with the given configuration. The database is
    /// reachable and migrated, or this fails fast.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let db = Database::new(&config.database.path).await?;
        db.run_migrations().await?;
        db.spawn_connection_gauge();

        let transfer_repo = TransferRepository::new(&db);
        let dep_repo = DepositoryRepository::new(&db);
        let ft_repo = FileTransferRepository::new(&db);
        let ach = AchClient::new(&config.ach.endpoint);

        let controller = FileTransferController::new(
            &config.file_transfer,
            ach,
            &ft_repo,
            transfer_repo.clone(),
            dep_repo.clone(),
        )
        .await
        .map_err(AppError::ConfigError)?;

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!("ach-gateway: HTTP on port {}", port);

        let state = AppState {
            db,
            config,
            transfer_repo,
            dep_repo,
        };

        Ok(Self {
            port,
            listener,
            state,
            controller,
        })
    }

    /// Get the port the server is listening on (port 0 binds a random one).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state for sharing with tests.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the HTTP server and the file transfer controller until ctrl-c.
    /// The controller finishes its in-flight tick before exiting.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_endpoint))
            .merge(handlers::api_router())
            .with_state(self.state);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = tokio::spawn(self.controller.run(shutdown_rx));

        tokio::select! {
            result = axum::serve(self.listener, router) => {
                if let Err(e) = result {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
        }

        let _ = shutdown_tx.send(true);
        controller.await??;
        Ok(())
    }
}
