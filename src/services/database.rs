//! SQLite connection pool and migrations.

use crate::error::AppError;
use crate::services::metrics::SQLITE_CONNECTIONS;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path`.
    #[instrument(fields(service = "ach-gateway"))]
    pub async fn new(path: &str) -> Result<Self, AppError> {
        info!(path = %path, "Connecting to SQLite");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {e}")))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Publish `{idle, in_use, open}` connection gauges once a second until
    /// the pool closes.
    pub fn spawn_connection_gauge(&self) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                if pool.is_closed() {
                    return;
                }
                let open = pool.size() as i64;
                let idle = pool.num_idle() as i64;
                SQLITE_CONNECTIONS.with_label_values(&["open"]).set(open);
                SQLITE_CONNECTIONS.with_label_values(&["idle"]).set(idle);
                SQLITE_CONNECTIONS
                    .with_label_values(&["in_use"])
                    .set(open - idle);
            }
        });
    }
}
