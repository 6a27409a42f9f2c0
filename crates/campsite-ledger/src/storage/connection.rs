use crate::config::DatabaseConfig;
use crate::error::{LedgerError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Postgres pool built from [`DatabaseConfig`]
#[derive(Clone)]
pub struct ConnectionPool {
    pool: PgPool,
}

impl ConnectionPool {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db_display = match config.url.rsplit_once('@') {
            Some((_, rest)) => rest,
            None => &config.url,
        };
        info!("Connecting to database: {}", db_display);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| LedgerError::Database {
                operation: "connect".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database {
                operation: "run_migrations".to_string(),
                source: Box::new(e),
            })?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
