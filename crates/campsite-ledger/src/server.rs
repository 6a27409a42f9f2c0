use crate::api::{self, AppState};
use crate::config::LedgerConfig;
use crate::domain::commands::ShutdownEvent;
use crate::domain::ledger::LedgerService;
use crate::storage::{ConnectionPool, PgLedgerStore, PgReadingSource};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Hosts the HTTP API and the background ledger loops
pub struct LedgerServer {
    config: LedgerConfig,
    ledger: Arc<LedgerService>,
    connection: Option<ConnectionPool>,
}

impl LedgerServer {
    /// Serve an already-built ledger, e.g. one backed by the in-memory store.
    pub fn new(config: LedgerConfig, ledger: Arc<LedgerService>) -> Self {
        Self {
            config,
            ledger,
            connection: None,
        }
    }

    pub async fn new_with_config(config: LedgerConfig) -> anyhow::Result<Self> {
        let connection = ConnectionPool::connect(&config.database)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

        let ledger = Arc::new(LedgerService::new(
            Arc::new(PgLedgerStore::new(&connection)),
            Arc::new(PgReadingSource::new(&connection)),
            config.ledger.clone(),
        ));

        Ok(Self {
            config,
            ledger,
            connection: Some(connection),
        })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        match &self.connection {
            Some(connection) => connection
                .run_migrations()
                .await
                .map_err(|e| anyhow::anyhow!("Migration failed: {}", e)),
            None => Ok(()),
        }
    }

    pub async fn run_with_listener(
        self,
        listener: tokio::net::TcpListener,
        shutdown_signal: tokio::sync::oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!("Starting ledger HTTP server on {}", addr);

        let (feed_tx, feed_rx) = mpsc::channel(self.config.enforcement.shutdown_feed_buffer);
        let consumer_handle = spawn_shutdown_consumer(feed_rx, self.ledger.clone());

        let enforcement_handle = if self.config.enforcement.enabled {
            Some(spawn_enforcement(
                self.ledger.clone(),
                self.config.enforcement.interval(),
            ))
        } else {
            info!("Enforcement sweep disabled");
            None
        };

        let app = api::routes(AppState {
            ledger: self.ledger.clone(),
            shutdown_feed: feed_tx,
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_signal.await;
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("Stopping background tasks");
        if let Some(handle) = enforcement_handle {
            handle.abort();
            let _ = handle.await;
        }
        consumer_handle.abort();
        let _ = consumer_handle.await;

        self.shutdown().await;
        Ok(())
    }

    pub async fn serve(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_addr()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            shutdown_signal.await;
            let _ = tx.send(());
        });

        self.run_with_listener(listener, rx).await
    }

    async fn shutdown(self) {
        info!("Shutting down ledger server");
        if let Some(connection) = &self.connection {
            info!("Closing database connections");
            connection.close().await;
        }
        info!("Ledger server shutdown complete");
    }
}

pub fn spawn_shutdown_consumer(
    receiver: mpsc::Receiver<ShutdownEvent>,
    ledger: Arc<LedgerService>,
) -> JoinHandle<()> {
    tokio::spawn(shutdown_consumer_loop(receiver, ledger))
}

/// Applies forced-shutdown feedback until every sender is gone.
pub async fn shutdown_consumer_loop(
    mut receiver: mpsc::Receiver<ShutdownEvent>,
    ledger: Arc<LedgerService>,
) {
    info!("Starting shutdown feed consumer loop");

    while let Some(event) = receiver.recv().await {
        if let Err(e) = ledger.apply_shutdown_event(&event).await {
            error!(meter = %event.meter_id, "Failed to apply shutdown event: {}", e);
        }
    }

    info!("Shutdown feed closed");
}

pub fn spawn_enforcement(ledger: Arc<LedgerService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting enforcement loop");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match ledger.enforce(Utc::now()).await {
                Ok(report) => debug!(
                    evaluated = report.evaluated,
                    switched_off = report.switched_off.len(),
                    failed = report.failed,
                    "enforcement sweep finished"
                ),
                Err(e) => error!("Enforcement sweep failed: {}", e),
            }
        }
    })
}
