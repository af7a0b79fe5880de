//! Relay orchestrator - wires HTTP ingestion to the dispatcher.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::RelayConfig;
use dispatcher::{create_broker, BrokerBackend, Dispatcher, DispatcherBuilder, LogBroker};
use ingestion::{build_router, IngestionConfig, IngestionWorker};
use tokio::net::TcpListener;
use tracing::info;

use super::RelayStats;

/// Relay run options
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Loaded and validated configuration
    pub config: RelayConfig,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Substitute the log broker for the configured backend
    pub dry_run: bool,
}

/// Main relay orchestrator
pub struct Relay {
    options: RelayOptions,
}

impl Relay {
    /// Create a new relay with the given options
    pub fn new(options: RelayOptions) -> Self {
        Self { options }
    }

    /// Build the dispatcher for the configured (or dry-run) backend
    pub fn build_dispatcher(&self) -> Result<Dispatcher<BrokerBackend>> {
        let config = &self.options.config;
        let broker: BrokerBackend = if self.options.dry_run {
            LogBroker::new("dry-run").into()
        } else {
            create_broker(&config.broker).context("Failed to create broker")?
        };

        DispatcherBuilder::new(config.dispatch.clone(), broker)
            .pool_size(config.broker.pool_size)
            .build()
            .context("Failed to build dispatcher")
    }

    /// Serve until `shutdown` resolves, then drain the dispatcher
    pub async fn run<F>(self, shutdown: F) -> Result<RelayStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.options.config.server.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.options.config.server.bind))?;
        self.run_on(listener, shutdown).await
    }

    /// Like [`Relay::run`] on an already bound listener
    pub async fn run_on<F>(self, listener: TcpListener, shutdown: F) -> Result<RelayStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let start_time = Instant::now();
        let config = &self.options.config;

        // Initialize Metrics (optional)
        if let Some(port) = self.options.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let dispatcher = self.build_dispatcher()?;
        let worker = IngestionWorker::new(Arc::new(dispatcher.clone()));
        let router = build_router(worker.clone(), &IngestionConfig::from(&config.server));

        info!(
            addr = %listener.local_addr().context("Listener has no local address")?,
            "Relay accepting webhooks"
        );
        ingestion::serve(listener, router, shutdown)
            .await
            .context("HTTP server failed")?;

        info!(
            grace_ms = config.server.shutdown_grace_ms,
            "HTTP server stopped, draining dispatcher"
        );
        let report = dispatcher.shutdown(config.server.shutdown_grace()).await;

        Ok(RelayStats {
            duration: start_time.elapsed(),
            ingestion: worker.metrics(),
            dispatch: report.metrics,
            drained: report.drained,
            abandoned: report.abandoned,
        })
    }
}
