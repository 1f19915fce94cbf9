//! Ledger node lifecycle

use monaddit_ledger::{Clock, Ledger, MonotonicClock};
use parking_lot::RwLock;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

use crate::api::{self, AppState};
use crate::config::NodeConfig;
use crate::metrics::LedgerMetrics;
use crate::worker::EpochWorker;

/// Node state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Node is starting up
    Starting,
    /// Node is serving requests
    Running,
    /// Node is shutting down
    Stopping,
    /// Node has stopped
    Stopped,
}

/// Monaddit ledger node
pub struct LedgerNode {
    /// Configuration
    config: NodeConfig,

    /// Current state
    state: Arc<RwLock<NodeState>>,

    /// Ledger core
    ledger: Arc<Ledger>,

    /// Prometheus metrics
    metrics: Arc<LedgerMetrics>,
}

impl LedgerNode {
    /// Create a node on the wall clock
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a node on a given clock
    pub fn with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate()?;
        let ledger = Arc::new(Ledger::in_memory(config.ledger.clone(), clock)?);
        let metrics = Arc::new(LedgerMetrics::new()?);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(NodeState::Starting)),
            ledger,
            metrics,
        })
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.ledger.clone()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Serve on the configured address until Ctrl-C or SIGTERM
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.api.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, wait_for_shutdown()).await
    }

    /// Serve on `listener` until `shutdown` completes
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting Monaddit ledger node...");
        *self.state.write() = NodeState::Starting;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_handle = if self.config.rewards.worker_enabled {
            let worker = EpochWorker::new(
                self.ledger.clone(),
                self.metrics.clone(),
                self.config.rewards.poll_interval(),
            );
            Some(worker.spawn(shutdown_rx))
        } else {
            tracing::info!("Epoch worker disabled");
            None
        };

        let mut state = AppState::new(self.ledger.clone(), self.metrics.clone(), self.config.node.name.clone());
        state.expose_metrics = self.config.metrics.enabled;
        let app = api::router(Arc::new(state), &self.config.api);

        let local_addr = listener.local_addr()?;
        *self.state.write() = NodeState::Running;
        self.print_startup_banner(&local_addr.to_string());

        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await;

        *self.state.write() = NodeState::Stopping;
        tracing::info!("Shutting down...");

        let _ = shutdown_tx.send(true);
        if let Some(handle) = worker_handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Epoch worker ended abnormally");
            }
        }

        *self.state.write() = NodeState::Stopped;
        tracing::info!("Node stopped");
        served?;
        Ok(())
    }

    fn print_startup_banner(&self, addr: &str) {
        let params = &self.config.ledger;
        tracing::info!("╔══════════════════════════════════════════════════════════════╗");
        tracing::info!("║              MONADDIT LEDGER NODE IS RUNNING                 ║");
        tracing::info!("╚══════════════════════════════════════════════════════════════╝");
        tracing::info!("");
        tracing::info!("Node: {}", self.config.node.name);
        tracing::info!("HTTP API: http://{}", addr);
        if self.config.metrics.enabled {
            tracing::info!("Metrics: http://{}/metrics", addr);
        }
        tracing::info!(
            "Min stake: {} MDT | Post bond: {} MDT | Comment bond: {} MDT | Challenge bond: {} MDT",
            monaddit_ledger::format_mdt(params.min_stake),
            monaddit_ledger::format_mdt(params.post_bond),
            monaddit_ledger::format_mdt(params.comment_bond),
            monaddit_ledger::format_mdt(params.challenge_bond),
        );
        let limit = &self.config.api.rate_limit;
        if limit.enabled {
            tracing::info!("Rate limit: {} requests per {}s per client", limit.max_requests, limit.window_secs);
        }
        if self.config.rewards.worker_enabled {
            tracing::info!(
                "Epoch worker: ENABLED ({}s interval, {}s epochs)",
                self.config.rewards.poll_interval_secs,
                params.epoch_length_secs
            );
        }
        tracing::info!("");
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
