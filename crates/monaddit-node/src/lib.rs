//! # Monaddit Ledger Node
//!
//! Serves the stake and content-bond ledger over HTTP, exports Prometheus
//! metrics and runs the hourly epoch accrual worker.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod rate_limit;
pub mod worker;

pub use api::{router, AppState};
pub use config::NodeConfig;
pub use error::ApiError;
pub use logging::init_logging;
pub use metrics::LedgerMetrics;
pub use node::{LedgerNode, NodeState};
pub use rate_limit::RateLimiter;
pub use worker::EpochWorker;
