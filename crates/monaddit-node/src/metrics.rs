//! Prometheus metrics

use monaddit_ledger::{LedgerError, LedgerStats, ONE_MDT};
use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Ledger metrics registry
pub struct LedgerMetrics {
    /// Prometheus registry
    registry: Registry,

    /// Operations by name and result code
    ops_total: IntCounterVec,

    accounts: IntGauge,
    total_staked: Gauge,
    total_reserved: Gauge,
    treasury: Gauge,
    open_challenges: IntGauge,
    last_epoch: IntGauge,
}

impl LedgerMetrics {
    /// Create and register all metrics
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ops_total = IntCounterVec::new(
            Opts::new("monaddit_ledger_ops_total", "Ledger operations by result"),
            &["op", "result"],
        )?;
        let accounts = IntGauge::new("monaddit_accounts", "Known accounts")?;
        let total_staked = Gauge::new("monaddit_total_staked_mdt", "Total staked MDT")?;
        let total_reserved = Gauge::new("monaddit_total_reserved_mdt", "MDT reserved by bonds and challenges")?;
        let treasury = Gauge::new("monaddit_treasury_mdt", "Slashed MDT held by the treasury")?;
        let open_challenges = IntGauge::new("monaddit_open_challenges", "Unresolved challenges")?;
        let last_epoch = IntGauge::new("monaddit_last_accrued_epoch", "Last accrued reward epoch, -1 if none")?;

        registry.register(Box::new(ops_total.clone()))?;
        registry.register(Box::new(accounts.clone()))?;
        registry.register(Box::new(total_staked.clone()))?;
        registry.register(Box::new(total_reserved.clone()))?;
        registry.register(Box::new(treasury.clone()))?;
        registry.register(Box::new(open_challenges.clone()))?;
        registry.register(Box::new(last_epoch.clone()))?;

        Ok(Self {
            registry,
            ops_total,
            accounts,
            total_staked,
            total_reserved,
            treasury,
            open_challenges,
            last_epoch,
        })
    }

    /// Count one operation outcome
    pub fn record<T>(&self, op: &str, result: &Result<T, LedgerError>) {
        let code = match result {
            Ok(_) => "ok",
            Err(err) => err.code(),
        };
        self.ops_total.with_label_values(&[op, code]).inc();
    }

    /// Count of an operation outcome, for inspection
    pub fn op_count(&self, op: &str, result: &str) -> u64 {
        self.ops_total.with_label_values(&[op, result]).get()
    }

    /// Refresh gauges from a stats snapshot
    pub fn observe(&self, stats: &LedgerStats) {
        self.accounts.set(stats.accounts as i64);
        self.total_staked.set(to_mdt(stats.total_staked));
        self.total_reserved.set(to_mdt(stats.total_reserved));
        self.treasury.set(to_mdt(stats.treasury));
        self.open_challenges.set(stats.open_challenges as i64);
        self.last_epoch
            .set(stats.last_accrued_epoch.map(|epoch| epoch as i64).unwrap_or(-1));
    }

    /// Encode in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

// Gauges are for dashboards; exact balances come from the API.
fn to_mdt(amount: u128) -> f64 {
    amount as f64 / ONE_MDT as f64
}
