//! Background epoch accrual

use monaddit_ledger::{EpochAccrual, Ledger, LedgerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::metrics::LedgerMetrics;

/// Periodically accrues the current epoch's rewards
pub struct EpochWorker {
    ledger: Arc<Ledger>,
    metrics: Arc<LedgerMetrics>,
    interval: Duration,
}

impl EpochWorker {
    pub fn new(ledger: Arc<Ledger>, metrics: Arc<LedgerMetrics>, interval: Duration) -> Self {
        Self {
            ledger,
            metrics,
            interval,
        }
    }

    /// Attempt one accrual. An already-accrued epoch is the normal case
    /// between epoch boundaries.
    pub fn tick(&self) -> Option<EpochAccrual> {
        let result = self.ledger.accrue_epoch();
        self.metrics.record("accrue_epoch", &result);
        match result {
            Ok(accrual) => Some(accrual),
            Err(LedgerError::StaleEpoch { epoch, .. }) => {
                tracing::debug!(epoch, "Epoch already accrued");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Epoch accrual failed");
                None
            }
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs(), "Epoch worker started");

            let worker = Arc::new(self);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let worker = worker.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || worker.tick()).await {
                            tracing::warn!(error = %e, "Epoch worker tick panicked");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Epoch worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monaddit_ledger::{Address, LedgerParams, ManualClock, EPOCH_LENGTH_SECS, ONE_MDT};

    fn setup() -> (EpochWorker, Arc<ManualClock>, Arc<LedgerMetrics>) {
        let clock = Arc::new(ManualClock::new(0));
        let ledger = Arc::new(Ledger::in_memory(LedgerParams::default(), clock.clone()).unwrap());
        let staker = Address::from_bytes([7; 20]);
        ledger
            .on_transfer_confirmed("0xfund", &staker, (20 * ONE_MDT) as i128)
            .unwrap();
        ledger.deposit(&staker, 20 * ONE_MDT).unwrap();

        let metrics = Arc::new(LedgerMetrics::new().unwrap());
        let worker = EpochWorker::new(ledger, metrics.clone(), Duration::from_millis(10));
        (worker, clock, metrics)
    }

    #[test]
    fn test_tick_accrues_each_epoch_once() {
        let (worker, clock, metrics) = setup();
        clock.set(EPOCH_LENGTH_SECS as i64);

        let accrual = worker.tick().unwrap();
        assert_eq!(accrual.epoch, 1);
        assert_eq!(accrual.recipients.len(), 1);

        assert!(worker.tick().is_none());
        assert_eq!(metrics.op_count("accrue_epoch", "ok"), 1);
        assert_eq!(metrics.op_count("accrue_epoch", "STALE_EPOCH"), 1);

        clock.advance(EPOCH_LENGTH_SECS);
        assert_eq!(worker.tick().unwrap().epoch, 2);
    }

    #[tokio::test]
    async fn test_spawned_worker_stops_on_shutdown() {
        let (worker, clock, metrics) = setup();
        clock.set(EPOCH_LENGTH_SECS as i64);
        let ledger = worker.ledger.clone();

        let (tx, rx) = watch::channel(false);
        let handle = worker.spawn(rx);

        // The first tick fires immediately.
        for _ in 0..100 {
            if matches!(ledger.rewards().last_accrued_epoch(), Ok(Some(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ledger.rewards().last_accrued_epoch().unwrap(), Some(1));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(metrics.op_count("accrue_epoch", "ok") >= 1);
    }
}
