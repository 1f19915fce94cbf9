//! Bounded lock acquisition for per-entity cells.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::error::{LedgerError, Result};

/// Exclusive access within `timeout`, otherwise `Busy`
pub(crate) fn write_within<'a, T>(
    cell: &'a RwLock<T>,
    timeout: Duration,
    resource: impl FnOnce() -> String,
) -> Result<RwLockWriteGuard<'a, T>> {
    cell.try_write_for(timeout).ok_or_else(|| busy(resource()))
}

/// Shared access within `timeout`, otherwise `Busy`
pub(crate) fn read_within<'a, T>(
    cell: &'a RwLock<T>,
    timeout: Duration,
    resource: impl FnOnce() -> String,
) -> Result<RwLockReadGuard<'a, T>> {
    cell.try_read_for(timeout).ok_or_else(|| busy(resource()))
}

fn busy(resource: String) -> LedgerError {
    tracing::debug!(%resource, "lock wait timed out");
    LedgerError::Busy { resource }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_times_out_while_held() {
        let cell = RwLock::new(5u32);
        let _held = cell.write();
        let err = write_within(&cell, Duration::from_millis(10), || "cell".into()).unwrap_err();
        assert_eq!(err, LedgerError::Busy { resource: "cell".into() });
    }

    #[test]
    fn test_readers_share() {
        let cell = RwLock::new(5u32);
        let first = read_within(&cell, Duration::from_millis(10), || "cell".into()).unwrap();
        let second = read_within(&cell, Duration::from_millis(10), || "cell".into()).unwrap();
        assert_eq!(*first + *second, 10);
    }
}
