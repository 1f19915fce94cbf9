//! # Rewards Accrual
//!
//! Splits a fixed pool among eligible stakers once per epoch.
//!
//! ## Formula
//!
//! ```text
//! reward(a) = floor(pool * total_staked(a) / Σ total_staked(eligible))
//! ```
//!
//! An account is eligible when it holds at least the minimum stake and its
//! stake is at least `stake_age_requirement_secs` old. Flooring leaves a
//! little undistributed dust each epoch, reported in [`EpochAccrual`].

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::{Account, AccountLedger};
use crate::error::{LedgerError, Result};
use crate::params::LedgerParams;
use crate::types::{amount_serde, mul_div, Address, Amount, Timestamp};

/// One staker's reward for an epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShare {
    /// Recipient
    pub address: Address,

    /// Stake counted for the share
    #[serde(with = "amount_serde")]
    pub stake: Amount,

    /// Reward added to pending
    #[serde(with = "amount_serde")]
    pub reward: Amount,
}

/// Epoch accrual summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochAccrual {
    /// Epoch number (`now / epoch_length`)
    pub epoch: u64,

    /// Clock time of the accrual
    pub accrued_at: Timestamp,

    /// Pool size for the epoch
    #[serde(with = "amount_serde")]
    pub pool: Amount,

    /// Sum of eligible stake
    #[serde(with = "amount_serde")]
    pub total_eligible_stake: Amount,

    /// Total added to pending rewards
    #[serde(with = "amount_serde")]
    pub distributed: Amount,

    /// Pool left over after flooring, or the whole pool with no eligible stake
    #[serde(with = "amount_serde")]
    pub undistributed: Amount,

    /// Per-account rewards, by address
    pub recipients: Vec<RewardShare>,
}

/// Result of a claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Amount moved into the wallet
    #[serde(with = "amount_serde")]
    pub claimed: Amount,

    /// Account after the claim
    pub account: Account,
}

#[derive(Default)]
struct EpochCursor {
    last_accrued: Option<u64>,
    last: Option<EpochAccrual>,
}

/// Reward accrual engine
pub struct RewardsAccrual {
    /// Account state (read for eligibility, written on claim)
    accounts: Arc<AccountLedger>,

    /// Unclaimed rewards per address
    pending: DashMap<Address, Amount>,

    /// Epoch sequence guard; held for the whole accrual
    cursor: Mutex<EpochCursor>,

    /// Protocol parameters
    params: Arc<LedgerParams>,
}

impl RewardsAccrual {
    /// Create new accrual engine
    pub fn new(accounts: Arc<AccountLedger>, params: Arc<LedgerParams>) -> Self {
        Self {
            accounts,
            pending: DashMap::new(),
            cursor: Mutex::new(EpochCursor::default()),
            params,
        }
    }

    /// Epoch containing `now`
    pub fn epoch_of(&self, now: Timestamp) -> u64 {
        now.max(0) as u64 / self.params.epoch_length_secs
    }

    /// Distribute the pool for the epoch containing `now`, at most once
    pub fn accrue_epoch(&self, now: Timestamp) -> Result<EpochAccrual> {
        let epoch = self.epoch_of(now);
        let mut cursor = self.cursor()?;

        if let Some(last) = cursor.last_accrued {
            if epoch <= last {
                return Err(LedgerError::StaleEpoch { epoch, last });
            }
        }

        let eligible: Vec<Account> = self
            .accounts
            .snapshot()?
            .into_iter()
            .filter(|account| account.is_eligible(&self.params, now))
            .collect();
        let total_eligible_stake: Amount = eligible.iter().map(|account| account.total_staked).sum();
        let pool = self.params.epoch_reward_pool;

        let mut recipients = Vec::with_capacity(eligible.len());
        let mut distributed: Amount = 0;
        if total_eligible_stake > 0 {
            for account in eligible {
                let reward = mul_div(pool, account.total_staked, total_eligible_stake);
                if reward == 0 {
                    continue;
                }
                *self.pending.entry(account.address.clone()).or_insert(0) += reward;
                distributed += reward;
                recipients.push(RewardShare {
                    address: account.address,
                    stake: account.total_staked,
                    reward,
                });
            }
        }

        let accrual = EpochAccrual {
            epoch,
            accrued_at: now,
            pool,
            total_eligible_stake,
            distributed,
            undistributed: pool - distributed,
            recipients,
        };
        cursor.last_accrued = Some(epoch);
        cursor.last = Some(accrual.clone());

        tracing::info!(
            epoch,
            recipients = accrual.recipients.len(),
            distributed = %accrual.distributed,
            undistributed = %accrual.undistributed,
            "Accrued epoch rewards"
        );
        Ok(accrual)
    }

    /// Move pending rewards into the wallet
    pub fn claim(&self, address: &Address) -> Result<Claim> {
        let (claimed, account) = self.accounts.with_account(address, |account| {
            let amount = self.pending_rewards(address);
            if amount == 0 {
                return Err(LedgerError::NothingToClaim(address.to_string()));
            }
            account.credit_wallet(amount)?;
            account.claimed_rewards += amount;

            // Subtract rather than clear: an accrual may have landed since the read.
            self.pending.alter(address, |_, pending| pending - amount);
            self.pending.remove_if(address, |_, pending| *pending == 0);
            Ok((amount, account.clone()))
        })?;

        tracing::info!(%address, claimed = %claimed, "Claimed rewards");
        Ok(Claim { claimed, account })
    }

    /// Unclaimed rewards for an address
    pub fn pending_rewards(&self, address: &Address) -> Amount {
        self.pending.get(address).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// Sum of all unclaimed rewards
    pub fn total_pending(&self) -> Amount {
        self.pending.iter().map(|entry| *entry.value()).sum()
    }

    /// Last accrued epoch number
    pub fn last_accrued_epoch(&self) -> Result<Option<u64>> {
        Ok(self.cursor()?.last_accrued)
    }

    /// Summary of the most recent accrual
    pub fn last_accrual(&self) -> Result<Option<EpochAccrual>> {
        Ok(self.cursor()?.last.clone())
    }

    fn cursor(&self) -> Result<MutexGuard<'_, EpochCursor>> {
        self.cursor
            .try_lock_for(self.params.lock_timeout())
            .ok_or_else(|| LedgerError::Busy {
                resource: "epoch accrual".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;

    const WEEK: Timestamp = EPOCH_LENGTH_SECS as Timestamp;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn setup(stakes: &[(u8, u128, Timestamp)]) -> RewardsAccrual {
        let params = Arc::new(LedgerParams::default());
        let accounts = Arc::new(AccountLedger::new(params.clone()));
        for (byte, mdt, at) in stakes {
            let who = addr(*byte);
            accounts
                .on_transfer_confirmed(&format!("0x{}", byte), &who, (*mdt * ONE_MDT) as i128, 0)
                .unwrap();
            accounts.deposit(&who, *mdt * ONE_MDT, *at).unwrap();
        }
        RewardsAccrual::new(accounts, params)
    }

    #[test]
    fn test_accrual_proportional_to_stake() {
        let rewards = setup(&[(1, 10, 0), (2, 30, 0)]);
        let accrual = rewards.accrue_epoch(WEEK).unwrap();

        assert_eq!(accrual.epoch, 1);
        assert_eq!(accrual.total_eligible_stake, 40 * ONE_MDT);
        assert_eq!(rewards.pending_rewards(&addr(1)), 250 * ONE_MDT);
        assert_eq!(rewards.pending_rewards(&addr(2)), 750 * ONE_MDT);
        assert_eq!(accrual.undistributed, 0);
    }

    #[test]
    fn test_young_stake_excluded() {
        let rewards = setup(&[(1, 10, 0), (2, 10, WEEK)]);
        let accrual = rewards.accrue_epoch(WEEK + 1).unwrap();

        assert_eq!(accrual.recipients.len(), 1);
        assert_eq!(rewards.pending_rewards(&addr(1)), EPOCH_REWARD_POOL);
        assert_eq!(rewards.pending_rewards(&addr(2)), 0);
    }

    #[test]
    fn test_dust_reported() {
        let rewards = setup(&[(1, 10, 0), (2, 10, 0), (3, 10, 0)]);
        let accrual = rewards.accrue_epoch(WEEK).unwrap();

        let each = EPOCH_REWARD_POOL / 3;
        assert!(accrual.recipients.iter().all(|share| share.reward == each));
        assert_eq!(accrual.undistributed, EPOCH_REWARD_POOL - 3 * each);
        assert_eq!(accrual.distributed + accrual.undistributed, EPOCH_REWARD_POOL);
    }

    #[test]
    fn test_epoch_accrues_once() {
        let rewards = setup(&[(1, 10, 0)]);
        rewards.accrue_epoch(WEEK).unwrap();
        assert_eq!(
            rewards.accrue_epoch(WEEK + 100),
            Err(LedgerError::StaleEpoch { epoch: 1, last: 1 })
        );
        assert_eq!(rewards.pending_rewards(&addr(1)), EPOCH_REWARD_POOL);

        rewards.accrue_epoch(2 * WEEK).unwrap();
        assert_eq!(rewards.pending_rewards(&addr(1)), 2 * EPOCH_REWARD_POOL);
        assert_eq!(rewards.last_accrued_epoch().unwrap(), Some(2));
        assert_eq!(rewards.last_accrual().unwrap().map(|a| a.epoch), Some(2));
    }

    #[test]
    fn test_no_eligible_stake() {
        let rewards = setup(&[(1, 10, 0)]);
        let accrual = rewards.accrue_epoch(WEEK - 1).unwrap();
        assert_eq!(accrual.epoch, 0);
        assert!(accrual.recipients.is_empty());
        assert_eq!(accrual.undistributed, EPOCH_REWARD_POOL);
        assert!(rewards.accrue_epoch(WEEK - 1).is_err());
    }

    #[test]
    fn test_cursor_reads_bounded_during_accrual() {
        let rewards = setup(&[(1, 10, 0)]);
        rewards.accrue_epoch(WEEK).unwrap();

        let held = rewards.cursor.lock();
        assert!(matches!(rewards.last_accrued_epoch(), Err(LedgerError::Busy { .. })));
        assert!(matches!(rewards.last_accrual(), Err(LedgerError::Busy { .. })));
        drop(held);

        assert_eq!(rewards.last_accrued_epoch().unwrap(), Some(1));
    }

    #[test]
    fn test_claim() {
        let rewards = setup(&[(1, 10, 0)]);
        assert!(matches!(rewards.claim(&addr(1)), Err(LedgerError::NothingToClaim(_))));

        rewards.accrue_epoch(WEEK).unwrap();
        let claim = rewards.claim(&addr(1)).unwrap();
        assert_eq!(claim.claimed, EPOCH_REWARD_POOL);
        assert_eq!(claim.account.wallet_balance, EPOCH_REWARD_POOL);
        assert_eq!(claim.account.claimed_rewards, EPOCH_REWARD_POOL);
        assert_eq!(rewards.pending_rewards(&addr(1)), 0);
        assert_eq!(rewards.total_pending(), 0);
        assert!(matches!(rewards.claim(&addr(1)), Err(LedgerError::NothingToClaim(_))));
    }
}
